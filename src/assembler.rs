//! Distributed matrix assembly from (row gid, column gid, value) triples.
//!
//! Rows are distributed in contiguous global-id blocks, one block per rank.
//! A contribution to a row owned elsewhere is buffered and shipped to the
//! owner, either on an explicit [`MatrixAssembler::flush`] (to bound memory
//! on large assemblies) or inside [`MatrixAssembler::finalize`]. The
//! symbolic structure is built once; subsequent coefficient updates reuse it
//! through the value-update plan recorded at finalization.
//!
//! Duplicate coordinates are summed in a deterministic order: this rank's
//! contributions in emission order first, then received contributions in
//! origin-rank order. The assembled matrix is scalar (block systems are
//! built through the face-based or MSR constructors directly).

use crate::comm::CommBackend;
use crate::error::{FvError, Result};
use crate::matrix::MsrCoeffs;
use tracing::debug_span;

/// Where one emitted triple ends up.
#[derive(Debug, Clone, Copy)]
enum Dest {
    Local,
    Remote(usize),
}

/// Assembled coefficient slot: the separated diagonal or an off-diagonal
/// CSR entry.
#[derive(Debug, Clone, Copy)]
enum Slot {
    Diag(usize),
    Ex(usize),
}

#[derive(Debug, Default)]
struct UpdatePlan {
    /// Slot per locally-owned emitted triple, in emission order.
    local_slots: Vec<Slot>,
    /// Slot per received coordinate, grouped by origin rank.
    recv_slots: Vec<Vec<Slot>>,
    /// Triples this rank re-sends per target rank on each update.
    send_counts: Vec<usize>,
}

#[derive(Debug)]
pub struct MatrixAssembler {
    rank: usize,
    n_ranks: usize,
    n_rows: usize,
    /// Start gid of every rank's row block, plus the global total.
    row_ranges: Vec<u64>,
    /// Local/remote tag per emitted triple, in emission order.
    emit_dest: Vec<Dest>,
    /// Locally-owned coordinates and first-pass values, emission order.
    local_coords: Vec<(usize, u64)>,
    local_vals: Vec<f64>,
    /// Remote triples not yet shipped, per target rank.
    pending: Vec<Vec<(u64, u64, f64)>>,
    /// Shipped coordinates and values, per origin rank, rows localized.
    received: Vec<Vec<(usize, u64, f64)>>,
    /// Symbolic result; present once finalized.
    row_index: Vec<usize>,
    col_id: Vec<usize>,
    diag: Vec<f64>,
    xval: Vec<f64>,
    plan: Option<UpdatePlan>,
}

impl MatrixAssembler {
    /// Collective. Claims a contiguous row-gid block of `n_rows` for this
    /// rank, ordered by rank.
    pub fn new(comm: &dyn CommBackend, n_rows: usize) -> Result<Self> {
        let n_ranks = comm.size();
        let start = comm.scan_sum_u64(n_rows as u64);
        let mut row_ranges = comm.all_gather_u64(start);
        let total = comm.all_reduce_sum_u64(n_rows as u64);
        row_ranges.push(total);
        Ok(Self {
            rank: comm.rank(),
            n_ranks,
            n_rows,
            row_ranges,
            emit_dest: Vec::new(),
            local_coords: Vec::new(),
            local_vals: Vec::new(),
            pending: vec![Vec::new(); n_ranks],
            received: vec![Vec::new(); n_ranks],
            row_index: Vec::new(),
            col_id: Vec::new(),
            diag: Vec::new(),
            xval: Vec::new(),
            plan: None,
        })
    }

    /// First row gid owned by this rank.
    pub fn row_start(&self) -> u64 {
        self.row_ranges[self.rank]
    }

    fn owner_of(&self, row_gid: u64) -> Result<usize> {
        if row_gid >= self.row_ranges[self.n_ranks] {
            return Err(FvError::Usage(format!(
                "row gid {row_gid} out of global range {}",
                self.row_ranges[self.n_ranks]
            )));
        }
        // ranges are sorted by construction
        Ok(self.row_ranges[..self.n_ranks]
            .partition_point(|&s| s <= row_gid)
            - 1)
    }

    /// Emit one contribution. Duplicates are allowed and summed.
    pub fn add_value(&mut self, row_gid: u64, col_gid: u64, value: f64) -> Result<()> {
        debug_assert!(self.plan.is_none(), "assembler already finalized");
        let owner = self.owner_of(row_gid)?;
        if owner == self.rank {
            self.emit_dest.push(Dest::Local);
            self.local_coords
                .push(((row_gid - self.row_ranges[self.rank]) as usize, col_gid));
            self.local_vals.push(value);
        } else {
            self.emit_dest.push(Dest::Remote(owner));
            self.pending[owner].push((row_gid, col_gid, value));
        }
        Ok(())
    }

    /// Emit a batch of contributions.
    pub fn add_values(&mut self, rows: &[u64], cols: &[u64], values: &[f64]) -> Result<()> {
        debug_assert_eq!(rows.len(), cols.len());
        debug_assert_eq!(rows.len(), values.len());
        for k in 0..rows.len() {
            self.add_value(rows[k], cols[k], values[k])?;
        }
        Ok(())
    }

    /// Collective. Ship buffered remote triples to their row owners and
    /// clear the buffers. Must be called by every rank together.
    pub fn flush(&mut self, comm: &dyn CommBackend) -> Result<()> {
        let send_counts: Vec<usize> = self.pending.iter().map(Vec::len).collect();
        let recv_counts = comm.all_to_all_counts(&send_counts);
        let total_send: usize = send_counts.iter().sum();
        let mut gids = Vec::with_capacity(total_send * 2);
        let mut vals = Vec::with_capacity(total_send);
        for bucket in &mut self.pending {
            for &(r, c, v) in bucket.iter() {
                gids.push(r);
                gids.push(c);
                vals.push(v);
            }
            bucket.clear();
        }
        let gid_send: Vec<usize> = send_counts.iter().map(|&c| c * 2).collect();
        let gid_recv: Vec<usize> = recv_counts.iter().map(|&c| c * 2).collect();
        let rgids = comm.all_to_all_v_u64(&gids, &gid_send, &gid_recv);
        let rvals = comm.all_to_all_v_f64(&vals, &send_counts, &recv_counts);
        let start = self.row_ranges[self.rank];
        let mut off = 0;
        for (origin, &count) in recv_counts.iter().enumerate() {
            for k in 0..count {
                let r = rgids[(off + k) * 2];
                let c = rgids[(off + k) * 2 + 1];
                if r < start || r - start >= self.n_rows as u64 {
                    return Err(FvError::Parallel(format!(
                        "received row gid {r} outside owned block of rank {}",
                        self.rank
                    )));
                }
                self.received[origin].push(((r - start) as usize, c, rvals[off + k]));
            }
            off += count;
        }
        Ok(())
    }

    /// Collective. Build the symbolic structure and the first coefficient
    /// values. `col_local` maps a column gid to a local column id (owned or
    /// ghost) and must cover every referenced column; `n_cols` bounds it.
    ///
    /// The resulting CSR has strictly increasing local column ids per row,
    /// with the diagonal held apart and always allocated.
    pub fn finalize<F>(&mut self, comm: &dyn CommBackend, n_cols: usize, col_local: F) -> Result<()>
    where
        F: Fn(u64) -> Option<usize>,
    {
        let _span = debug_span!("assembler_finalize", n_rows = self.n_rows).entered();
        if self.plan.is_some() {
            return Err(FvError::Usage("assembler already finalized".into()));
        }
        self.flush(comm)?;

        // owned row gid range maps 1:1 to local rows
        let map_col = |row: usize, gid: u64| -> Result<usize> {
            let c = col_local(gid).ok_or_else(|| {
                FvError::Usage(format!("column gid {gid} has no local id on row {row}"))
            })?;
            if c >= n_cols {
                return Err(FvError::Usage(format!(
                    "column gid {gid} maps to {c}, past n_cols {n_cols}"
                )));
            }
            Ok(c)
        };

        // symbolic: per-row sorted, deduplicated off-diagonal columns
        let mut row_cols: Vec<Vec<usize>> = vec![Vec::new(); self.n_rows];
        let diag_gid_of = |r: usize| self.row_ranges[self.rank] + r as u64;
        for &(r, cg) in &self.local_coords {
            if cg != diag_gid_of(r) {
                row_cols[r].push(map_col(r, cg)?);
            }
        }
        for bucket in &self.received {
            for &(r, cg, _) in bucket {
                if cg != diag_gid_of(r) {
                    row_cols[r].push(map_col(r, cg)?);
                }
            }
        }
        self.row_index = Vec::with_capacity(self.n_rows + 1);
        self.row_index.push(0);
        self.col_id.clear();
        for cols in &mut row_cols {
            cols.sort_unstable();
            cols.dedup();
            self.col_id.extend_from_slice(cols);
            self.row_index.push(self.col_id.len());
        }
        let nnz = self.col_id.len();

        // value-update plan: one slot per coordinate, in application order
        let slot_of = |row_index: &[usize], col_id: &[usize], r: usize, cg: u64| -> Result<Slot> {
            if cg == diag_gid_of(r) {
                return Ok(Slot::Diag(r));
            }
            let c = map_col(r, cg)?;
            let row = &col_id[row_index[r]..row_index[r + 1]];
            let pos = row.binary_search(&c).map_err(|_| {
                FvError::Usage(format!("column {c} vanished from row {r} structure"))
            })?;
            Ok(Slot::Ex(row_index[r] + pos))
        };
        let mut plan = UpdatePlan {
            local_slots: Vec::with_capacity(self.local_coords.len()),
            recv_slots: vec![Vec::new(); self.n_ranks],
            send_counts: vec![0; self.n_ranks],
        };
        for &(r, cg) in &self.local_coords {
            plan.local_slots
                .push(slot_of(&self.row_index, &self.col_id, r, cg)?);
        }
        for (origin, bucket) in self.received.iter().enumerate() {
            for &(r, cg, _) in bucket {
                plan.recv_slots[origin].push(slot_of(&self.row_index, &self.col_id, r, cg)?);
            }
        }
        for dest in &self.emit_dest {
            if let Dest::Remote(rank) = dest {
                plan.send_counts[*rank] += 1;
            }
        }

        // first numeric pass: local values plus already-shipped remote ones;
        // the coordinate payloads are consumed here, only the slots remain
        let local_vals = std::mem::take(&mut self.local_vals);
        let received = std::mem::take(&mut self.received);
        self.received = vec![Vec::new(); self.n_ranks];
        self.local_coords = Vec::new();
        self.diag = vec![0.0; self.n_rows];
        self.xval = vec![0.0; nnz];
        for (k, &v) in local_vals.iter().enumerate() {
            self.apply(plan.local_slots[k], v);
        }
        for (origin, bucket) in received.iter().enumerate() {
            for (k, &(_, _, v)) in bucket.iter().enumerate() {
                self.apply(plan.recv_slots[origin][k], v);
            }
        }
        self.plan = Some(plan);
        Ok(())
    }

    #[inline]
    fn apply(&mut self, slot: Slot, v: f64) {
        match slot {
            Slot::Diag(r) => self.diag[r] += v,
            Slot::Ex(i) => self.xval[i] += v,
        }
    }

    /// Collective. Refresh coefficient values without redoing the symbolic
    /// phase. `values` follows the original emission order exactly, one
    /// value per triple emitted before `finalize`.
    pub fn update_values(&mut self, comm: &dyn CommBackend, values: &[f64]) -> Result<()> {
        let plan = self
            .plan
            .take()
            .ok_or_else(|| FvError::Usage("update_values before finalize".into()))?;
        let result = self.update_values_inner(comm, values, &plan);
        self.plan = Some(plan);
        result
    }

    fn update_values_inner(
        &mut self,
        comm: &dyn CommBackend,
        values: &[f64],
        plan: &UpdatePlan,
    ) -> Result<()> {
        if values.len() != self.emit_dest.len() {
            return Err(FvError::Usage(format!(
                "update_values got {} values, assembly emitted {}",
                values.len(),
                self.emit_dest.len()
            )));
        }
        let recv_counts: Vec<usize> = plan.recv_slots.iter().map(Vec::len).collect();
        let mut send: Vec<Vec<f64>> = self
            .pending
            .iter()
            .map(|_| Vec::new())
            .collect();
        self.diag.fill(0.0);
        self.xval.fill(0.0);
        let mut local_k = 0;
        for e in 0..self.emit_dest.len() {
            match self.emit_dest[e] {
                Dest::Local => {
                    self.apply(plan.local_slots[local_k], values[e]);
                    local_k += 1;
                }
                Dest::Remote(rank) => send[rank].push(values[e]),
            }
        }
        let send_flat: Vec<f64> = send.iter().flatten().copied().collect();
        let send_counts: Vec<usize> = send.iter().map(Vec::len).collect();
        debug_assert_eq!(send_counts, plan.send_counts);
        let recv = comm.all_to_all_v_f64(&send_flat, &send_counts, &recv_counts);
        let mut off = 0;
        for (origin, slots) in plan.recv_slots.iter().enumerate() {
            for (k, &slot) in slots.iter().enumerate() {
                self.apply(slot, recv[off + k]);
            }
            off += slots.len();
        }
        Ok(())
    }

    /// The assembled coefficients in MSR form. Valid after `finalize`.
    pub fn coeffs(&self) -> Result<MsrCoeffs> {
        if self.plan.is_none() {
            return Err(FvError::Usage("coeffs requested before finalize".into()));
        }
        Ok(MsrCoeffs {
            row_index: self.row_index.clone(),
            col_id: self.col_id.clone(),
            diag: self.diag.clone(),
            xval: self.xval.clone(),
        })
    }

    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    /// Off-diagonal entry count. Valid after `finalize`.
    pub fn nnz(&self) -> usize {
        self.col_id.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::SingleProcessComm;
    use approx::assert_abs_diff_eq;

    fn ident_map(gid: u64) -> Option<usize> {
        Some(gid as usize)
    }

    #[test]
    fn duplicates_sum_and_diag_separates() {
        let comm = SingleProcessComm;
        let mut asm = MatrixAssembler::new(&comm, 3).unwrap();
        asm.add_value(0, 0, 1.0).unwrap();
        asm.add_value(0, 1, -0.25).unwrap();
        asm.add_value(0, 1, -0.75).unwrap();
        asm.add_value(2, 2, 4.0).unwrap();
        asm.add_value(1, 0, -1.0).unwrap();
        asm.finalize(&comm, 3, ident_map).unwrap();
        let m = asm.coeffs().unwrap();
        assert_eq!(m.row_index, vec![0, 1, 2, 2]);
        assert_eq!(m.col_id, vec![1, 0]);
        assert_abs_diff_eq!(m.diag[0], 1.0);
        // row 1 never saw a diagonal contribution but one is allocated
        assert_abs_diff_eq!(m.diag[1], 0.0);
        assert_abs_diff_eq!(m.diag[2], 4.0);
        assert_abs_diff_eq!(m.xval[0], -1.0);
    }

    #[test]
    fn update_values_reuses_structure() {
        let comm = SingleProcessComm;
        let mut asm = MatrixAssembler::new(&comm, 2).unwrap();
        asm.add_value(0, 0, 2.0).unwrap();
        asm.add_value(0, 1, -1.0).unwrap();
        asm.add_value(1, 1, 2.0).unwrap();
        asm.add_value(0, 1, -1.0).unwrap();
        asm.finalize(&comm, 2, ident_map).unwrap();
        assert_abs_diff_eq!(asm.coeffs().unwrap().xval[0], -2.0);
        asm.update_values(&comm, &[4.0, -3.0, 4.0, -5.0]).unwrap();
        let m = asm.coeffs().unwrap();
        assert_abs_diff_eq!(m.diag[0], 4.0);
        assert_abs_diff_eq!(m.xval[0], -8.0);
        assert_eq!(asm.nnz(), 1);
    }

    #[test]
    fn row_gid_out_of_range_rejected() {
        let comm = SingleProcessComm;
        let mut asm = MatrixAssembler::new(&comm, 2).unwrap();
        assert!(asm.add_value(2, 0, 1.0).is_err());
    }

    #[test]
    fn unmapped_column_rejected() {
        let comm = SingleProcessComm;
        let mut asm = MatrixAssembler::new(&comm, 2).unwrap();
        asm.add_value(0, 1, 1.0).unwrap();
        let err = asm.finalize(&comm, 2, |_| None).unwrap_err();
        assert!(matches!(err, FvError::Usage(_)));
    }
}
