//! Range sets: unique-ownership numbering over shared entities.
//!
//! Given an interface set, assigns each shared entity to exactly one owner
//! (the lowest rank among its holders) and provides the bijection between
//! the scattered view (ghost and periodic copies included) and the gathered
//! view (each global entity on exactly one rank).

use crate::comm::CommBackend;
use crate::error::{FvError, Result};
use crate::interface::InterfaceSet;

/// Sentinel gid for entries with no gathered-view position on this rank.
pub const GID_NONE: u64 = u64::MAX;

pub struct RangeSet {
    n_local: usize,
    n_owned: usize,
    /// Owned gid range [gstart, gend) in the gathered numbering.
    gstart: u64,
    gend: u64,
    /// Per local index: gathered gid, or GID_NONE for non-owned entries.
    gnum: Vec<u64>,
    /// Per local index: owner rank.
    owner: Vec<usize>,
}

impl RangeSet {
    /// Assign ownership and build the gathered numbering. Collective.
    pub fn new(comm: &dyn CommBackend, ifs: &InterfaceSet) -> Result<Self> {
        let n_local = ifs.n_local();
        let rank = comm.rank();
        let owner = ifs.owner_ranks();
        let n_owned = owner.iter().filter(|&&o| o == rank).count();
        let gstart = comm.scan_sum_u64(n_owned as u64);
        let gend = gstart + n_owned as u64;

        let mut gnum = vec![GID_NONE; n_local];
        let mut next = gstart;
        for (i, &o) in owner.iter().enumerate() {
            if o == rank {
                gnum[i] = next;
                next += 1;
            }
        }
        Ok(Self {
            n_local,
            n_owned,
            gstart,
            gend,
            gnum,
            owner,
        })
    }

    pub fn n_owned(&self) -> usize {
        self.n_owned
    }

    /// Owned gid range in the gathered numbering.
    pub fn owned_range(&self) -> (u64, u64) {
        (self.gstart, self.gend)
    }

    /// Gathered gid per local index (`GID_NONE` when not owned locally).
    pub fn gathered_gnum(&self) -> &[u64] {
        &self.gnum
    }

    /// Owner rank per local index.
    pub fn owner_ranks(&self) -> &[usize] {
        &self.owner
    }

    /// Scattered-to-gathered copy: `y[owned_i] = x[i]` for each locally
    /// owned index. Entries not owned locally are not referenced. Purely
    /// local.
    pub fn gather(&self, stride: usize, x_scatter: &[f64], y_gather: &mut [f64]) -> Result<()> {
        self.check(stride, x_scatter.len(), y_gather.len())?;
        for (i, &g) in self.gnum.iter().enumerate() {
            if g != GID_NONE {
                let k = (g - self.gstart) as usize;
                y_gather[k * stride..(k + 1) * stride]
                    .copy_from_slice(&x_scatter[i * stride..(i + 1) * stride]);
            }
        }
        Ok(())
    }

    /// Gathered-to-scattered copy: owner values are broadcast back to every
    /// holder (and periodic image). Collective.
    pub fn scatter(
        &self,
        comm: &dyn CommBackend,
        ifs: &InterfaceSet,
        stride: usize,
        y_gather: &[f64],
        x_scatter: &mut [f64],
    ) -> Result<()> {
        self.check(stride, x_scatter.len(), y_gather.len())?;
        for (i, &g) in self.gnum.iter().enumerate() {
            if g != GID_NONE {
                let k = (g - self.gstart) as usize;
                x_scatter[i * stride..(i + 1) * stride]
                    .copy_from_slice(&y_gather[k * stride..(k + 1) * stride]);
            }
        }
        ifs.broadcast_owned(comm, stride, x_scatter, stride == 3)
    }

    fn check(&self, stride: usize, scatter_len: usize, gather_len: usize) -> Result<()> {
        if stride == 0 {
            return Err(FvError::Usage("stride must be nonzero".into()));
        }
        if scatter_len != self.n_local * stride || gather_len != self.n_owned * stride {
            return Err(FvError::Usage(format!(
                "range-set length mismatch: scatter {scatter_len} (expected {}), gather {gather_len} (expected {})",
                self.n_local * stride,
                self.n_owned * stride
            )));
        }
        Ok(())
    }
}
