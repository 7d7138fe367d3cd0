//! Block distribution of a global id space and the part-to-block
//! redistribution descriptor.
//!
//! A block distribution tiles `[0, n_global)` into contiguous same-size
//! blocks, one per owner rank. With a rank step `s`, only ranks
//! `0, s, 2s, ...` own blocks; the others act only as senders. The
//! part-to-block descriptor then moves arrays between an arbitrary
//! partition (each rank holding elements with arbitrary gids) and the
//! block partition, in either direction, for any stride.

use crate::comm::CommBackend;
use crate::error::{FvError, Result};

/// Reduction applied when several contributors target the same block slot.
///
/// Without a reduction, one writer per slot is a precondition (checked in
/// debug builds).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reduction {
    Sum,
    Min,
    Max,
}

/// Regular block partition of `[0, n_global)`.
#[derive(Debug, Clone)]
pub struct BlockDist {
    n_global: u64,
    rank: usize,
    n_ranks: usize,
    rank_step: usize,
    block_size: u64,
    n_blocks: usize,
    gstart: u64,
    gend: u64,
}

impl BlockDist {
    /// Compute the block partition. `min_block_size` is the minimum number
    /// of elements per block (derive it from `CoreConfig::min_coll_buf_size`
    /// divided by the element width for collective-buffer sizing).
    pub fn new(
        comm: &dyn CommBackend,
        n_global: u64,
        min_block_size: u64,
        rank_step: usize,
    ) -> Self {
        let rank = comm.rank();
        let n_ranks = comm.size();
        let step = rank_step.max(1);
        let max_blocks = n_ranks.div_ceil(step).max(1);
        let mut block_size = n_global.div_ceil(max_blocks as u64).max(1);
        if block_size < min_block_size.max(1) {
            block_size = min_block_size.max(1);
        }
        let n_blocks = if n_global == 0 {
            0
        } else {
            n_global.div_ceil(block_size) as usize
        };
        let (gstart, gend) = if rank % step == 0 && rank / step < n_blocks {
            let b = (rank / step) as u64;
            (
                (b * block_size).min(n_global),
                ((b + 1) * block_size).min(n_global),
            )
        } else {
            (0, 0)
        };
        Self {
            n_global,
            rank,
            n_ranks,
            rank_step: step,
            block_size,
            n_blocks,
            gstart,
            gend,
        }
    }

    pub fn n_global(&self) -> u64 {
        self.n_global
    }

    /// The gid range owned by this rank; empty when this rank holds no block.
    pub fn owned_range(&self) -> (u64, u64) {
        (self.gstart, self.gend)
    }

    /// Number of gids in the local block.
    pub fn n_owned(&self) -> usize {
        (self.gend - self.gstart) as usize
    }

    /// Owner rank of a gid.
    pub fn owner_rank(&self, gid: u64) -> usize {
        debug_assert!(gid < self.n_global);
        (gid / self.block_size) as usize * self.rank_step
    }

    /// Offset of a gid within its owner's block.
    pub fn owner_offset(&self, gid: u64) -> u64 {
        gid % self.block_size
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn n_ranks(&self) -> usize {
        self.n_ranks
    }

    pub fn n_blocks(&self) -> usize {
        self.n_blocks
    }
}

/// Reusable redistribution plan between a parallel partition and a block
/// distribution. Immutable after construction; supports arbitrarily many
/// copies in both directions over the same distribution.
pub struct PartToBlock {
    n_local: usize,
    block_len: usize,
    /// Local element indices grouped by target rank (send order).
    send_order: Vec<usize>,
    send_counts: Vec<usize>,
    recv_counts: Vec<usize>,
    /// For each received element, in receive order, its slot in the block.
    recv_slots: Vec<usize>,
    reduction: Option<Reduction>,
}

impl PartToBlock {
    /// Build the plan from the gids of this rank's local elements.
    ///
    /// Collective over `comm`.
    pub fn new(comm: &dyn CommBackend, dist: &BlockDist, gids: &[u64]) -> Result<Self> {
        Self::with_reduction(comm, dist, gids, None)
    }

    /// Same as [`PartToBlock::new`] with an explicit collision reduction.
    pub fn with_reduction(
        comm: &dyn CommBackend,
        dist: &BlockDist,
        gids: &[u64],
        reduction: Option<Reduction>,
    ) -> Result<Self> {
        let n_ranks = comm.size();
        for &g in gids {
            if g >= dist.n_global() {
                return Err(FvError::Usage(format!(
                    "gid {g} outside the distributed range [0, {})",
                    dist.n_global()
                )));
            }
        }

        let mut send_counts = vec![0usize; n_ranks];
        for &g in gids {
            send_counts[dist.owner_rank(g)] += 1;
        }
        let mut offsets = vec![0usize; n_ranks];
        for r in 1..n_ranks {
            offsets[r] = offsets[r - 1] + send_counts[r - 1];
        }
        let mut send_order = vec![0usize; gids.len()];
        let mut cursor = offsets.clone();
        for (i, &g) in gids.iter().enumerate() {
            let r = dist.owner_rank(g);
            send_order[cursor[r]] = i;
            cursor[r] += 1;
        }

        let send_gids: Vec<u64> = send_order.iter().map(|&i| gids[i]).collect();
        let recv_counts = comm.all_to_all_counts(&send_counts);
        let recv_gids = comm.all_to_all_v_u64(&send_gids, &send_counts, &recv_counts);

        let (gstart, _) = dist.owned_range();
        let block_len = dist.n_owned();
        let mut recv_slots = Vec::with_capacity(recv_gids.len());
        for &g in &recv_gids {
            let slot = (g - gstart) as usize;
            if slot >= block_len {
                return Err(FvError::Parallel(format!(
                    "rank {}: received gid {g} outside owned block",
                    comm.rank()
                )));
            }
            recv_slots.push(slot);
        }

        Ok(Self {
            n_local: gids.len(),
            block_len,
            send_order,
            send_counts,
            recv_counts,
            recv_slots,
            reduction,
        })
    }

    /// Number of elements in this rank's block.
    pub fn block_len(&self) -> usize {
        self.block_len
    }

    /// Move a partitioned array into the block distribution.
    ///
    /// `x_part` holds `n_local * stride` values, `y_block` holds
    /// `block_len * stride`. Without a reduction, slots not written by any
    /// contributor are left untouched.
    pub fn part_to_block(
        &self,
        comm: &dyn CommBackend,
        stride: usize,
        x_part: &[f64],
        y_block: &mut [f64],
    ) -> Result<()> {
        self.check_lens(stride, x_part.len(), y_block.len())?;
        let mut send = Vec::with_capacity(self.send_order.len() * stride);
        for &i in &self.send_order {
            send.extend_from_slice(&x_part[i * stride..(i + 1) * stride]);
        }
        let sc: Vec<usize> = self.send_counts.iter().map(|c| c * stride).collect();
        let rc: Vec<usize> = self.recv_counts.iter().map(|c| c * stride).collect();
        let recv = comm.all_to_all_v_f64(&send, &sc, &rc);

        #[cfg(debug_assertions)]
        let mut written = vec![false; if self.reduction.is_none() { self.block_len } else { 0 }];

        for (k, &slot) in self.recv_slots.iter().enumerate() {
            let src = &recv[k * stride..(k + 1) * stride];
            let dst = &mut y_block[slot * stride..(slot + 1) * stride];
            match self.reduction {
                None => {
                    #[cfg(debug_assertions)]
                    {
                        debug_assert!(
                            !written[slot],
                            "two contributors wrote block slot {slot} without a reduction"
                        );
                        written[slot] = true;
                    }
                    dst.copy_from_slice(src);
                }
                Some(Reduction::Sum) => {
                    for (d, s) in dst.iter_mut().zip(src) {
                        *d += s;
                    }
                }
                Some(Reduction::Min) => {
                    for (d, s) in dst.iter_mut().zip(src) {
                        *d = d.min(*s);
                    }
                }
                Some(Reduction::Max) => {
                    for (d, s) in dst.iter_mut().zip(src) {
                        *d = d.max(*s);
                    }
                }
            }
        }
        Ok(())
    }

    /// Move a block-distributed array back to the partition. Each local
    /// element receives exactly one value.
    pub fn block_to_part(
        &self,
        comm: &dyn CommBackend,
        stride: usize,
        y_block: &[f64],
        x_part: &mut [f64],
    ) -> Result<()> {
        self.check_lens(stride, x_part.len(), y_block.len())?;
        let mut send = Vec::with_capacity(self.recv_slots.len() * stride);
        for &slot in &self.recv_slots {
            send.extend_from_slice(&y_block[slot * stride..(slot + 1) * stride]);
        }
        // Reverse direction: receive counts become send counts.
        let sc: Vec<usize> = self.recv_counts.iter().map(|c| c * stride).collect();
        let rc: Vec<usize> = self.send_counts.iter().map(|c| c * stride).collect();
        let recv = comm.all_to_all_v_f64(&send, &sc, &rc);
        for (k, &i) in self.send_order.iter().enumerate() {
            x_part[i * stride..(i + 1) * stride]
                .copy_from_slice(&recv[k * stride..(k + 1) * stride]);
        }
        Ok(())
    }

    fn check_lens(&self, stride: usize, part_len: usize, block_len: usize) -> Result<()> {
        if stride == 0 {
            return Err(FvError::Usage("stride must be nonzero".into()));
        }
        if part_len != self.n_local * stride || block_len != self.block_len * stride {
            return Err(FvError::Usage(format!(
                "part-to-block length mismatch: part {part_len} (expected {}), block {block_len} (expected {})",
                self.n_local * stride,
                self.block_len * stride
            )));
        }
        Ok(())
    }
}
