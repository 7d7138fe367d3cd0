//! Communication backend abstraction for the distributed primitives.
//!
//! Provides a trait for cross-rank coordination (reductions, all-to-all
//! redistributions, neighbor exchange for halo refresh) and a no-op
//! single-process implementation.
//!
//! Implementations: `SingleProcessComm` (always available), `MpiComm`
//! (in `comm_mpi`, behind the `distributed` feature).

/// Abstraction over inter-rank communication.
///
/// Every collective must be entered by all ranks of the communicator. In
/// debug builds, callers on hot collectives can use [`debug_sync_check`] to
/// verify compatible arguments across ranks before committing.
pub trait CommBackend: Send + Sync {
    /// This process's rank.
    fn rank(&self) -> usize;

    /// Total number of ranks.
    fn size(&self) -> usize;

    /// Synchronization barrier.
    fn barrier(&self);

    /// Sum a local scalar across all ranks.
    fn all_reduce_sum(&self, local: f64) -> f64;

    /// Max of a local scalar across all ranks.
    fn all_reduce_max(&self, local: f64) -> f64;

    /// Sum a local count across all ranks.
    fn all_reduce_sum_u64(&self, local: u64) -> u64;

    /// Max of a local count across all ranks.
    fn all_reduce_max_u64(&self, local: u64) -> u64;

    /// Min of a local count across all ranks.
    fn all_reduce_min_u64(&self, local: u64) -> u64;

    /// Exclusive prefix sum over ranks: rank r receives the sum of the
    /// values contributed by ranks 0..r. Rank 0 receives 0.
    fn scan_sum_u64(&self, local: u64) -> u64;

    /// Gather one value per rank onto every rank, ordered by rank.
    fn all_gather_u64(&self, local: u64) -> Vec<u64>;

    /// Publish per-target element counts; returns the per-source counts
    /// this rank will receive.
    fn all_to_all_counts(&self, send_counts: &[usize]) -> Vec<usize>;

    /// Variable all-to-all of u64 payloads. `send` is partitioned by target
    /// rank according to `send_counts`; the result is partitioned by source
    /// rank according to `recv_counts`.
    fn all_to_all_v_u64(
        &self,
        send: &[u64],
        send_counts: &[usize],
        recv_counts: &[usize],
    ) -> Vec<u64>;

    /// Variable all-to-all of f64 payloads.
    fn all_to_all_v_f64(
        &self,
        send: &[f64],
        send_counts: &[usize],
        recv_counts: &[usize],
    ) -> Vec<f64>;

    /// Paired neighbor exchange: send `send[k]` to `peers[k]` and receive a
    /// buffer of `recv_lens[k]` values in return. Peer lists must match
    /// across ranks. A peer equal to `self.rank()` is a local copy.
    fn exchange_f64(
        &self,
        peers: &[usize],
        send: &[Vec<f64>],
        recv_lens: &[usize],
    ) -> Vec<Vec<f64>>;
}

/// No-op communication backend for single-rank execution.
///
/// All reductions pass through unchanged; redistributions copy the send
/// buffer back to the caller, so every distributed code path degenerates to
/// its serial equivalent.
pub struct SingleProcessComm;

impl CommBackend for SingleProcessComm {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn barrier(&self) {}

    fn all_reduce_sum(&self, local: f64) -> f64 {
        local
    }

    fn all_reduce_max(&self, local: f64) -> f64 {
        local
    }

    fn all_reduce_sum_u64(&self, local: u64) -> u64 {
        local
    }

    fn all_reduce_max_u64(&self, local: u64) -> u64 {
        local
    }

    fn all_reduce_min_u64(&self, local: u64) -> u64 {
        local
    }

    fn scan_sum_u64(&self, _local: u64) -> u64 {
        0
    }

    fn all_gather_u64(&self, local: u64) -> Vec<u64> {
        vec![local]
    }

    fn all_to_all_counts(&self, send_counts: &[usize]) -> Vec<usize> {
        send_counts.to_vec()
    }

    fn all_to_all_v_u64(
        &self,
        send: &[u64],
        _send_counts: &[usize],
        _recv_counts: &[usize],
    ) -> Vec<u64> {
        send.to_vec()
    }

    fn all_to_all_v_f64(
        &self,
        send: &[f64],
        _send_counts: &[usize],
        _recv_counts: &[usize],
    ) -> Vec<f64> {
        send.to_vec()
    }

    fn exchange_f64(
        &self,
        _peers: &[usize],
        send: &[Vec<f64>],
        _recv_lens: &[usize],
    ) -> Vec<Vec<f64>> {
        send.to_vec()
    }
}

/// Debug-build handshake for collectives: verifies that every rank entered
/// with the same value. Release builds skip the reduction entirely.
pub fn debug_sync_check(comm: &dyn CommBackend, value: u64, what: &str) -> crate::error::Result<()> {
    if cfg!(debug_assertions) {
        let max = comm.all_reduce_max_u64(value);
        let sum = comm.all_reduce_sum_u64(value);
        if sum != max * comm.size() as u64 {
            return Err(crate::error::FvError::Parallel(format!(
                "rank {}: inconsistent {what} across ranks (local {value}, max {max})",
                comm.rank()
            )));
        }
    }
    Ok(())
}
