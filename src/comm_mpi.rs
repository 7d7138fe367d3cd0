//! MPI communication backend.
//!
//! Requires the `distributed` feature flag and an MPI installation. The
//! caller must initialize MPI before constructing `MpiComm`:
//!
//! ```ignore
//! let universe = mpi::initialize().expect("MPI init failed");
//! let comm = MpiComm::new();
//! ```
//!
//! Neighbor exchange uses rank-ordered blocking send/recv: the lower-ranked
//! process sends first and the higher-ranked one receives first, so paired
//! exchanges cannot deadlock.

use crate::comm::CommBackend;
use mpi::collective::SystemOperation;
use mpi::datatype::{Partition, PartitionMut};
use mpi::topology::SimpleCommunicator;
use mpi::traits::*;
use mpi::Count;

/// MPI-based communication backend over the world communicator.
///
/// Panics if MPI has not been initialized via `mpi::initialize()`.
pub struct MpiComm;

impl MpiComm {
    pub fn new() -> Self {
        Self
    }
}

impl Default for MpiComm {
    fn default() -> Self {
        Self::new()
    }
}

fn displs(counts: &[Count]) -> Vec<Count> {
    let mut d = Vec::with_capacity(counts.len());
    let mut acc = 0;
    for &c in counts {
        d.push(acc);
        acc += c;
    }
    d
}

impl CommBackend for MpiComm {
    fn rank(&self) -> usize {
        SimpleCommunicator::world().rank() as usize
    }

    fn size(&self) -> usize {
        SimpleCommunicator::world().size() as usize
    }

    fn barrier(&self) {
        SimpleCommunicator::world().barrier();
    }

    fn all_reduce_sum(&self, local: f64) -> f64 {
        let world = SimpleCommunicator::world();
        let mut global = 0.0f64;
        world.all_reduce_into(&local, &mut global, SystemOperation::sum());
        global
    }

    fn all_reduce_max(&self, local: f64) -> f64 {
        let world = SimpleCommunicator::world();
        let mut global = 0.0f64;
        world.all_reduce_into(&local, &mut global, SystemOperation::max());
        global
    }

    fn all_reduce_sum_u64(&self, local: u64) -> u64 {
        let world = SimpleCommunicator::world();
        let mut global = 0u64;
        world.all_reduce_into(&local, &mut global, SystemOperation::sum());
        global
    }

    fn all_reduce_max_u64(&self, local: u64) -> u64 {
        let world = SimpleCommunicator::world();
        let mut global = 0u64;
        world.all_reduce_into(&local, &mut global, SystemOperation::max());
        global
    }

    fn all_reduce_min_u64(&self, local: u64) -> u64 {
        let world = SimpleCommunicator::world();
        let mut global = 0u64;
        world.all_reduce_into(&local, &mut global, SystemOperation::min());
        global
    }

    fn scan_sum_u64(&self, local: u64) -> u64 {
        let world = SimpleCommunicator::world();
        let mut global = 0u64;
        world.exclusive_scan_into(&local, &mut global, SystemOperation::sum());
        // MPI_Exscan leaves rank 0's output undefined.
        if world.rank() == 0 {
            global = 0;
        }
        global
    }

    fn all_gather_u64(&self, local: u64) -> Vec<u64> {
        let world = SimpleCommunicator::world();
        let mut out = vec![0u64; world.size() as usize];
        world.all_gather_into(&local, &mut out[..]);
        out
    }

    fn all_to_all_counts(&self, send_counts: &[usize]) -> Vec<usize> {
        let world = SimpleCommunicator::world();
        let send: Vec<u64> = send_counts.iter().map(|&c| c as u64).collect();
        let mut recv = vec![0u64; world.size() as usize];
        world.all_to_all_into(&send[..], &mut recv[..]);
        recv.into_iter().map(|c| c as usize).collect()
    }

    fn all_to_all_v_u64(
        &self,
        send: &[u64],
        send_counts: &[usize],
        recv_counts: &[usize],
    ) -> Vec<u64> {
        let world = SimpleCommunicator::world();
        let sc: Vec<Count> = send_counts.iter().map(|&c| c as Count).collect();
        let rc: Vec<Count> = recv_counts.iter().map(|&c| c as Count).collect();
        let sd = displs(&sc);
        let rd = displs(&rc);
        let mut recv = vec![0u64; recv_counts.iter().sum()];
        {
            let send_part = Partition::new(send, &sc[..], &sd[..]);
            let mut recv_part = PartitionMut::new(&mut recv[..], &rc[..], &rd[..]);
            world.all_to_all_varcount_into(&send_part, &mut recv_part);
        }
        recv
    }

    fn all_to_all_v_f64(
        &self,
        send: &[f64],
        send_counts: &[usize],
        recv_counts: &[usize],
    ) -> Vec<f64> {
        let world = SimpleCommunicator::world();
        let sc: Vec<Count> = send_counts.iter().map(|&c| c as Count).collect();
        let rc: Vec<Count> = recv_counts.iter().map(|&c| c as Count).collect();
        let sd = displs(&sc);
        let rd = displs(&rc);
        let mut recv = vec![0.0f64; recv_counts.iter().sum()];
        {
            let send_part = Partition::new(send, &sc[..], &sd[..]);
            let mut recv_part = PartitionMut::new(&mut recv[..], &rc[..], &rd[..]);
            world.all_to_all_varcount_into(&send_part, &mut recv_part);
        }
        recv
    }

    fn exchange_f64(
        &self,
        peers: &[usize],
        send: &[Vec<f64>],
        recv_lens: &[usize],
    ) -> Vec<Vec<f64>> {
        let world = SimpleCommunicator::world();
        let my_rank = world.rank();
        let mut recv = Vec::with_capacity(peers.len());
        for (k, &peer) in peers.iter().enumerate() {
            if peer as i32 == my_rank {
                recv.push(send[k].clone());
                continue;
            }
            let proc = world.process_at_rank(peer as i32);
            let mut buf = vec![0.0f64; recv_lens[k]];
            if my_rank < peer as i32 {
                proc.send(&send[k][..]);
                proc.receive_into(&mut buf[..]);
            } else {
                proc.receive_into(&mut buf[..]);
                proc.send(&send[k][..]);
            }
            recv.push(buf);
        }
        recv
    }
}
