//! Ghost-cell halos and their synchronization.
//!
//! A halo records, per peer rank, which local cells feed the peer's ghost
//! layer and which local ghost cells are fed by the peer. Ghost cells live
//! at local indices `n_local..n_local + n_ghost`. The standard layer covers
//! face neighbors; the extended layer adds vertex neighbors. Periodic
//! sections carry a transform so vector components are rotated in flight.

use crate::comm::CommBackend;
use crate::error::{FvError, Result};
use crate::interface::{Periodicity, TransformRef};

/// Which ghost layer a synchronization refreshes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HaloMode {
    /// Face-neighbor ghosts only.
    Standard,
    /// Face and vertex neighbors.
    Extended,
}

/// Per-peer halo bookkeeping.
#[derive(Debug, Clone)]
pub struct HaloSection {
    pub rank: usize,
    pub transform: Option<TransformRef>,
    /// Local cells sent to the peer's standard ghost layer.
    pub send_std: Vec<usize>,
    /// Local cells sent to the peer's extended ghost layer.
    pub send_ext: Vec<usize>,
    /// Ghost offsets (relative to n_local) receiving the peer's values.
    pub recv_std_start: usize,
    pub recv_std_count: usize,
    pub recv_ext_start: usize,
    pub recv_ext_count: usize,
}

#[derive(Debug)]
pub struct Halo {
    n_local: usize,
    n_ghost: usize,
    sections: Vec<HaloSection>,
    periodicities: Vec<Periodicity>,
}

/// Incremental halo construction; ghost indices are assigned in
/// registration order, standard section before extended section per peer.
pub struct HaloBuilder {
    n_local: usize,
    next_ghost: usize,
    sections: Vec<HaloSection>,
    periodicities: Vec<Periodicity>,
}

impl HaloBuilder {
    pub fn new(n_local: usize) -> Self {
        Self {
            n_local,
            next_ghost: 0,
            sections: Vec::new(),
            periodicities: Vec::new(),
        }
    }

    pub fn with_periodicities(mut self, periodicities: Vec<Periodicity>) -> Self {
        self.periodicities = periodicities;
        self
    }

    /// Register a peer. `send_std`/`send_ext` list the local cells whose
    /// values feed the peer's ghost layers; the matching ghost cells on this
    /// side are sized by `recv_std`/`recv_ext`.
    pub fn add_section(
        &mut self,
        rank: usize,
        transform: Option<TransformRef>,
        send_std: Vec<usize>,
        send_ext: Vec<usize>,
        recv_std: usize,
        recv_ext: usize,
    ) -> &mut Self {
        let recv_std_start = self.next_ghost;
        self.next_ghost += recv_std;
        let recv_ext_start = self.next_ghost;
        self.next_ghost += recv_ext;
        self.sections.push(HaloSection {
            rank,
            transform,
            send_std,
            send_ext,
            recv_std_start,
            recv_std_count: recv_std,
            recv_ext_start,
            recv_ext_count: recv_ext,
        });
        self
    }

    pub fn build(self) -> Halo {
        Halo {
            n_local: self.n_local,
            n_ghost: self.next_ghost,
            sections: self.sections,
            periodicities: self.periodicities,
        }
    }
}

impl Halo {
    /// An empty halo (single-rank meshes).
    pub fn empty(n_local: usize) -> Self {
        HaloBuilder::new(n_local).build()
    }

    pub fn n_local(&self) -> usize {
        self.n_local
    }

    /// Total ghost cells (standard + extended).
    pub fn n_ghost(&self) -> usize {
        self.n_ghost
    }

    pub fn sections(&self) -> &[HaloSection] {
        &self.sections
    }

    /// Refresh ghost values of a scalar (or component-wise) array of the
    /// given stride. Collective; one call is one exchange, with no partial
    /// progress visible across ranks.
    pub fn sync(
        &self,
        comm: &dyn CommBackend,
        mode: HaloMode,
        stride: usize,
        x: &mut [f64],
    ) -> Result<()> {
        self.sync_impl(comm, mode, stride, x, false)
    }

    /// Refresh ghost values of a vector field (stride 3), applying periodic
    /// rotations to each component block.
    pub fn sync_vector(&self, comm: &dyn CommBackend, mode: HaloMode, x: &mut [f64]) -> Result<()> {
        self.sync_impl(comm, mode, 3, x, true)
    }

    fn sync_impl(
        &self,
        comm: &dyn CommBackend,
        mode: HaloMode,
        stride: usize,
        x: &mut [f64],
        rotate: bool,
    ) -> Result<()> {
        if stride == 0 || x.len() != (self.n_local + self.n_ghost) * stride {
            return Err(FvError::Usage(format!(
                "halo sync length mismatch: got {}, expected ({} + {}) x {stride}",
                x.len(),
                self.n_local,
                self.n_ghost
            )));
        }
        if self.sections.is_empty() {
            return Ok(());
        }
        let peers: Vec<usize> = self.sections.iter().map(|s| s.rank).collect();
        let send: Vec<Vec<f64>> = self
            .sections
            .iter()
            .map(|s| {
                let mut buf = Vec::with_capacity((s.send_std.len() + s.send_ext.len()) * stride);
                for &i in &s.send_std {
                    buf.extend_from_slice(&x[i * stride..(i + 1) * stride]);
                }
                if mode == HaloMode::Extended {
                    for &i in &s.send_ext {
                        buf.extend_from_slice(&x[i * stride..(i + 1) * stride]);
                    }
                }
                buf
            })
            .collect();
        let recv_lens: Vec<usize> = self
            .sections
            .iter()
            .map(|s| {
                let n = s.recv_std_count
                    + if mode == HaloMode::Extended {
                        s.recv_ext_count
                    } else {
                        0
                    };
                n * stride
            })
            .collect();
        let recv = comm.exchange_f64(&peers, &send, &recv_lens);
        for (s, buf) in self.sections.iter().zip(recv.into_iter()) {
            let mut buf = buf;
            if rotate {
                if let Some(t) = s.transform {
                    self.periodicities[t.periodicity].apply_vector(t.inverse, &mut buf);
                }
            }
            let dst_std = self.n_local + s.recv_std_start;
            for k in 0..s.recv_std_count {
                x[(dst_std + k) * stride..(dst_std + k + 1) * stride]
                    .copy_from_slice(&buf[k * stride..(k + 1) * stride]);
            }
            if mode == HaloMode::Extended {
                let dst_ext = self.n_local + s.recv_ext_start;
                for k in 0..s.recv_ext_count {
                    let src = (s.recv_std_count + k) * stride;
                    x[(dst_ext + k) * stride..(dst_ext + k + 1) * stride]
                        .copy_from_slice(&buf[src..src + stride]);
                }
            }
        }
        Ok(())
    }
}

impl Halo {
    /// Reverse exchange: ghost values travel back to the cells they mirror
    /// and are added there. Used by transpose matrix-vector products, where
    /// local rows accumulate into ghost columns.
    pub fn reverse_sum(
        &self,
        comm: &dyn CommBackend,
        mode: HaloMode,
        stride: usize,
        x: &mut [f64],
    ) -> Result<()> {
        if stride == 0 || x.len() != (self.n_local + self.n_ghost) * stride {
            return Err(FvError::Usage(format!(
                "halo reverse length mismatch: got {}, expected ({} + {}) x {stride}",
                x.len(),
                self.n_local,
                self.n_ghost
            )));
        }
        if self.sections.is_empty() {
            return Ok(());
        }
        let peers: Vec<usize> = self.sections.iter().map(|s| s.rank).collect();
        let send: Vec<Vec<f64>> = self
            .sections
            .iter()
            .map(|s| {
                let mut buf = Vec::new();
                let std0 = self.n_local + s.recv_std_start;
                for k in 0..s.recv_std_count {
                    buf.extend_from_slice(&x[(std0 + k) * stride..(std0 + k + 1) * stride]);
                }
                if mode == HaloMode::Extended {
                    let ext0 = self.n_local + s.recv_ext_start;
                    for k in 0..s.recv_ext_count {
                        buf.extend_from_slice(&x[(ext0 + k) * stride..(ext0 + k + 1) * stride]);
                    }
                }
                buf
            })
            .collect();
        let recv_lens: Vec<usize> = self
            .sections
            .iter()
            .map(|s| {
                let n = s.send_std.len()
                    + if mode == HaloMode::Extended {
                        s.send_ext.len()
                    } else {
                        0
                    };
                n * stride
            })
            .collect();
        let recv = comm.exchange_f64(&peers, &send, &recv_lens);
        for (s, buf) in self.sections.iter().zip(recv.into_iter()) {
            for (k, &i) in s.send_std.iter().enumerate() {
                for c in 0..stride {
                    x[i * stride + c] += buf[k * stride + c];
                }
            }
            if mode == HaloMode::Extended {
                let base = s.send_std.len();
                for (k, &i) in s.send_ext.iter().enumerate() {
                    for c in 0..stride {
                        x[i * stride + c] += buf[(base + k) * stride + c];
                    }
                }
            }
        }
        Ok(())
    }
}
