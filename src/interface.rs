//! Interface sets: per-peer bookkeeping of shared entities.
//!
//! An interface names a peer rank and carries two equal-length lists of
//! local indices, aligned with the matching lists on the peer side: values
//! at `send_ids` travel to the peer, values arriving from the peer land at
//! `recv_ids`. For plain (non-periodic) interfaces the two lists are
//! identical, since a shared entity both contributes and receives during an
//! additive exchange. Periodic interfaces additionally reference a transform
//! so vector components can be rotated in flight.
//!
//! Construction uses a rendezvous through a block partition of the gid
//! space: every rank routes its (gid, local-id) pairs to the block owner,
//! the owner emits cross-product edges for each gid held by two or more
//! ranks, and the edges travel back to their origin ranks where they are
//! grouped by (peer, transform) and sorted in a canonical order agreed with
//! the peer.

use crate::block_dist::BlockDist;
use crate::comm::CommBackend;
use crate::error::{FvError, Result};

/// A periodic transform: translation or rotation. Translations leave field
/// values unchanged; rotations act on each 3-component block of a vector
/// field.
#[derive(Debug, Clone)]
pub enum Periodicity {
    Translation([f64; 3]),
    Rotation([[f64; 3]; 3]),
}

impl Periodicity {
    /// Apply the transform (or its inverse) to a vector field buffer of
    /// stride-3 blocks, in place. Scalars are unaffected by periodicity and
    /// never routed through here.
    pub fn apply_vector(&self, inverse: bool, buf: &mut [f64]) {
        let m = match self {
            Periodicity::Translation(_) => return,
            Periodicity::Rotation(m) => m,
        };
        debug_assert_eq!(buf.len() % 3, 0);
        for block in buf.chunks_exact_mut(3) {
            let v = [block[0], block[1], block[2]];
            for r in 0..3 {
                // The inverse of a rotation matrix is its transpose.
                block[r] = if inverse {
                    m[0][r] * v[0] + m[1][r] * v[1] + m[2][r] * v[2]
                } else {
                    m[r][0] * v[0] + m[r][1] * v[1] + m[r][2] * v[2]
                };
            }
        }
    }
}

/// Reference to a periodic transform, with direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransformRef {
    pub periodicity: usize,
    pub inverse: bool,
}

/// One interface: a peer rank, an optional transform, and the aligned
/// send/receive index lists.
#[derive(Debug, Clone)]
pub struct Interface {
    pub peer: usize,
    pub transform: Option<TransformRef>,
    pub send_ids: Vec<usize>,
    pub recv_ids: Vec<usize>,
}

/// An ordered collection of interfaces over one rank's local index space.
pub struct InterfaceSet {
    n_local: usize,
    rank: usize,
    interfaces: Vec<Interface>,
    periodicities: Vec<Periodicity>,
}

/// A periodic couple declared by the application: `image_local` is the
/// periodic image, under transform `transform`, of the entity with global
/// id `base_gid` (which may live on any rank).
#[derive(Debug, Clone, Copy)]
pub struct PeriodicCouple {
    pub image_local: usize,
    pub base_gid: u64,
    pub transform: usize,
}

// Rendezvous record widths (flat u64 encoding for the all-to-all).
const REQ_W: usize = 5; // [gid, origin_rank, origin_local, kind(0/1+transform), image_gid]
const EDGE_W: usize = 6; // [local, peer, key1, key2, transform_code, direction]

const DIR_BOTH: u64 = 0;
const DIR_SEND: u64 = 1;
const DIR_RECV: u64 = 2;

fn transform_code(t: usize, inverse: bool) -> u64 {
    1 + 2 * t as u64 + inverse as u64
}

fn decode_transform(code: u64) -> Option<TransformRef> {
    if code == 0 {
        None
    } else {
        Some(TransformRef {
            periodicity: ((code - 1) / 2) as usize,
            inverse: (code - 1) % 2 == 1,
        })
    }
}

impl InterfaceSet {
    /// Build the interface set for `gids` (one gid per local index), without
    /// periodicity. Collective over `comm`.
    pub fn new(comm: &dyn CommBackend, gids: &[u64]) -> Result<Self> {
        Self::with_periodicity(comm, gids, Vec::new(), &[])
    }

    /// Build the interface set with periodic couples. Each couple adds a
    /// forward interface (base sends to image under the transform) and a
    /// reverse one (image sends to base under the inverse transform).
    pub fn with_periodicity(
        comm: &dyn CommBackend,
        gids: &[u64],
        periodicities: Vec<Periodicity>,
        couples: &[PeriodicCouple],
    ) -> Result<Self> {
        let rank = comm.rank() as u64;
        let n_ranks = comm.size();

        for c in couples {
            if c.transform >= periodicities.len() {
                return Err(FvError::Usage(format!(
                    "periodic couple references transform {} of {}",
                    c.transform,
                    periodicities.len()
                )));
            }
            if c.image_local >= gids.len() {
                return Err(FvError::Usage(format!(
                    "periodic couple references local index {} of {}",
                    c.image_local,
                    gids.len()
                )));
            }
        }

        let local_max = gids.iter().copied().max().map_or(0, |g| g + 1);
        let base_max = couples.iter().map(|c| c.base_gid + 1).max().unwrap_or(0);
        let n_global = comm.all_reduce_max_u64(local_max.max(base_max));
        if n_global == 0 {
            return Ok(Self {
                n_local: 0,
                rank: rank as usize,
                interfaces: Vec::new(),
                periodicities,
            });
        }
        let dist = BlockDist::new(comm, n_global, 1, 1);

        // Stage A: route (gid, holder) records and couple requests to the
        // block owner of the gid.
        let mut send_counts = vec![0usize; n_ranks];
        for &g in gids {
            send_counts[dist.owner_rank(g)] += REQ_W;
        }
        for c in couples {
            send_counts[dist.owner_rank(c.base_gid)] += REQ_W;
        }
        let mut offsets = vec![0usize; n_ranks];
        for r in 1..n_ranks {
            offsets[r] = offsets[r - 1] + send_counts[r - 1];
        }
        let mut send = vec![0u64; send_counts.iter().sum()];
        let mut cursor = offsets;
        for (i, &g) in gids.iter().enumerate() {
            let r = dist.owner_rank(g);
            send[cursor[r]..cursor[r] + REQ_W]
                .copy_from_slice(&[g, rank, i as u64, 0, 0]);
            cursor[r] += REQ_W;
        }
        for c in couples {
            let r = dist.owner_rank(c.base_gid);
            send[cursor[r]..cursor[r] + REQ_W].copy_from_slice(&[
                c.base_gid,
                rank,
                c.image_local as u64,
                1 + c.transform as u64,
                gids[c.image_local],
            ]);
            cursor[r] += REQ_W;
        }
        let recv_counts = comm.all_to_all_counts(&send_counts);
        let recv = comm.all_to_all_v_u64(&send, &send_counts, &recv_counts);

        // Owner side: group records by gid, emit edges.
        let mut records: Vec<&[u64]> = recv.chunks_exact(REQ_W).collect();
        records.sort_by_key(|r| (r[0], r[3], r[1], r[2]));

        let mut edge_counts = vec![0usize; n_ranks];
        let mut edges_per_rank: Vec<Vec<u64>> = vec![Vec::new(); n_ranks];
        let mut push_edge = |to: usize, e: [u64; EDGE_W], counts: &mut [usize]| {
            edges_per_rank[to].extend_from_slice(&e);
            counts[to] += EDGE_W;
        };

        let mut i = 0;
        while i < records.len() {
            let gid = records[i][0];
            let mut j = i;
            while j < records.len() && records[j][0] == gid {
                j += 1;
            }
            let group = &records[i..j];
            let holders: Vec<&[u64]> = group.iter().filter(|r| r[3] == 0).copied().collect();
            // Plain cross-product edges for gids held on >= 2 ranks.
            for a in &holders {
                for b in &holders {
                    if a[1] != b[1] {
                        push_edge(
                            a[1] as usize,
                            [a[2], b[1], gid, gid, 0, DIR_BOTH],
                            &mut edge_counts,
                        );
                    }
                }
            }
            // Periodic couples: every holder of the base gid sends to the
            // image under the transform, and receives from it under the
            // inverse transform.
            for c in group.iter().filter(|r| r[3] > 0) {
                let t = (c[3] - 1) as usize;
                let (img_rank, img_local, img_gid) = (c[1] as usize, c[2], c[4]);
                for h in &holders {
                    let (h_rank, h_local) = (h[1] as usize, h[2]);
                    let fwd = transform_code(t, false);
                    let rev = transform_code(t, true);
                    push_edge(
                        h_rank,
                        [h_local, img_rank as u64, gid, img_gid, fwd, DIR_SEND],
                        &mut edge_counts,
                    );
                    push_edge(
                        img_rank,
                        [img_local, h_rank as u64, gid, img_gid, fwd, DIR_RECV],
                        &mut edge_counts,
                    );
                    push_edge(
                        img_rank,
                        [img_local, h_rank as u64, gid, img_gid, rev, DIR_SEND],
                        &mut edge_counts,
                    );
                    push_edge(
                        h_rank,
                        [h_local, img_rank as u64, gid, img_gid, rev, DIR_RECV],
                        &mut edge_counts,
                    );
                }
            }
            i = j;
        }

        // Stage B: edges travel back to their origin ranks.
        let send: Vec<u64> = edges_per_rank.into_iter().flatten().collect();
        let recv_counts = comm.all_to_all_counts(&edge_counts);
        let edges = comm.all_to_all_v_u64(&send, &edge_counts, &recv_counts);

        // Group by (peer, transform), sort canonically by (key1, key2,
        // direction) so both sides of each interface agree on ordering.
        let mut parsed: Vec<[u64; EDGE_W]> = edges
            .chunks_exact(EDGE_W)
            .map(|c| <[u64; EDGE_W]>::try_from(c).unwrap())
            .collect();
        parsed.sort_by_key(|e| (e[1], e[4], e[2], e[3], e[5]));

        let mut interfaces: Vec<Interface> = Vec::new();
        for e in &parsed {
            let peer = e[1] as usize;
            let transform = decode_transform(e[4]);
            let need_new = match interfaces.last() {
                Some(itf) => itf.peer != peer || itf.transform != transform,
                None => true,
            };
            if need_new {
                interfaces.push(Interface {
                    peer,
                    transform,
                    send_ids: Vec::new(),
                    recv_ids: Vec::new(),
                });
            }
            let itf = interfaces.last_mut().unwrap();
            match e[5] {
                DIR_BOTH => {
                    itf.send_ids.push(e[0] as usize);
                    itf.recv_ids.push(e[0] as usize);
                }
                DIR_SEND => itf.send_ids.push(e[0] as usize),
                DIR_RECV => itf.recv_ids.push(e[0] as usize),
                _ => unreachable!(),
            }
        }

        Ok(Self {
            n_local: gids.len(),
            rank: rank as usize,
            interfaces,
            periodicities,
        })
    }

    pub fn n_local(&self) -> usize {
        self.n_local
    }

    pub fn interfaces(&self) -> &[Interface] {
        &self.interfaces
    }

    pub fn periodicities(&self) -> &[Periodicity] {
        &self.periodicities
    }

    /// Owner rank per local index: the lowest rank among all holders, self
    /// included. Periodic images are never owners of their base entity; a
    /// recv-only entry under a transform marks the image as non-owned.
    pub fn owner_ranks(&self) -> Vec<usize> {
        let mut owner = vec![self.rank; self.n_local];
        for itf in &self.interfaces {
            match itf.transform {
                None => {
                    for &i in &itf.send_ids {
                        owner[i] = owner[i].min(itf.peer);
                    }
                }
                Some(t) if !t.inverse => {
                    // Forward transform: recv side is the periodic image.
                    for &i in &itf.recv_ids {
                        owner[i] = usize::MAX;
                    }
                }
                Some(_) => {}
            }
        }
        owner
    }

    /// Additive exchange: every shared entity accumulates the contributions
    /// of all of its holders, `x[i] += sum over peers of x_peer[i]`.
    /// Periodic contributions are included; scalar and component-wise
    /// quantities are invariant under the transforms.
    pub fn sum(&self, comm: &dyn CommBackend, stride: usize, x: &mut [f64]) -> Result<()> {
        self.sum_impl(comm, stride, x, false)
    }

    /// Additive exchange of a vector field (stride 3), rotating periodic
    /// contributions into the receiving frame before accumulation.
    pub fn sum_vector(&self, comm: &dyn CommBackend, x: &mut [f64]) -> Result<()> {
        self.sum_impl(comm, 3, x, true)
    }

    fn sum_impl(
        &self,
        comm: &dyn CommBackend,
        stride: usize,
        x: &mut [f64],
        rotate: bool,
    ) -> Result<()> {
        self.check_len(stride, x.len())?;
        let peers: Vec<usize> = self.interfaces.iter().map(|i| i.peer).collect();
        let send: Vec<Vec<f64>> = self
            .interfaces
            .iter()
            .map(|itf| gather_ids(x, &itf.send_ids, stride))
            .collect();
        let recv_lens: Vec<usize> = self
            .interfaces
            .iter()
            .map(|i| i.recv_ids.len() * stride)
            .collect();
        let recv = comm.exchange_f64(&peers, &send, &recv_lens);
        for (itf, mut buf) in self.interfaces.iter().zip(recv.into_iter()) {
            if rotate {
                if let Some(t) = itf.transform {
                    self.periodicities[t.periodicity].apply_vector(t.inverse, &mut buf);
                }
            }
            for (k, &i) in itf.recv_ids.iter().enumerate() {
                for s in 0..stride {
                    x[i * stride + s] += buf[k * stride + s];
                }
            }
        }
        Ok(())
    }

    /// Exchange in which owners broadcast and non-owners overwrite: for each
    /// local index, the value of its owner rank wins. Used by range-set
    /// scatter. `rotate` applies periodic rotations to stride-3 blocks.
    pub(crate) fn broadcast_owned(
        &self,
        comm: &dyn CommBackend,
        stride: usize,
        x: &mut [f64],
        rotate: bool,
    ) -> Result<()> {
        self.check_len(stride, x.len())?;
        let owner = self.owner_ranks();
        let peers: Vec<usize> = self.interfaces.iter().map(|i| i.peer).collect();
        let send: Vec<Vec<f64>> = self
            .interfaces
            .iter()
            .map(|itf| gather_ids(x, &itf.send_ids, stride))
            .collect();
        let recv_lens: Vec<usize> = self
            .interfaces
            .iter()
            .map(|i| i.recv_ids.len() * stride)
            .collect();
        let recv = comm.exchange_f64(&peers, &send, &recv_lens);
        for (itf, buf) in self.interfaces.iter().zip(recv.into_iter()) {
            let mut buf = buf;
            if let Some(t) = itf.transform {
                if rotate {
                    self.periodicities[t.periodicity].apply_vector(t.inverse, &mut buf);
                }
                // Forward-transform receives refresh periodic images.
                if !t.inverse {
                    for (k, &i) in itf.recv_ids.iter().enumerate() {
                        x[i * stride..(i + 1) * stride]
                            .copy_from_slice(&buf[k * stride..(k + 1) * stride]);
                    }
                }
                continue;
            }
            for (k, &i) in itf.recv_ids.iter().enumerate() {
                if owner[i] == itf.peer {
                    x[i * stride..(i + 1) * stride]
                        .copy_from_slice(&buf[k * stride..(k + 1) * stride]);
                }
            }
        }
        Ok(())
    }

    fn check_len(&self, stride: usize, len: usize) -> Result<()> {
        if stride == 0 || len != self.n_local * stride {
            return Err(FvError::Usage(format!(
                "interface exchange length mismatch: got {len}, expected {} x {stride}",
                self.n_local
            )));
        }
        Ok(())
    }
}

fn gather_ids(x: &[f64], ids: &[usize], stride: usize) -> Vec<f64> {
    let mut out = Vec::with_capacity(ids.len() * stride);
    for &i in ids {
        out.extend_from_slice(&x[i * stride..(i + 1) * stride]);
    }
    out
}
