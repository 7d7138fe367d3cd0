//! Matrix storage back-ends and their matrix-vector products.
//!
//! A [`Matrix`] pairs an immutable shape with one of three coefficient
//! layouts behind a closed enum. Solvers only ever call the common
//! operations; the back-end choice is made once at construction, by
//! default from `CORE_MATRIX_BACKEND`.

pub mod block;
mod dist;
mod msr;
mod native;

pub use dist::DistCoeffs;
pub use msr::MsrCoeffs;
pub use native::NativeCoeffs;

use crate::comm::CommBackend;
use crate::error::{FvError, Result};
use crate::halo::{Halo, HaloMode};
use std::sync::Arc;

/// Largest supported diagonal block dimension.
pub const MAX_DB: usize = 8;

/// Storage back-end selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Msr,
    Dist,
    Native,
}

/// Immutable structural description of a matrix.
///
/// `n_rows` counts owned rows; `n_cols` counts owned plus ghost columns.
/// `db` is the diagonal block dimension, `eb` the off-diagonal block
/// dimension, restricted to 1 (scalar coupling broadcast over the block)
/// or `db`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatrixShape {
    pub n_rows: usize,
    pub n_cols: usize,
    pub db: usize,
    pub eb: usize,
}

impl MatrixShape {
    pub fn scalar(n_rows: usize, n_cols: usize) -> Self {
        Self {
            n_rows,
            n_cols,
            db: 1,
            eb: 1,
        }
    }

    fn check(&self) -> Result<()> {
        if self.db == 0 || self.db > MAX_DB {
            return Err(FvError::Usage(format!(
                "diagonal block size {} out of range 1..={MAX_DB}",
                self.db
            )));
        }
        if self.eb != 1 && self.eb != self.db {
            return Err(FvError::Usage(format!(
                "off-diagonal block size {} must be 1 or {}",
                self.eb, self.db
            )));
        }
        if self.n_cols < self.n_rows {
            return Err(FvError::Usage("n_cols smaller than n_rows".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
enum MatrixStore {
    Msr(MsrCoeffs),
    Dist(DistCoeffs),
    Native(NativeCoeffs),
}

/// A distributed sparse matrix.
#[derive(Debug, Clone)]
pub struct Matrix {
    shape: MatrixShape,
    store: MatrixStore,
    halo: Option<Arc<Halo>>,
}

impl Matrix {
    /// Build an MSR matrix, optionally converting to the requested back-end.
    pub fn from_msr(
        kind: BackendKind,
        shape: MatrixShape,
        coeffs: MsrCoeffs,
        halo: Option<Arc<Halo>>,
    ) -> Result<Self> {
        shape.check()?;
        check_halo(&shape, halo.as_deref())?;
        coeffs.check(&shape)?;
        let store = match kind {
            BackendKind::Msr => MatrixStore::Msr(coeffs),
            BackendKind::Dist => MatrixStore::Dist(DistCoeffs::from_msr(&shape, &coeffs)?),
            BackendKind::Native => {
                return Err(FvError::Usage(
                    "native back-end requires face-based coefficients".into(),
                ))
            }
        };
        Ok(Self { shape, store, halo })
    }

    /// Build a face-based matrix straight from discretization arrays.
    pub fn from_native(
        shape: MatrixShape,
        coeffs: NativeCoeffs,
        halo: Option<Arc<Halo>>,
    ) -> Result<Self> {
        shape.check()?;
        check_halo(&shape, halo.as_deref())?;
        coeffs.check(&shape)?;
        Ok(Self {
            shape,
            store: MatrixStore::Native(coeffs),
            halo,
        })
    }

    pub fn shape(&self) -> &MatrixShape {
        &self.shape
    }

    pub fn n_rows(&self) -> usize {
        self.shape.n_rows
    }

    pub fn n_cols(&self) -> usize {
        self.shape.n_cols
    }

    pub fn db(&self) -> usize {
        self.shape.db
    }

    pub fn eb(&self) -> usize {
        self.shape.eb
    }

    pub fn kind(&self) -> BackendKind {
        match self.store {
            MatrixStore::Msr(_) => BackendKind::Msr,
            MatrixStore::Dist(_) => BackendKind::Dist,
            MatrixStore::Native(_) => BackendKind::Native,
        }
    }

    pub fn halo(&self) -> Option<&Arc<Halo>> {
        self.halo.as_ref()
    }

    /// The MSR coefficients, when this matrix uses the MSR back-end.
    pub fn msr(&self) -> Option<&MsrCoeffs> {
        match &self.store {
            MatrixStore::Msr(m) => Some(m),
            _ => None,
        }
    }

    pub(crate) fn msr_mut(&mut self) -> Option<&mut MsrCoeffs> {
        match &mut self.store {
            MatrixStore::Msr(m) => Some(m),
            _ => None,
        }
    }

    fn check_vectors(&self, x_len: usize, y_len: usize) -> Result<()> {
        let need_x = self.shape.n_cols * self.shape.db;
        if x_len != need_x || y_len < self.shape.n_rows * self.shape.db {
            return Err(FvError::Usage(format!(
                "mat_vec length mismatch: x {x_len} (need {need_x}), y {y_len}"
            )));
        }
        Ok(())
    }

    /// y = A x. Ghost entries of `x` are refreshed first.
    pub fn mat_vec(&self, comm: &dyn CommBackend, x: &mut [f64], y: &mut [f64]) -> Result<()> {
        self.mat_vec_add(comm, 1.0, x, 0.0, y)
    }

    /// y = beta y + alpha A x.
    pub fn mat_vec_add(
        &self,
        comm: &dyn CommBackend,
        alpha: f64,
        x: &mut [f64],
        beta: f64,
        y: &mut [f64],
    ) -> Result<()> {
        self.check_vectors(x.len(), y.len())?;
        match &self.store {
            MatrixStore::Msr(m) => {
                self.sync_ghosts(comm, x)?;
                m.spmv_rows(&self.shape, 0..self.shape.n_rows, alpha, x, beta, y);
            }
            MatrixStore::Dist(d) => {
                // local product first, halo contribution after the refresh
                d.spmv_local(&self.shape, alpha, x, beta, y);
                self.sync_ghosts(comm, x)?;
                d.spmv_halo(&self.shape, alpha, x, y);
            }
            MatrixStore::Native(n) => {
                self.sync_ghosts(comm, x)?;
                n.spmv(&self.shape, alpha, x, beta, y, false);
            }
        }
        Ok(())
    }

    /// y = A^T x. `y` spans owned plus ghost rows; accumulated ghost
    /// contributions are returned to their owners and the ghost tail is
    /// zeroed on exit.
    pub fn mat_vec_transpose(
        &self,
        comm: &dyn CommBackend,
        x: &mut [f64],
        y: &mut [f64],
    ) -> Result<()> {
        let db = self.shape.db;
        if x.len() != self.shape.n_cols * db || y.len() != self.shape.n_cols * db {
            return Err(FvError::Usage("mat_vec_transpose length mismatch".into()));
        }
        self.sync_ghosts(comm, x)?;
        y.fill(0.0);
        match &self.store {
            MatrixStore::Msr(m) => m.spmv_transpose_acc(&self.shape, 1.0, x, y),
            MatrixStore::Dist(d) => {
                d.local.spmv_transpose_acc(&self.shape, 1.0, x, y);
                d.spmv_halo_transpose_acc(&self.shape, 1.0, x, y);
            }
            MatrixStore::Native(n) => n.spmv_transpose_acc(&self.shape, 1.0, x, y),
        }
        if let Some(h) = &self.halo {
            h.reverse_sum(comm, HaloMode::Standard, db, y)?;
        }
        y[self.shape.n_rows * db..].fill(0.0);
        Ok(())
    }

    /// Copy the block diagonal into `out` (`n_rows * db * db` values).
    pub fn copy_diagonal(&self, out: &mut [f64]) -> Result<()> {
        let need = self.shape.n_rows * self.shape.db * self.shape.db;
        if out.len() != need {
            return Err(FvError::Usage("copy_diagonal length mismatch".into()));
        }
        match &self.store {
            MatrixStore::Msr(m) => out.copy_from_slice(&m.diag),
            MatrixStore::Dist(d) => out.copy_from_slice(&d.local.diag),
            MatrixStore::Native(n) => out.copy_from_slice(&n.da),
        }
        Ok(())
    }

    /// Invert the block diagonal, returning the inverse blocks and the
    /// worst per-block condition estimate. Allocated once per solver setup
    /// and shared down to preconditioners by reference.
    pub fn inverse_diagonal(&self) -> Result<(Vec<f64>, f64)> {
        let mut diag = vec![0.0; self.shape.n_rows * self.shape.db * self.shape.db];
        self.copy_diagonal(&mut diag)?;
        block::invert_block_diag(self.shape.db, &diag)
    }

    /// One Gauss-Seidel sweep with immediate updates over rank-local rows:
    /// x_r <- D_r^-1 (b_r - sum_{c != r} A_rc x_c). Ghost values of `x` are
    /// refreshed once at sweep start, so the result is rank-count dependent.
    pub fn gs_sweep(
        &self,
        comm: &dyn CommBackend,
        b: &[f64],
        x: &mut [f64],
        inv_diag: &[f64],
        reverse: bool,
    ) -> Result<()> {
        self.check_vectors(x.len(), b.len())?;
        self.sync_ghosts(comm, x)?;
        let (local, halo) = match &self.store {
            MatrixStore::Msr(m) => (m, None),
            MatrixStore::Dist(d) => (&d.local, Some(&d.halo)),
            MatrixStore::Native(_) => {
                return Err(FvError::Usage(
                    "Gauss-Seidel needs a row-ordered back-end (msr or dist)".into(),
                ))
            }
        };
        let db = self.shape.db;
        let eb = self.shape.eb;
        let n = self.shape.n_rows;
        let mut rhs = [0.0f64; MAX_DB];
        let row_order: Box<dyn Iterator<Item = usize>> = if reverse {
            Box::new((0..n).rev())
        } else {
            Box::new(0..n)
        };
        for r in row_order {
            rhs[..db].copy_from_slice(&b[r * db..(r + 1) * db]);
            for section in std::iter::once(local).chain(halo.into_iter()) {
                for idx in section.row_index[r]..section.row_index[r + 1] {
                    let c = section.col_id[idx];
                    let xc = &x[c * db..(c + 1) * db];
                    if eb == 1 {
                        let v = section.xval[idx];
                        for i in 0..db {
                            rhs[i] -= v * xc[i];
                        }
                    } else {
                        let blk = &section.xval[idx * eb * eb..(idx + 1) * eb * eb];
                        for i in 0..db {
                            let mut s = 0.0;
                            for j in 0..db {
                                s += blk[i * eb + j] * xc[j];
                            }
                            rhs[i] -= s;
                        }
                    }
                }
            }
            let dinv = &inv_diag[r * db * db..(r + 1) * db * db];
            for i in 0..db {
                let mut s = 0.0;
                for j in 0..db {
                    s += dinv[i * db + j] * rhs[j];
                }
                x[r * db + i] = s;
            }
        }
        Ok(())
    }

    fn sync_ghosts(&self, comm: &dyn CommBackend, x: &mut [f64]) -> Result<()> {
        if let Some(h) = &self.halo {
            h.sync(comm, HaloMode::Standard, self.shape.db, x)?;
        }
        Ok(())
    }
}

fn check_halo(shape: &MatrixShape, halo: Option<&Halo>) -> Result<()> {
    let n_ghost = halo.map_or(0, |h| h.n_ghost());
    let n_local = halo.map_or(shape.n_rows, |h| h.n_local());
    if n_local != shape.n_rows || shape.n_cols != shape.n_rows + n_ghost {
        return Err(FvError::Parallel(format!(
            "halo does not match matrix shape: {} local + {} ghost vs {} x {}",
            n_local, n_ghost, shape.n_rows, shape.n_cols
        )));
    }
    Ok(())
}
