//! Face-based ("native") storage: one diagonal block per cell and one or
//! two coefficients per interior face, as produced directly by a
//! finite-volume discretization before any CSR conversion.

use super::MatrixShape;
use crate::error::{FvError, Result};

#[derive(Debug, Clone)]
pub struct NativeCoeffs {
    /// Adjacency: face f couples cells `face_cell[f][0]` and
    /// `face_cell[f][1]` (local ids, ghosts allowed).
    pub face_cell: Vec<[usize; 2]>,
    /// Cell diagonal, `n_rows` blocks of `db x db`.
    pub da: Vec<f64>,
    /// Face coefficients. Symmetric: one `eb x eb` block per face.
    /// Non-symmetric: two per face, `xa[2f]` applying cell1 -> cell0 and
    /// `xa[2f+1]` applying cell0 -> cell1.
    pub xa: Vec<f64>,
    pub symmetric: bool,
}

impl NativeCoeffs {
    pub fn check(&self, shape: &MatrixShape) -> Result<()> {
        let bs = shape.eb * shape.eb;
        let per_face = if self.symmetric { 1 } else { 2 };
        if self.da.len() != shape.n_rows * shape.db * shape.db
            || self.xa.len() != self.face_cell.len() * per_face * bs
        {
            return Err(FvError::Usage("native coefficient length mismatch".into()));
        }
        if self.face_cell.iter().any(|fc| fc[0] >= shape.n_cols || fc[1] >= shape.n_cols) {
            return Err(FvError::Usage("face adjacency out of range".into()));
        }
        Ok(())
    }

    /// y = beta y + alpha A x. `transpose` swaps the two face coefficients,
    /// which for symmetric storage is the identity.
    pub fn spmv(
        &self,
        shape: &MatrixShape,
        alpha: f64,
        x: &[f64],
        beta: f64,
        y: &mut [f64],
        transpose: bool,
    ) {
        let db = shape.db;
        let eb = shape.eb;
        let n_rows = shape.n_rows;
        // diagonal term
        for r in 0..n_rows {
            let d = &self.da[r * db * db..(r + 1) * db * db];
            let xr = &x[r * db..(r + 1) * db];
            for i in 0..db {
                let mut s = 0.0;
                for (j, &xj) in xr.iter().enumerate() {
                    s += if transpose { d[j * db + i] } else { d[i * db + j] } * xj;
                }
                y[r * db + i] = beta * y[r * db + i] + alpha * s;
            }
        }
        for k in n_rows * db..y.len() {
            y[k] *= beta;
        }
        // face gather: each face contributes to both adjacent cells
        let bs = eb * eb;
        for (f, fc) in self.face_cell.iter().enumerate() {
            let (c0, c1) = (fc[0], fc[1]);
            let (k01, k10) = if self.symmetric {
                (f * bs, f * bs)
            } else if transpose {
                ((2 * f + 1) * bs, 2 * f * bs)
            } else {
                (2 * f * bs, (2 * f + 1) * bs)
            };
            // row c0 gets xa_01 * x[c1]; row c1 gets xa_10 * x[c0]
            if c0 < n_rows {
                face_acc(db, eb, alpha, &self.xa[k01..k01 + bs], &x[c1 * db..], &mut y[c0 * db..]);
            }
            if c1 < n_rows {
                face_acc(db, eb, alpha, &self.xa[k10..k10 + bs], &x[c0 * db..], &mut y[c1 * db..]);
            }
        }
    }

    /// Transpose product accumulated over all columns (ghosts included),
    /// for the distributed transpose path. `y` must already be scaled.
    pub fn spmv_transpose_acc(&self, shape: &MatrixShape, alpha: f64, x: &[f64], y: &mut [f64]) {
        let db = shape.db;
        let eb = shape.eb;
        let n_rows = shape.n_rows;
        let bs = eb * eb;
        for r in 0..n_rows {
            let d = &self.da[r * db * db..(r + 1) * db * db];
            let xr = &x[r * db..(r + 1) * db];
            for i in 0..db {
                let mut s = 0.0;
                for (j, &xj) in xr.iter().enumerate() {
                    s += d[j * db + i] * xj;
                }
                y[r * db + i] += alpha * s;
            }
        }
        for (f, fc) in self.face_cell.iter().enumerate() {
            let (c0, c1) = (fc[0], fc[1]);
            let (k01, k10) = if self.symmetric {
                (f * bs, f * bs)
            } else {
                (2 * f * bs, (2 * f + 1) * bs)
            };
            // column c1 accumulates xa_01^T * x[c0], column c0 xa_10^T * x[c1]
            if c0 < n_rows {
                face_acc_t(db, eb, alpha, &self.xa[k01..k01 + bs], &x[c0 * db..], &mut y[c1 * db..]);
            }
            if c1 < n_rows {
                face_acc_t(db, eb, alpha, &self.xa[k10..k10 + bs], &x[c1 * db..], &mut y[c0 * db..]);
            }
        }
    }
}

#[inline]
fn face_acc(db: usize, eb: usize, alpha: f64, blk: &[f64], x: &[f64], y: &mut [f64]) {
    if eb == 1 {
        let v = alpha * blk[0];
        for i in 0..db {
            y[i] += v * x[i];
        }
    } else {
        for i in 0..db {
            let mut s = 0.0;
            for j in 0..db {
                s += blk[i * eb + j] * x[j];
            }
            y[i] += alpha * s;
        }
    }
}

#[inline]
fn face_acc_t(db: usize, eb: usize, alpha: f64, blk: &[f64], x: &[f64], y: &mut [f64]) {
    if eb == 1 {
        let v = alpha * blk[0];
        for i in 0..db {
            y[i] += v * x[i];
        }
    } else {
        for i in 0..db {
            let mut s = 0.0;
            for j in 0..db {
                s += blk[j * eb + i] * x[j];
            }
            y[i] += alpha * s;
        }
    }
}
