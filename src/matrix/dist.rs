//! MSR split into a local-column section and a halo-column section, so the
//! local product runs before the ghost refresh completes its contribution.

use super::msr::MsrCoeffs;
use super::MatrixShape;
use crate::error::Result;

#[derive(Debug, Clone)]
pub struct DistCoeffs {
    /// Entries whose column is an owned cell.
    pub local: MsrCoeffs,
    /// Entries whose column is a ghost cell; its diagonal array is empty.
    pub halo: MsrCoeffs,
}

impl DistCoeffs {
    /// Split a validated MSR matrix at the owned/ghost column boundary.
    pub fn from_msr(shape: &MatrixShape, msr: &MsrCoeffs) -> Result<Self> {
        msr.check(shape)?;
        let n = shape.n_rows;
        let bs = shape.eb * shape.eb;
        let mut local = MsrCoeffs {
            row_index: Vec::with_capacity(n + 1),
            col_id: Vec::new(),
            diag: msr.diag.clone(),
            xval: Vec::new(),
        };
        let mut halo = MsrCoeffs {
            row_index: Vec::with_capacity(n + 1),
            col_id: Vec::new(),
            diag: Vec::new(),
            xval: Vec::new(),
        };
        local.row_index.push(0);
        halo.row_index.push(0);
        for r in 0..n {
            for idx in msr.row_index[r]..msr.row_index[r + 1] {
                let c = msr.col_id[idx];
                let target = if c < n { &mut local } else { &mut halo };
                target.col_id.push(c);
                target.xval.extend_from_slice(&msr.xval[idx * bs..(idx + 1) * bs]);
            }
            local.row_index.push(local.col_id.len());
            halo.row_index.push(halo.col_id.len());
        }
        Ok(Self { local, halo })
    }

    /// Local-column part: y = beta y + alpha (D x + X_local x).
    pub fn spmv_local(&self, shape: &MatrixShape, alpha: f64, x: &[f64], beta: f64, y: &mut [f64]) {
        self.local.spmv_rows(shape, 0..shape.n_rows, alpha, x, beta, y);
    }

    /// Halo-column part, accumulated after the ghost refresh:
    /// y += alpha X_halo x.
    pub fn spmv_halo(&self, shape: &MatrixShape, alpha: f64, x: &[f64], y: &mut [f64]) {
        let db = shape.db;
        let eb = shape.eb;
        for r in 0..shape.n_rows {
            for idx in self.halo.row_index[r]..self.halo.row_index[r + 1] {
                let c = self.halo.col_id[idx];
                let xc = &x[c * db..(c + 1) * db];
                if eb == 1 {
                    let v = alpha * self.halo.xval[idx];
                    for i in 0..db {
                        y[r * db + i] += v * xc[i];
                    }
                } else {
                    let blk = &self.halo.xval[idx * eb * eb..(idx + 1) * eb * eb];
                    for i in 0..db {
                        let mut s = 0.0;
                        for j in 0..db {
                            s += blk[i * eb + j] * xc[j];
                        }
                        y[r * db + i] += alpha * s;
                    }
                }
            }
        }
    }

    /// Transpose of the halo-column part: ghost columns accumulate from
    /// owned rows, y[c] += alpha X_halo[r,c]^T x[r].
    pub fn spmv_halo_transpose_acc(
        &self,
        shape: &MatrixShape,
        alpha: f64,
        x: &[f64],
        y: &mut [f64],
    ) {
        let db = shape.db;
        let eb = shape.eb;
        for r in 0..shape.n_rows {
            let xr = &x[r * db..(r + 1) * db];
            for idx in self.halo.row_index[r]..self.halo.row_index[r + 1] {
                let c = self.halo.col_id[idx];
                if eb == 1 {
                    let v = alpha * self.halo.xval[idx];
                    for i in 0..db {
                        y[c * db + i] += v * xr[i];
                    }
                } else {
                    let blk = &self.halo.xval[idx * eb * eb..(idx + 1) * eb * eb];
                    for i in 0..db {
                        let mut s = 0.0;
                        for j in 0..db {
                            s += blk[j * eb + i] * xr[j];
                        }
                        y[c * db + i] += alpha * s;
                    }
                }
            }
        }
    }
}
