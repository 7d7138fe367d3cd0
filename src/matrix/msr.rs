//! MSR storage: dense block diagonal plus CSR off-diagonal.

use super::MatrixShape;
use crate::error::{FvError, Result};
use rayon::prelude::*;

/// Coefficients in modified sparse row form. The diagonal is stored apart,
/// as `n_rows` dense `db x db` blocks; off-diagonal entries live in a CSR
/// with strictly increasing local column ids per row. Column ids at or past
/// `n_rows` address ghost cells.
#[derive(Debug, Clone)]
pub struct MsrCoeffs {
    pub row_index: Vec<usize>,
    pub col_id: Vec<usize>,
    pub diag: Vec<f64>,
    pub xval: Vec<f64>,
}

impl MsrCoeffs {
    /// Structural validation against a shape. Cheap enough to run at every
    /// matrix construction.
    pub fn check(&self, shape: &MatrixShape) -> Result<()> {
        let n = shape.n_rows;
        if self.row_index.len() != n + 1 || self.row_index[0] != 0 {
            return Err(FvError::Usage("malformed MSR row index".into()));
        }
        let nnz = self.row_index[n];
        if self.col_id.len() != nnz
            || self.diag.len() != n * shape.db * shape.db
            || self.xval.len() != nnz * shape.eb * shape.eb
        {
            return Err(FvError::Usage("MSR coefficient length mismatch".into()));
        }
        for r in 0..n {
            let (s, e) = (self.row_index[r], self.row_index[r + 1]);
            if e < s {
                return Err(FvError::Usage("MSR row index not monotone".into()));
            }
            for k in s..e {
                if self.col_id[k] >= shape.n_cols || (k > s && self.col_id[k] <= self.col_id[k - 1])
                {
                    return Err(FvError::Usage(format!(
                        "MSR row {r} has out-of-range or unsorted column ids"
                    )));
                }
            }
        }
        Ok(())
    }

    /// y_r = beta * y_r + alpha * (D_r x_r + sum_j X_rj x_j) for rows in
    /// `rows`, using the given block sizes.
    pub fn spmv_rows(
        &self,
        shape: &MatrixShape,
        rows: std::ops::Range<usize>,
        alpha: f64,
        x: &[f64],
        beta: f64,
        y: &mut [f64],
    ) {
        let db = shape.db;
        let eb = shape.eb;
        let row0 = rows.start;
        y[row0 * db..rows.end * db]
            .par_chunks_mut(db)
            .enumerate()
            .for_each(|(k, yr)| {
                let r = row0 + k;
                let mut acc = [0.0f64; super::MAX_DB];
                let d = &self.diag[r * db * db..(r + 1) * db * db];
                let xr = &x[r * db..(r + 1) * db];
                for i in 0..db {
                    let mut s = 0.0;
                    for j in 0..db {
                        s += d[i * db + j] * xr[j];
                    }
                    acc[i] = s;
                }
                for idx in self.row_index[r]..self.row_index[r + 1] {
                    let c = self.col_id[idx];
                    let xc = &x[c * db..(c + 1) * db];
                    if eb == 1 {
                        let v = self.xval[idx];
                        for i in 0..db {
                            acc[i] += v * xc[i];
                        }
                    } else {
                        let blk = &self.xval[idx * eb * eb..(idx + 1) * eb * eb];
                        for i in 0..db {
                            let mut s = 0.0;
                            for j in 0..db {
                                s += blk[i * eb + j] * xc[j];
                            }
                            acc[i] += s;
                        }
                    }
                }
                for i in 0..db {
                    yr[i] = beta * yr[i] + alpha * acc[i];
                }
            });
    }

    /// Transpose product accumulated into `y` (length `n_cols * db`,
    /// ghost part included). Caller zeroes or pre-scales `y`.
    pub fn spmv_transpose_acc(&self, shape: &MatrixShape, alpha: f64, x: &[f64], y: &mut [f64]) {
        let db = shape.db;
        let eb = shape.eb;
        for r in 0..shape.n_rows {
            let d = &self.diag[r * db * db..(r + 1) * db * db];
            let xr = &x[r * db..(r + 1) * db];
            // transpose of the diagonal block stays on the row
            for i in 0..db {
                let mut s = 0.0;
                for j in 0..db {
                    s += d[j * db + i] * xr[j];
                }
                y[r * db + i] += alpha * s;
            }
            for idx in self.row_index[r]..self.row_index[r + 1] {
                let c = self.col_id[idx];
                if eb == 1 {
                    let v = self.xval[idx];
                    for i in 0..db {
                        y[c * db + i] += alpha * v * xr[i];
                    }
                } else {
                    let blk = &self.xval[idx * eb * eb..(idx + 1) * eb * eb];
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

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn shape(n: usize, db: usize, eb: usize) -> MatrixShape {
        MatrixShape {
            n_rows: n,
            n_cols: n,
            db,
            eb,
        }
    }

    #[test]
    fn scalar_spmv() {
        // [2 -1 0; -1 2 -1; 0 -1 2]
        let m = MsrCoeffs {
            row_index: vec![0, 1, 3, 4],
            col_id: vec![1, 0, 2, 1],
            diag: vec![2.0, 2.0, 2.0],
            xval: vec![-1.0, -1.0, -1.0, -1.0],
        };
        let sh = shape(3, 1, 1);
        m.check(&sh).unwrap();
        let x = [1.0, 2.0, 3.0];
        let mut y = [0.0; 3];
        m.spmv_rows(&sh, 0..3, 1.0, &x, 0.0, &mut y);
        assert_abs_diff_eq!(y[0], 0.0);
        assert_abs_diff_eq!(y[1], 0.0);
        assert_abs_diff_eq!(y[2], 4.0);
    }

    #[test]
    fn block_diag_with_scalar_offdiag() {
        // db = 3, eb = 1: one off-diagonal scalar scales the whole block.
        let m = MsrCoeffs {
            row_index: vec![0, 1, 2],
            col_id: vec![1, 0],
            diag: {
                let mut d = vec![0.0; 18];
                for r in 0..2 {
                    for i in 0..3 {
                        d[r * 9 + i * 3 + i] = 2.0;
                    }
                }
                d
            },
            xval: vec![-1.0, -1.0],
        };
        let sh = shape(2, 3, 1);
        m.check(&sh).unwrap();
        let x = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let mut y = [0.0; 6];
        m.spmv_rows(&sh, 0..2, 1.0, &x, 0.0, &mut y);
        assert_abs_diff_eq!(y[0], 2.0 * 1.0 - 4.0);
        assert_abs_diff_eq!(y[5], 2.0 * 6.0 - 3.0);
    }

    #[test]
    fn transpose_matches_explicit() {
        // Non-symmetric scalar matrix.
        let m = MsrCoeffs {
            row_index: vec![0, 1, 2],
            col_id: vec![1, 0],
            diag: vec![3.0, 4.0],
            xval: vec![5.0, 7.0],
        };
        let sh = shape(2, 1, 1);
        let x = [1.0, 2.0];
        let mut yt = [0.0; 2];
        m.spmv_transpose_acc(&sh, 1.0, &x, &mut yt);
        // A = [3 5; 7 4], A^T x = [3+14, 5+8]
        assert_abs_diff_eq!(yt[0], 17.0);
        assert_abs_diff_eq!(yt[1], 13.0);
    }

    #[test]
    fn unsorted_columns_rejected() {
        let m = MsrCoeffs {
            row_index: vec![0, 2],
            col_id: vec![2, 1],
            diag: vec![1.0],
            xval: vec![1.0, 1.0],
        };
        let sh = MatrixShape {
            n_rows: 1,
            n_cols: 3,
            db: 1,
            eb: 1,
        };
        assert!(m.check(&sh).is_err());
    }
}
