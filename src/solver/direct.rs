//! Sparse direct solve through faer's LU factorization.
//!
//! Intended for small or desperate systems where the iterative family
//! is not worth setting up. The factorization happens once at solver
//! setup and is held behind an opaque handle; solves are then cheap
//! triangular sweeps. Single-rank only: the matrix must be fully owned.

use super::{ConvergenceState, SolveReport, SolverParams};
use crate::comm::CommBackend;
use crate::error::{FvError, Result};
use crate::matrix::Matrix;
use crate::vector;
use faer::prelude::*;
use faer::sparse::{SparseColMat, Triplet};

pub(super) type SolveFn = Box<dyn Fn(&[f64]) -> Vec<f64> + Send + Sync>;

/// Factor a scalar CSR system and box the solve behind an opaque closure.
pub(super) fn factorize_csr(
    n: usize,
    row_index: &[usize],
    col_id: &[usize],
    values: impl Fn(usize) -> f64,
) -> Result<SolveFn> {
    let mut triplets = Vec::with_capacity(row_index[n]);
    for row in 0..n {
        for idx in row_index[row]..row_index[row + 1] {
            let v = values(idx);
            if !v.is_finite() {
                return Err(FvError::Usage("sparse LU input contains NaN/Inf".into()));
            }
            triplets.push(Triplet::new(row, col_id[idx], v));
        }
    }
    let a_sp = SparseColMat::<usize, f64>::try_new_from_triplets(n, n, &triplets)
        .map_err(|e| FvError::Usage(format!("sparse matrix build failed: {e:?}")))?;
    let lu = a_sp
        .sp_lu()
        .map_err(|e| FvError::Usage(format!("sparse LU factorization failed: {e:?}")))?;
    Ok(Box::new(move |b| {
        let rhs = faer::Mat::<f64>::from_fn(b.len(), 1, |i, _| b[i]);
        let x = lu.solve(rhs);
        (0..b.len()).map(|i| x[(i, 0)]).collect()
    }))
}

/// Opaque handle on a sparse LU factorization.
pub(super) struct SparseLu {
    n: usize,
    solve_fn: SolveFn,
}

impl std::fmt::Debug for SparseLu {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SparseLu").field("n", &self.n).finish()
    }
}

impl SparseLu {
    pub(super) fn factorize(comm: &dyn CommBackend, a: &Matrix) -> Result<Self> {
        if comm.size() > 1 {
            return Err(FvError::Usage(
                "direct solver requires a single-rank matrix".into(),
            ));
        }
        let (n, row_index, col_id, val) = scalar_csr(a)?;
        let solve_fn = factorize_csr(n, &row_index, &col_id, |k| val[k])?;
        Ok(Self { n, solve_fn })
    }

    pub(super) fn solve(
        &self,
        comm: &dyn CommBackend,
        a: &Matrix,
        params: &SolverParams,
        rhs_norm: f64,
        b: &[f64],
        x: &mut [f64],
    ) -> Result<SolveReport> {
        debug_assert_eq!(b.len(), self.n);
        let sol = (self.solve_fn)(b);
        if sol.iter().any(|v| !v.is_finite()) {
            return Ok(SolveReport {
                state: ConvergenceState::Breakdown,
                n_iter: 1,
                residual: f64::INFINITY,
                rhs_norm,
            });
        }
        x[..self.n].copy_from_slice(&sol);
        x[self.n..].fill(0.0);
        // one true-residual check so the report is honest
        let mut r = vec![0.0; self.n];
        a.mat_vec(comm, x, &mut r)?;
        for i in 0..self.n {
            r[i] = b[i] - r[i];
        }
        let rn = vector::norm2(comm, &r, self.n);
        let state = if rn <= params.threshold(rhs_norm).max(1e-12 * rhs_norm) {
            ConvergenceState::Converged
        } else {
            ConvergenceState::Breakdown
        };
        Ok(SolveReport {
            state,
            n_iter: 1,
            residual: rn,
            rhs_norm,
        })
    }
}

/// Expand block MSR storage into one scalar CSR (diagonal folded back in).
fn scalar_csr(a: &Matrix) -> Result<(usize, Vec<usize>, Vec<usize>, Vec<f64>)> {
    let db = a.db();
    let eb = a.eb();
    let coeffs = a
        .msr()
        .ok_or_else(|| FvError::Usage("direct solve needs the msr back-end".into()))?;
    let n = a.n_rows() * db;
    let mut tri: Vec<(usize, usize, f64)> = Vec::new();
    for row in 0..a.n_rows() {
        let blk = &coeffs.diag[row * db * db..(row + 1) * db * db];
        for i in 0..db {
            for j in 0..db {
                let v = blk[i * db + j];
                if v != 0.0 || i == j {
                    tri.push((row * db + i, row * db + j, v));
                }
            }
        }
        for idx in coeffs.row_index[row]..coeffs.row_index[row + 1] {
            let col = coeffs.col_id[idx];
            if eb == 1 {
                let v = coeffs.xval[idx];
                for i in 0..db {
                    tri.push((row * db + i, col * db + i, v));
                }
            } else {
                let blk = &coeffs.xval[idx * eb * eb..(idx + 1) * eb * eb];
                for i in 0..db {
                    for j in 0..db {
                        let v = blk[i * eb + j];
                        if v != 0.0 {
                            tri.push((row * db + i, col * db + j, v));
                        }
                    }
                }
            }
        }
    }
    tri.sort_unstable_by_key(|&(r, c, _)| (r, c));
    let mut row_index = vec![0usize; n + 1];
    let mut col_id = Vec::with_capacity(tri.len());
    let mut val = Vec::with_capacity(tri.len());
    for (r, c, v) in tri {
        row_index[r + 1] += 1;
        col_id.push(c);
        val.push(v);
    }
    for r in 0..n {
        row_index[r + 1] += row_index[r];
    }
    Ok((n, row_index, col_id, val))
}
