//! Block Jacobi iteration: x <- x + D^-1 (b - A x).
//!
//! Mostly used as a smoother or as the diagonal-scaling preconditioner
//! (a budget of one iteration from a zero guess is exactly z = D^-1 r).

use super::{ConvergenceState, InvDiag, SolveReport, SolverParams};
use crate::comm::CommBackend;
use crate::error::Result;
use crate::matrix::{block, Matrix};
use crate::vector;

pub(super) fn solve(
    comm: &dyn CommBackend,
    a: &Matrix,
    inv_diag: &InvDiag,
    params: &SolverParams,
    rhs_norm: f64,
    b: &[f64],
    x: &mut [f64],
) -> Result<SolveReport> {
    let db = a.db();
    let n = a.n_rows() * db;
    let threshold = params.threshold(rhs_norm);
    let mut r = vec![0.0; n];
    a.mat_vec(comm, x, &mut r)?;
    for i in 0..n {
        r[i] = b[i] - r[i];
    }
    let mut rn = vector::norm2(comm, &r, n);
    let mut stalled = 0;
    for it in 0..params.max_iter {
        if let Some(state) = super::check_residual(params, rhs_norm, rn, threshold, &mut stalled) {
            return Ok(SolveReport {
                state,
                n_iter: it,
                residual: rn,
                rhs_norm,
            });
        }
        for row in 0..a.n_rows() {
            let blk = &inv_diag.inv[row * db * db..(row + 1) * db * db];
            let mut upd = [0.0f64; crate::matrix::MAX_DB];
            block::block_mul(db, blk, &r[row * db..(row + 1) * db], &mut upd[..db]);
            for c in 0..db {
                x[row * db + c] += upd[c];
            }
        }
        a.mat_vec(comm, x, &mut r)?;
        for i in 0..n {
            r[i] = b[i] - r[i];
        }
        let prev = rn;
        rn = vector::norm2(comm, &r, n);
        if rn >= prev * (1.0 - 1e-12) {
            stalled += 1;
        } else {
            stalled = 0;
        }
        if params.verbosity >= 2 {
            tracing::debug!(iter = it + 1, residual = rn, "jacobi");
        }
    }
    let state = if rn <= threshold {
        ConvergenceState::Converged
    } else {
        ConvergenceState::MaxIterReached
    };
    Ok(SolveReport {
        state,
        n_iter: params.max_iter,
        residual: rn,
        rhs_norm,
    })
}
