//! Preconditioned conjugate gradients, plus the flexible variant.
//!
//! The flexible variant replaces the Fletcher-Reeves update with the
//! Polak-Ribiere-style `beta = r_new . (z_new - z_old) / (r . z)`, which
//! tolerates preconditioners that vary between applications (multigrid
//! with non-stationary smoothing, nested iterative preconditioners).

use super::{precond_apply, ConvergenceState, SolveReport, SolverContext, SolverParams};
use crate::comm::CommBackend;
use crate::error::Result;
use crate::matrix::Matrix;
use crate::stats::SolveStats;
use crate::vector;

const BREAKDOWN_EPS: f64 = 1e-300;

#[allow(clippy::too_many_arguments)]
pub(super) fn solve(
    comm: &dyn CommBackend,
    a: &Matrix,
    params: &SolverParams,
    rhs_norm: f64,
    b: &[f64],
    x: &mut [f64],
    flexible: bool,
    mut precond: Option<&mut SolverContext>,
    mut stats: Option<&mut SolveStats>,
) -> Result<SolveReport> {
    let n = a.n_rows() * a.db();
    let nx = a.n_cols() * a.db();
    let threshold = params.threshold(rhs_norm);

    let mut r = vec![0.0; n];
    let mut z = vec![0.0; nx];
    let mut z_old = if flexible { vec![0.0; nx] } else { Vec::new() };
    let mut p = vec![0.0; nx];
    let mut q = vec![0.0; n];

    a.mat_vec(comm, x, &mut r)?;
    for i in 0..n {
        r[i] = b[i] - r[i];
    }
    let mut rn = vector::norm2(comm, &r, n);
    if rn <= threshold {
        return Ok(SolveReport {
            state: ConvergenceState::Converged,
            n_iter: 0,
            residual: rn,
            rhs_norm,
        });
    }
    precond_apply(precond.as_deref_mut(), comm, &r, &mut z, stats.as_deref_mut())?;
    p.copy_from_slice(&z);
    let mut rz = vector::dot(comm, &r, &z, n);

    for it in 0..params.max_iter {
        a.mat_vec(comm, &mut p, &mut q)?;
        let pq = vector::dot(comm, &p, &q, n);
        if pq.abs() < BREAKDOWN_EPS {
            return Ok(SolveReport {
                state: ConvergenceState::Breakdown,
                n_iter: it,
                residual: rn,
                rhs_norm,
            });
        }
        let alpha = rz / pq;
        vector::axpy(alpha, &p[..n], &mut x[..n]);
        vector::axpy(-alpha, &q, &mut r);
        rn = vector::norm2(comm, &r, n);
        if params.verbosity >= 2 {
            tracing::debug!(iter = it + 1, residual = rn, "cg");
        }
        if rn <= threshold {
            return Ok(SolveReport {
                state: ConvergenceState::Converged,
                n_iter: it + 1,
                residual: rn,
                rhs_norm,
            });
        }
        if !rn.is_finite() || rn > params.dtol * rhs_norm {
            return Ok(SolveReport {
                state: ConvergenceState::Diverged,
                n_iter: it + 1,
                residual: rn,
                rhs_norm,
            });
        }
        if flexible {
            z_old.copy_from_slice(&z);
        }
        precond_apply(precond.as_deref_mut(), comm, &r, &mut z, stats.as_deref_mut())?;
        let rz_new = if flexible {
            // r . (z - z_old)
            let mut s = 0.0;
            for i in 0..n {
                s += r[i] * (z[i] - z_old[i]);
            }
            comm.all_reduce_sum(s)
        } else {
            vector::dot(comm, &r, &z, n)
        };
        if rz.abs() < BREAKDOWN_EPS {
            return Ok(SolveReport {
                state: ConvergenceState::Breakdown,
                n_iter: it + 1,
                residual: rn,
                rhs_norm,
            });
        }
        let beta = rz_new / rz;
        rz = if flexible {
            vector::dot(comm, &r, &z, n)
        } else {
            rz_new
        };
        for i in 0..n {
            p[i] = z[i] + beta * p[i];
        }
    }
    Ok(SolveReport {
        state: ConvergenceState::MaxIterReached,
        n_iter: params.max_iter,
        residual: rn,
        rhs_norm,
    })
}
