//! Right-preconditioned BiCGstab(l) after Sleijpen and Fokkema.
//!
//! One outer iteration chains l BiCG steps with an l-dimensional minimal
//! residual polynomial update, which smooths the erratic convergence of
//! plain BiCGSTAB on non-normal systems. l = 1 reduces to the classic
//! method. The iterate is kept in the preconditioned variable u with
//! x = M^-1 u recovered at exit, so the recurrences track true residuals
//! of the right-preconditioned operator A M^-1.

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
    l: usize,
    params: &SolverParams,
    rhs_norm: f64,
    b: &[f64],
    x: &mut [f64],
    mut precond: Option<&mut SolverContext>,
    mut stats: Option<&mut SolveStats>,
) -> Result<SolveReport> {
    let n = a.n_rows() * a.db();
    let nx = a.n_cols() * a.db();
    let threshold = params.threshold(rhs_norm);

    // shadow residual is frozen at the initial residual
    let mut r0 = vec![0.0; n];
    a.mat_vec(comm, x, &mut r0)?;
    for i in 0..n {
        r0[i] = b[i] - r0[i];
    }
    let rtld = r0.clone();

    // work in the preconditioned variable: x_true = x_in + M^-1 u
    let mut u_acc = vec![0.0; nx];
    let mut rs: Vec<Vec<f64>> = (0..=l).map(|_| vec![0.0; n]).collect();
    rs[0].copy_from_slice(&r0);
    let mut us: Vec<Vec<f64>> = (0..=l).map(|_| vec![0.0; n]).collect();

    // op(v) = A M^-1 v
    let mut z = vec![0.0; nx];
    let mut w = vec![0.0; n];

    let mut rho0 = 1.0f64;
    let mut alpha = 0.0f64;
    let mut omega = 1.0f64;
    let mut n_iter = 0usize;
    let mut rn = vector::norm2(comm, &rs[0], n);

    let finish = |comm: &dyn CommBackend,
                  precond: Option<&mut SolverContext>,
                  stats: Option<&mut SolveStats>,
                  u_acc: &[f64],
                  x: &mut [f64],
                  state: ConvergenceState,
                  n_iter: usize,
                  rn: f64|
     -> Result<SolveReport> {
        let mut dx = vec![0.0; x.len()];
        precond_apply(precond, comm, &u_acc[..n], &mut dx, stats)?;
        for i in 0..x.len() {
            x[i] += dx[i];
        }
        Ok(SolveReport {
            state,
            n_iter,
            residual: rn,
            rhs_norm,
        })
    };

    if rn <= threshold {
        return Ok(SolveReport {
            state: ConvergenceState::Converged,
            n_iter: 0,
            residual: rn,
            rhs_norm,
        });
    }

    while n_iter < params.max_iter {
        rho0 = -omega * rho0;

        // BiCG part: l coupled two-term recurrences
        for j in 0..l {
            let rho1 = vector::dot(comm, &rtld, &rs[j], n);
            if rho0.abs() < BREAKDOWN_EPS {
                return finish(
                    comm,
                    precond.as_deref_mut(),
                    stats.as_deref_mut(),
                    &u_acc,
                    x,
                    ConvergenceState::Breakdown,
                    n_iter,
                    rn,
                );
            }
            let beta = alpha * rho1 / rho0;
            rho0 = rho1;
            for i in 0..=j {
                for k in 0..n {
                    us[i][k] = rs[i][k] - beta * us[i][k];
                }
            }
            apply_op(
                comm,
                a,
                precond.as_deref_mut(),
                stats.as_deref_mut(),
                &us[j],
                &mut z,
                &mut w,
            )?;
            us[j + 1].copy_from_slice(&w);
            let gamma = vector::dot(comm, &rtld, &us[j + 1], n);
            if gamma.abs() < BREAKDOWN_EPS {
                return finish(
                    comm,
                    precond.as_deref_mut(),
                    stats.as_deref_mut(),
                    &u_acc,
                    x,
                    ConvergenceState::Breakdown,
                    n_iter,
                    rn,
                );
            }
            alpha = rho0 / gamma;
            for i in 0..=j {
                for k in 0..n {
                    rs[i][k] -= alpha * us[i + 1][k];
                }
            }
            apply_op(
                comm,
                a,
                precond.as_deref_mut(),
                stats.as_deref_mut(),
                &rs[j],
                &mut z,
                &mut w,
            )?;
            rs[j + 1].copy_from_slice(&w);
            vector::axpy(alpha, &us[0], &mut u_acc[..n]);
        }

        // minimal residual part: modified Gram-Schmidt on r_1..r_l
        let mut tau = vec![vec![0.0f64; l + 1]; l + 1];
        let mut sigma = vec![0.0f64; l + 1];
        let mut gamma_p = vec![0.0f64; l + 1];
        for j in 1..=l {
            for i in 1..j {
                let t = vector::dot(comm, &rs[i], &rs[j], n) / sigma[i];
                tau[i][j] = t;
                let (left, right) = rs.split_at_mut(j);
                let ri = &left[i];
                let rj = &mut right[0];
                for k in 0..n {
                    rj[k] -= t * ri[k];
                }
            }
            sigma[j] = vector::dot(comm, &rs[j], &rs[j], n);
            if sigma[j] < BREAKDOWN_EPS {
                return finish(
                    comm,
                    precond.as_deref_mut(),
                    stats.as_deref_mut(),
                    &u_acc,
                    x,
                    ConvergenceState::Breakdown,
                    n_iter,
                    rn,
                );
            }
            gamma_p[j] = vector::dot(comm, &rs[j], &rs[0], n) / sigma[j];
        }
        let mut gam = vec![0.0f64; l + 1];
        let mut gam_pp = vec![0.0f64; l + 1];
        gam[l] = gamma_p[l];
        omega = gam[l];
        for j in (1..l).rev() {
            let mut s = 0.0;
            for i in j + 1..=l {
                s += tau[j][i] * gam[i];
            }
            gam[j] = gamma_p[j] - s;
        }
        for j in 1..l {
            let mut s = 0.0;
            for i in j + 1..l {
                s += tau[j][i] * gam[i + 1];
            }
            gam_pp[j] = gam[j + 1] + s;
        }

        vector::axpy(gam[1], &rs[0], &mut u_acc[..n]);
        {
            let (r_head, r_tail) = rs.split_at_mut(l);
            let rl = &r_tail[0];
            vector::axpy(-gamma_p[l], rl, &mut r_head[0]);
        }
        {
            let (u_head, u_tail) = us.split_at_mut(l);
            let ul = &u_tail[0];
            vector::axpy(-gam[l], ul, &mut u_head[0]);
        }
        for j in 1..l {
            {
                let (u_head, u_tail) = us.split_at_mut(j);
                let uj = &u_tail[0];
                vector::axpy(-gam[j], uj, &mut u_head[0]);
            }
            {
                let (r_head, r_tail) = rs.split_at_mut(j);
                let rj = &r_tail[0];
                vector::axpy(gam_pp[j], rj, &mut u_acc[..n]);
                vector::axpy(-gamma_p[j], rj, &mut r_head[0]);
            }
        }

        n_iter += 1;
        rn = vector::norm2(comm, &rs[0], n);
        if params.verbosity >= 2 {
            tracing::debug!(iter = n_iter, residual = rn, "bicgstab({l})");
        }
        if rn <= threshold {
            return finish(
                comm,
                precond.as_deref_mut(),
                stats.as_deref_mut(),
                &u_acc,
                x,
                ConvergenceState::Converged,
                n_iter,
                rn,
            );
        }
        if !rn.is_finite() || rn > params.dtol * rhs_norm {
            return finish(
                comm,
                precond.as_deref_mut(),
                stats.as_deref_mut(),
                &u_acc,
                x,
                ConvergenceState::Diverged,
                n_iter,
                rn,
            );
        }
    }
    finish(
        comm,
        precond,
        stats,
        &u_acc,
        x,
        ConvergenceState::MaxIterReached,
        n_iter,
        rn,
    )
}

/// w = A M^-1 v, with z as the preconditioned scratch vector.
fn apply_op(
    comm: &dyn CommBackend,
    a: &Matrix,
    precond: Option<&mut SolverContext>,
    stats: Option<&mut SolveStats>,
    v: &[f64],
    z: &mut [f64],
    w: &mut [f64],
) -> Result<()> {
    precond_apply(precond, comm, v, z, stats)?;
    a.mat_vec(comm, z, w)?;
    Ok(())
}
