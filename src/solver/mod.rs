//! Iterative and direct linear solvers.
//!
//! A [`SolverContext`] couples a strategy ([`SolverKind`]), its tuning
//! parameters, and whatever state the strategy precomputes at setup time
//! (inverted diagonal blocks, a multigrid hierarchy, an LU factorization).
//! A preconditioner is itself a `SolverContext` with a small iteration
//! budget, nested inside its parent; composition is by plain ownership,
//! with no back-pointers.
//!
//! Non-convergence is reported through [`ConvergenceState`], never as an
//! `Err`: errors are reserved for misuse (dimension mismatches, invalid
//! parameters) and breakdowns of the environment, not of the iteration.

pub mod amg;
mod bicgstab;
mod cg;
mod direct;
mod gauss_seidel;
mod gmres;
mod jacobi;

pub use amg::{AmgCycle, AmgParams, AmgSmoother};

use crate::comm::CommBackend;
use crate::error::{FvError, Result};
use crate::matrix::Matrix;
use crate::monitor::MonitorRecord;
use crate::stats::SolveStats;
use crate::vector;
use std::sync::Arc;
use tracing::debug_span;

/// How an iteration ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvergenceState {
    Converged,
    Stagnated,
    Diverged,
    MaxIterReached,
    Breakdown,
}

/// Outcome of one solve.
#[derive(Debug, Clone)]
pub struct SolveReport {
    pub state: ConvergenceState,
    pub n_iter: usize,
    pub residual: f64,
    pub rhs_norm: f64,
}

impl SolveReport {
    pub fn converged(&self) -> bool {
        self.state == ConvergenceState::Converged
    }
}

/// Iteration controls shared by every strategy.
#[derive(Debug, Clone, Copy)]
pub struct SolverParams {
    /// Relative tolerance on the residual norm.
    pub rtol: f64,
    /// Absolute floor on the convergence threshold.
    pub atol: f64,
    /// Divergence threshold: `r > dtol * ||b||` aborts the iteration.
    pub dtol: f64,
    pub max_iter: usize,
    /// 0 silent, 1 per-solve summary, 2 per-iteration residuals.
    pub verbosity: u8,
}

impl Default for SolverParams {
    fn default() -> Self {
        Self {
            rtol: 1e-8,
            atol: 0.0,
            dtol: 1e10,
            max_iter: 10_000,
            verbosity: 0,
        }
    }
}

impl SolverParams {
    /// Convergence threshold for a given right-hand side norm.
    pub fn threshold(&self, rhs_norm: f64) -> f64 {
        (self.rtol * rhs_norm).max(self.atol)
    }
}

/// Default GMRES restart length.
pub const DEFAULT_GMRES_RESTART: usize = 20;

/// Solution strategy. Dispatch is a closed exhaustive match; adding a
/// strategy means adding a variant here and an arm in `solve`.
#[derive(Debug, Clone)]
pub enum SolverKind {
    Jacobi,
    GaussSeidel { symmetric: bool },
    Cg,
    FlexibleCg,
    BicgStab { l: usize },
    Gmres { restart: usize },
    Amg(AmgParams),
    Direct,
}

impl SolverKind {
    /// Restarted GMRES with the default restart length.
    pub fn gmres() -> Self {
        SolverKind::Gmres {
            restart: DEFAULT_GMRES_RESTART,
        }
    }
}

/// Strategy state precomputed at setup time.
enum SolverSetup {
    None,
    InvDiag(InvDiag),
    Amg(amg::AmgHierarchy),
    Direct(direct::SparseLu),
}

/// Inverted block diagonal with its worst condition estimate, allocated
/// once per setup and lent to whoever needs diagonal scaling.
pub(crate) struct InvDiag {
    pub inv: Vec<f64>,
    pub cond: f64,
}

pub struct SolverContext {
    name: String,
    kind: SolverKind,
    params: SolverParams,
    precond: Option<Box<SolverContext>>,
    matrix: Option<Arc<Matrix>>,
    setup: SolverSetup,
    last_report: Option<SolveReport>,
}

impl SolverContext {
    pub fn new(name: impl Into<String>, kind: SolverKind, params: SolverParams) -> Self {
        Self {
            name: name.into(),
            kind,
            params,
            precond: None,
            matrix: None,
            setup: SolverSetup::None,
            last_report: None,
        }
    }

    /// Nest a preconditioner. Its `max_iter` is its per-application budget.
    pub fn with_preconditioner(mut self, precond: SolverContext) -> Self {
        self.precond = Some(Box::new(precond));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &SolverKind {
        &self.kind
    }

    pub fn matrix(&self) -> Option<&Arc<Matrix>> {
        self.matrix.as_ref()
    }

    /// Worst diagonal-block condition estimate seen at setup, when the
    /// strategy inverts the diagonal.
    pub fn diag_condition(&self) -> Option<f64> {
        match &self.setup {
            SolverSetup::InvDiag(d) => Some(d.cond),
            _ => None,
        }
    }

    /// Monitoring record of the most recent solve, if any.
    pub fn monitor_record(&self) -> Option<MonitorRecord> {
        self.last_report.as_ref().map(|r| MonitorRecord {
            name: self.name.clone(),
            n_iter: r.n_iter as u64,
            last_residual: r.residual,
            rhs_norm: r.rhs_norm,
        })
    }

    /// Collective. Bind the matrix and precompute strategy state, then set
    /// up the nested preconditioner against the same matrix.
    pub fn setup(
        &mut self,
        comm: &dyn CommBackend,
        a: Arc<Matrix>,
        mut stats: Option<&mut SolveStats>,
    ) -> Result<()> {
        let _span = debug_span!("solver_setup", solver = %self.name).entered();
        let start = std::time::Instant::now();
        self.setup = match &self.kind {
            SolverKind::Jacobi | SolverKind::GaussSeidel { .. } => {
                let (inv, cond) = a.inverse_diagonal()?;
                SolverSetup::InvDiag(InvDiag { inv, cond })
            }
            SolverKind::Cg | SolverKind::FlexibleCg | SolverKind::Gmres { .. } => SolverSetup::None,
            SolverKind::BicgStab { l } => {
                if !matches!(*l, 1 | 2 | 4) {
                    return Err(FvError::Usage(format!(
                        "BiCGstab degree {l} not supported (use 1, 2 or 4)"
                    )));
                }
                SolverSetup::None
            }
            SolverKind::Amg(params) => {
                SolverSetup::Amg(amg::AmgHierarchy::build(comm, &a, params)?)
            }
            SolverKind::Direct => SolverSetup::Direct(direct::SparseLu::factorize(comm, &a)?),
        };
        if let Some(p) = &mut self.precond {
            p.setup(comm, Arc::clone(&a), stats.as_deref_mut())?;
        }
        self.matrix = Some(a);
        if let Some(s) = stats {
            s.setup += start.elapsed();
        }
        Ok(())
    }

    /// Collective. Solve `A x = b`. `x` carries the initial guess and spans
    /// owned plus ghost entries; `b` spans owned entries only.
    pub fn solve(
        &mut self,
        comm: &dyn CommBackend,
        b: &[f64],
        x: &mut [f64],
        mut stats: Option<&mut SolveStats>,
    ) -> Result<SolveReport> {
        let a = Arc::clone(
            self.matrix
                .as_ref()
                .ok_or_else(|| FvError::Usage("solve before setup".into()))?,
        );
        let n = a.n_rows() * a.db();
        if b.len() != n || x.len() != a.n_cols() * a.db() {
            return Err(FvError::Usage(format!(
                "solve dimension mismatch: b {} (owned {n}), x {} (full {})",
                b.len(),
                x.len(),
                a.n_cols() * a.db()
            )));
        }
        let _span = debug_span!("solve", solver = %self.name).entered();
        let rhs_norm = vector::norm2(comm, b, n);
        // empty or zero systems converge immediately
        let n_global = comm.all_reduce_sum_u64(n as u64);
        if n_global == 0 || rhs_norm == 0.0 {
            x.fill(0.0);
            let report = SolveReport {
                state: ConvergenceState::Converged,
                n_iter: 0,
                residual: 0.0,
                rhs_norm,
            };
            self.last_report = Some(report.clone());
            return Ok(report);
        }
        let kind = self.kind.clone();
        let params = self.params;
        let report = match kind {
            SolverKind::Jacobi => {
                let inv = self.setup_inv_diag()?;
                jacobi::solve(comm, &a, inv, &params, rhs_norm, b, x)?
            }
            SolverKind::GaussSeidel { symmetric } => {
                let inv = self.setup_inv_diag()?;
                gauss_seidel::solve(comm, &a, inv, symmetric, &params, rhs_norm, b, x)?
            }
            SolverKind::Cg => cg::solve(
                comm,
                &a,
                &params,
                rhs_norm,
                b,
                x,
                false,
                self.precond.as_deref_mut(),
                stats.as_deref_mut(),
            )?,
            SolverKind::FlexibleCg => cg::solve(
                comm,
                &a,
                &params,
                rhs_norm,
                b,
                x,
                true,
                self.precond.as_deref_mut(),
                stats.as_deref_mut(),
            )?,
            SolverKind::BicgStab { l } => bicgstab::solve(
                comm,
                &a,
                l,
                &params,
                rhs_norm,
                b,
                x,
                self.precond.as_deref_mut(),
                stats.as_deref_mut(),
            )?,
            SolverKind::Gmres { restart } => gmres::solve(
                comm,
                &a,
                restart,
                &params,
                rhs_norm,
                b,
                x,
                self.precond.as_deref_mut(),
                stats.as_deref_mut(),
            )?,
            SolverKind::Amg(_) => {
                let SolverSetup::Amg(hier) = &mut self.setup else {
                    return Err(FvError::Usage("AMG hierarchy missing".into()));
                };
                hier.solve(comm, &params, rhs_norm, b, x, stats.as_deref_mut())?
            }
            SolverKind::Direct => {
                let SolverSetup::Direct(lu) = &self.setup else {
                    return Err(FvError::Usage("LU factorization missing".into()));
                };
                lu.solve(comm, &a, &params, rhs_norm, b, x)?
            }
        };
        if self.params.verbosity >= 1 {
            tracing::info!(
                solver = %self.name,
                state = ?report.state,
                n_iter = report.n_iter,
                residual = report.residual,
                "solve finished"
            );
        }
        if let Some(s) = stats {
            s.solves += 1;
            s.iterations += report.n_iter as u64;
            s.push_residual(report.residual);
        }
        self.last_report = Some(report.clone());
        Ok(report)
    }

    fn setup_inv_diag(&self) -> Result<&InvDiag> {
        match &self.setup {
            SolverSetup::InvDiag(d) => Ok(d),
            _ => Err(FvError::Usage("diagonal inverse missing".into())),
        }
    }

    /// Preconditioner application: z = M^-1 r, from a zero initial guess,
    /// running at most the nested context's iteration budget. Convergence
    /// state is deliberately ignored; a rough application is still useful.
    pub(crate) fn apply(
        &mut self,
        comm: &dyn CommBackend,
        r: &[f64],
        z: &mut [f64],
        stats: Option<&mut SolveStats>,
    ) -> Result<()> {
        z.fill(0.0);
        self.solve(comm, r, z, stats)?;
        Ok(())
    }
}

/// Consecutive non-improving iterations before a stationary method reports
/// stagnation.
pub(crate) const STAGNATION_WINDOW: usize = 20;

/// Shared stopping test for stationary iterations. Returns the terminal
/// state, or `None` to keep iterating.
pub(crate) fn check_residual(
    params: &SolverParams,
    rhs_norm: f64,
    rn: f64,
    threshold: f64,
    stalled: &mut usize,
) -> Option<ConvergenceState> {
    if rn <= threshold {
        return Some(ConvergenceState::Converged);
    }
    if !rn.is_finite() || rn > params.dtol * rhs_norm {
        return Some(ConvergenceState::Diverged);
    }
    if *stalled >= STAGNATION_WINDOW {
        return Some(ConvergenceState::Stagnated);
    }
    None
}

/// Apply an optional preconditioner; the identity copies `r` into the owned
/// prefix of `z` and clears the ghost tail.
pub(crate) fn precond_apply(
    precond: Option<&mut SolverContext>,
    comm: &dyn CommBackend,
    r: &[f64],
    z: &mut [f64],
    stats: Option<&mut SolveStats>,
) -> Result<()> {
    match precond {
        Some(ctx) => ctx.apply(comm, r, z, stats),
        None => {
            z[..r.len()].copy_from_slice(r);
            z[r.len()..].fill(0.0);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::SingleProcessComm;
    use crate::matrix::{BackendKind, MatrixShape, MsrCoeffs};
    use approx::assert_abs_diff_eq;

    pub(super) fn laplacian_1d(n: usize) -> Arc<Matrix> {
        let mut row_index = vec![0];
        let mut col_id = Vec::new();
        for r in 0..n {
            if r > 0 {
                col_id.push(r - 1);
            }
            if r + 1 < n {
                col_id.push(r + 1);
            }
            row_index.push(col_id.len());
        }
        let nnz = col_id.len();
        Arc::new(
            Matrix::from_msr(
                BackendKind::Msr,
                MatrixShape::scalar(n, n),
                MsrCoeffs {
                    row_index,
                    col_id,
                    diag: vec![2.0; n],
                    xval: vec![-1.0; nnz],
                },
                None,
            )
            .unwrap(),
        )
    }

    pub(super) fn check_solution(a: &Matrix, b: &[f64], x: &[f64], tol: f64) {
        let comm = SingleProcessComm;
        let mut xm = x.to_vec();
        let mut r = vec![0.0; b.len()];
        a.mat_vec(&comm, &mut xm, &mut r).unwrap();
        let bn = vector::norm2(&comm, b, b.len()).max(1.0);
        for i in 0..b.len() {
            assert_abs_diff_eq!(r[i], b[i], epsilon = tol * bn);
        }
    }

    #[test]
    fn zero_rhs_converges_immediately() {
        let comm = SingleProcessComm;
        let a = laplacian_1d(5);
        let mut ctx = SolverContext::new("zero", SolverKind::Cg, SolverParams::default());
        ctx.setup(&comm, a, None).unwrap();
        let b = vec![0.0; 5];
        let mut x = vec![1.0; 5];
        let rep = ctx.solve(&comm, &b, &mut x, None).unwrap();
        assert_eq!(rep.state, ConvergenceState::Converged);
        assert_eq!(rep.n_iter, 0);
        assert!(x.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn bad_degree_rejected_at_setup() {
        let comm = SingleProcessComm;
        let a = laplacian_1d(4);
        let mut ctx =
            SolverContext::new("bad", SolverKind::BicgStab { l: 3 }, SolverParams::default());
        assert!(ctx.setup(&comm, a, None).is_err());
    }

    #[test]
    fn solve_before_setup_is_usage_error() {
        let comm = SingleProcessComm;
        let mut ctx = SolverContext::new("early", SolverKind::Jacobi, SolverParams::default());
        let b = vec![1.0];
        let mut x = vec![0.0];
        assert!(matches!(
            ctx.solve(&comm, &b, &mut x, None),
            Err(FvError::Usage(_))
        ));
    }
}
