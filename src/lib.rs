//! Sparse linear algebra and iterative solvers for unstructured
//! finite-volume CFD.
//!
//! The crate covers the numeric core of a cell-centered finite-volume
//! code: distributed matrix assembly from per-rank coefficient
//! contributions, ghost-cell halo exchange, several sparse matrix
//! back-ends, and a family of Krylov, stationary, multigrid and direct
//! solvers composable through nested preconditioning.
//!
//! Everything parallel goes through the [`comm::CommBackend`] trait.
//! Single-process runs use [`comm::SingleProcessComm`]; multi-rank runs
//! use the MPI backend behind the `distributed` feature.
//!
//! A minimal solve:
//!
//! ```
//! use fvsolve::comm::SingleProcessComm;
//! use fvsolve::matrix::{BackendKind, Matrix, MatrixShape, MsrCoeffs};
//! use fvsolve::solver::{SolverContext, SolverKind, SolverParams};
//! use std::sync::Arc;
//!
//! // 1D Laplacian, 4 cells
//! let a = Arc::new(Matrix::from_msr(
//!     BackendKind::Msr,
//!     MatrixShape::scalar(4, 4),
//!     MsrCoeffs {
//!         row_index: vec![0, 1, 3, 5, 6],
//!         col_id: vec![1, 0, 2, 1, 3, 2],
//!         diag: vec![2.0; 4],
//!         xval: vec![-1.0; 6],
//!     },
//!     None,
//! ).unwrap());
//!
//! let comm = SingleProcessComm;
//! let mut solver = SolverContext::new("p", SolverKind::Cg, SolverParams::default());
//! solver.setup(&comm, a, None).unwrap();
//! let b = vec![1.0; 4];
//! let mut x = vec![0.0; 4];
//! let report = solver.solve(&comm, &b, &mut x, None).unwrap();
//! assert!(report.converged());
//! ```

pub mod assembler;
pub mod block_dist;
pub mod comm;
#[cfg(feature = "distributed")]
pub mod comm_mpi;
pub mod config;
pub mod error;
pub mod halo;
pub mod interface;
pub mod matrix;
pub mod monitor;
pub mod range_set;
pub mod solver;
pub mod stats;
pub mod vector;

pub use assembler::MatrixAssembler;
pub use comm::{CommBackend, SingleProcessComm};
#[cfg(feature = "distributed")]
pub use comm_mpi::MpiComm;
pub use config::CoreConfig;
pub use error::{FvError, Result};
pub use halo::{Halo, HaloBuilder, HaloMode};
pub use matrix::{BackendKind, Matrix, MatrixShape, MsrCoeffs, NativeCoeffs};
pub use monitor::{read_monitoring, write_monitoring, MonitorRecord};
pub use solver::{
    AmgCycle, AmgParams, AmgSmoother, ConvergenceState, SolveReport, SolverContext, SolverKind,
    SolverParams, DEFAULT_GMRES_RESTART,
};
pub use stats::SolveStats;
