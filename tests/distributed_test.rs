//! Multi-process distributed solver tests.
//!
//! These tests require MPI and the `distributed` feature flag.
//! Run with: mpirun -n 2 cargo test --features distributed --test distributed_test
//!
//! Without MPI installed, these tests are excluded from the default build.

#![cfg(feature = "distributed")]

use fvsolve::assembler::MatrixAssembler;
use fvsolve::comm::CommBackend;
use fvsolve::comm_mpi::MpiComm;
use fvsolve::halo::HaloBuilder;
use fvsolve::matrix::{BackendKind, Matrix, MatrixShape};
use fvsolve::solver::{SolverContext, SolverKind, SolverParams};
use std::sync::Arc;

const N_GLOBAL: usize = 256;

/// Global 1D Laplacian split into contiguous chunks per rank, with a
/// one-cell halo at each internal boundary.
fn build_partitioned(comm: &MpiComm) -> (Arc<Matrix>, usize, usize) {
    let size = comm.size();
    let rank = comm.rank();
    let chunk = N_GLOBAL / size;
    let start = rank * chunk;
    let n_local = if rank + 1 == size {
        N_GLOBAL - start
    } else {
        chunk
    };

    let mut builder = HaloBuilder::new(n_local);
    // ghost ordering: left neighbor first, then right
    let mut ghost_of_left = None;
    let mut ghost_of_right = None;
    let mut next_ghost = n_local;
    if rank > 0 {
        builder.add_section(rank - 1, None, vec![0], vec![], 1, 0);
        ghost_of_left = Some(next_ghost);
        next_ghost += 1;
    }
    if rank + 1 < size {
        builder.add_section(rank + 1, None, vec![n_local - 1], vec![], 1, 0);
        ghost_of_right = Some(next_ghost);
    }
    let halo = Arc::new(builder.build());
    let n_cols = n_local + halo.n_ghost();

    let mut asm = MatrixAssembler::new(comm, n_local).unwrap();
    let row0 = asm.row_start();
    for r in 0..n_local as u64 {
        let g = row0 + r;
        asm.add_value(g, g, 2.0).unwrap();
        if g > 0 {
            asm.add_value(g, g - 1, -1.0).unwrap();
        }
        if g + 1 < N_GLOBAL as u64 {
            asm.add_value(g, g + 1, -1.0).unwrap();
        }
    }
    asm.flush(comm).unwrap();
    let local_end = row0 + n_local as u64;
    asm.finalize(comm, n_cols, |gid| {
        if gid >= row0 && gid < local_end {
            Some((gid - row0) as usize)
        } else if rank > 0 && gid == row0 - 1 {
            ghost_of_left
        } else if rank + 1 < size && gid == local_end {
            ghost_of_right
        } else {
            None
        }
    })
    .unwrap();

    let kind = if size > 1 {
        BackendKind::Dist
    } else {
        BackendKind::Msr
    };
    let a = Arc::new(
        Matrix::from_msr(
            kind,
            MatrixShape::scalar(n_local, n_cols),
            asm.coeffs().unwrap(),
            Some(halo),
        )
        .unwrap(),
    );
    (a, n_local, start)
}

// single test: MPI can only be initialized once per process
#[test]
fn partitioned_laplacian_matches_analytic_solution() {
    let _universe = mpi::initialize().expect("MPI init failed");
    let comm = MpiComm::new();

    // reductions first, while the communicator is fresh
    let local = (comm.rank() + 1) as f64;
    let total = comm.all_reduce_sum(local);
    let size = comm.size() as f64;
    assert!((total - size * (size + 1.0) / 2.0).abs() < 1e-12);

    let (a, n_local, start) = build_partitioned(&comm);

    let mut solver = SolverContext::new(
        "dist-cg",
        SolverKind::Cg,
        SolverParams {
            rtol: 1e-10,
            ..Default::default()
        },
    );
    solver.setup(&comm, Arc::clone(&a), None).unwrap();

    // b = 1 everywhere: u_k = (k+1)(N-k)/2 for the tridiagonal Laplacian
    let b = vec![1.0; n_local];
    let mut x = vec![0.0; a.n_cols()];
    let report = solver.solve(&comm, &b, &mut x, None).unwrap();
    assert!(report.converged(), "state {:?}", report.state);

    let n = N_GLOBAL as f64;
    for r in 0..n_local {
        let k = (start + r) as f64;
        let expected = (k + 1.0) * (n - k) / 2.0;
        assert!(
            (x[r] - expected).abs() < 1e-5 * expected,
            "rank {} row {r}: {} vs {expected}",
            comm.rank(),
            x[r]
        );
    }
}
