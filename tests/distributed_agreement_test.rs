//! Four-process agreement test: the 100 x 100 Laplacian partitioned into a
//! 2 x 2 block decomposition must reproduce the single-process solution.
//!
//! Requires MPI and the `distributed` feature flag.
//! Run with: mpirun -n 4 cargo test --features distributed --test distributed_agreement_test
//!
//! Without MPI installed, this test is excluded from the default build.

#![cfg(feature = "distributed")]

use fvsolve::assembler::MatrixAssembler;
use fvsolve::comm::{CommBackend, SingleProcessComm};
use fvsolve::comm_mpi::MpiComm;
use fvsolve::halo::HaloBuilder;
use fvsolve::matrix::{BackendKind, Matrix, MatrixShape, MsrCoeffs};
use fvsolve::solver::{SolveReport, SolverContext, SolverKind, SolverParams};
use std::sync::Arc;

const N: usize = 100;
const NB: usize = N / 2;

/// Assembler row gid of global cell (gi, gj): ranks own 2 x 2 sub-squares
/// of NB x NB cells, rows numbered block-contiguously in rank order.
fn gid_of(gi: usize, gj: usize) -> u64 {
    let owner = gi / NB + 2 * (gj / NB);
    (owner * NB * NB + (gj % NB) * NB + gi % NB) as u64
}

fn decode(gid: u64) -> (usize, usize) {
    let owner = gid as usize / (NB * NB);
    let l = gid as usize % (NB * NB);
    ((owner % 2) * NB + l % NB, (owner / 2) * NB + l / NB)
}

fn cg_with_jacobi(name: &str) -> SolverContext {
    let precond = SolverContext::new(
        "jac",
        SolverKind::Jacobi,
        SolverParams {
            max_iter: 1,
            rtol: 0.0,
            ..Default::default()
        },
    );
    SolverContext::new(
        name,
        SolverKind::Cg,
        SolverParams {
            rtol: 1e-8,
            ..Default::default()
        },
    )
    .with_preconditioner(precond)
}

/// One rank's quarter of the 5-point Laplacian, with an NB-cell ghost
/// column and ghost row toward the two neighboring sub-squares.
fn build_partitioned(comm: &MpiComm) -> (Arc<Matrix>, usize, usize) {
    let rank = comm.rank();
    let (x0, y0) = ((rank % 2) * NB, (rank / 2) * NB);
    let n_local = NB * NB;
    let h_peer = (1 - rank % 2) + 2 * (rank / 2);
    let v_peer = rank % 2 + 2 * (1 - rank / 2);

    // shared boundary cells, ordered by the running coordinate so both
    // sides of each section agree on the exchange order
    let bx = if x0 == 0 { NB - 1 } else { 0 };
    let by = if y0 == 0 { NB - 1 } else { 0 };
    let mut builder = HaloBuilder::new(n_local);
    builder.add_section(h_peer, None, (0..NB).map(|j| j * NB + bx).collect(), vec![], NB, 0);
    builder.add_section(v_peer, None, (0..NB).map(|i| by * NB + i).collect(), vec![], NB, 0);
    let halo = Arc::new(builder.build());
    let h_ghost0 = n_local;
    let v_ghost0 = n_local + NB;
    let n_cols = n_local + halo.n_ghost();

    let mut asm = MatrixAssembler::new(comm, n_local).unwrap();
    assert_eq!(asm.row_start(), (rank * n_local) as u64);
    for gj in y0..y0 + NB {
        for gi in x0..x0 + NB {
            let g = gid_of(gi, gj);
            asm.add_value(g, g, 4.0).unwrap();
            if gi > 0 {
                asm.add_value(g, gid_of(gi - 1, gj), -1.0).unwrap();
            }
            if gi + 1 < N {
                asm.add_value(g, gid_of(gi + 1, gj), -1.0).unwrap();
            }
            if gj > 0 {
                asm.add_value(g, gid_of(gi, gj - 1), -1.0).unwrap();
            }
            if gj + 1 < N {
                asm.add_value(g, gid_of(gi, gj + 1), -1.0).unwrap();
            }
        }
    }
    asm.finalize(comm, n_cols, |gid| {
        let (gi, gj) = decode(gid);
        if gi >= x0 && gi < x0 + NB && gj >= y0 && gj < y0 + NB {
            Some((gj - y0) * NB + (gi - x0))
        } else if gj >= y0 && gj < y0 + NB {
            // horizontal ghost column, one slot per row
            Some(h_ghost0 + (gj - y0))
        } else if gi >= x0 && gi < x0 + NB {
            Some(v_ghost0 + (gi - x0))
        } else {
            None
        }
    })
    .unwrap();

    let a = Arc::new(
        Matrix::from_msr(
            BackendKind::Dist,
            MatrixShape::scalar(n_local, n_cols),
            asm.coeffs().unwrap(),
            Some(halo),
        )
        .unwrap(),
    );
    (a, x0, y0)
}

/// The full 100 x 100 system assembled in natural row-major numbering.
fn solve_serial() -> (SolveReport, Vec<f64>) {
    let comm = SingleProcessComm;
    let n = N * N;
    let mut row_index = vec![0];
    let mut col_id = Vec::new();
    for gj in 0..N {
        for gi in 0..N {
            let g = gj * N + gi;
            // neighbor columns in ascending order
            if gj > 0 {
                col_id.push(g - N);
            }
            if gi > 0 {
                col_id.push(g - 1);
            }
            if gi + 1 < N {
                col_id.push(g + 1);
            }
            if gj + 1 < N {
                col_id.push(g + N);
            }
            row_index.push(col_id.len());
        }
    }
    let nnz = col_id.len();
    let a = Arc::new(
        Matrix::from_msr(
            BackendKind::Msr,
            MatrixShape::scalar(n, n),
            MsrCoeffs {
                row_index,
                col_id,
                diag: vec![4.0; n],
                xval: vec![-1.0; nnz],
            },
            None,
        )
        .unwrap(),
    );
    let h = 1.0 / (N as f64 + 1.0);
    let b = vec![h * h; n];
    let mut x = vec![0.0; n];
    let mut solver = cg_with_jacobi("serial-cg");
    solver.setup(&comm, a, None).unwrap();
    let report = solver.solve(&comm, &b, &mut x, None).unwrap();
    (report, x)
}

// single test: MPI can only be initialized once per process
#[test]
fn four_rank_decomposition_agrees_with_serial_solve() {
    let _universe = mpi::initialize().expect("MPI init failed");
    let comm = MpiComm::new();
    if comm.size() != 4 {
        eprintln!(
            "skipping: needs exactly 4 ranks, got {} (see mpirun line above)",
            comm.size()
        );
        return;
    }

    let (a, x0, y0) = build_partitioned(&comm);
    let h = 1.0 / (N as f64 + 1.0);
    let b = vec![h * h; a.n_rows()];
    let mut x = vec![0.0; a.n_cols()];
    let mut solver = cg_with_jacobi("dist-cg");
    solver.setup(&comm, Arc::clone(&a), None).unwrap();
    let report = solver.solve(&comm, &b, &mut x, None).unwrap();
    assert!(report.converged(), "state {:?}", report.state);

    let (serial_report, serial_x) = solve_serial();
    assert!(serial_report.converged());
    assert!(
        report.n_iter.abs_diff(serial_report.n_iter) <= 1,
        "iteration counts diverged: {} distributed vs {} serial",
        report.n_iter,
        serial_report.n_iter
    );

    // every owned cell matches the serial solution to 1e-12
    let mut worst = 0.0f64;
    for gj in y0..y0 + NB {
        for gi in x0..x0 + NB {
            let local = (gj - y0) * NB + (gi - x0);
            let diff = (x[local] - serial_x[gj * N + gi]).abs();
            worst = worst.max(diff);
        }
    }
    assert!(
        worst <= 1e-12,
        "rank {} worst deviation {worst:e}",
        comm.rank()
    );
}
