//! Assembler stress test: many coordinate contributions with heavy
//! duplication, checked against the CSR structural invariants.

use fvsolve::assembler::MatrixAssembler;
use fvsolve::comm::SingleProcessComm;

const N_ROWS: usize = 2000;
const N_EMIT: usize = 200_000;

struct Lcg(u64);

impl Lcg {
    fn next(&mut self) -> u64 {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        self.0 >> 16
    }
}

#[test]
fn bulk_assembly_with_duplicates() {
    let comm = SingleProcessComm;
    let mut asm = MatrixAssembler::new(&comm, N_ROWS).unwrap();
    let mut rng = Lcg(42);
    let mut sum_emitted = 0.0f64;
    let mut n_offdiag = 0usize;
    for _ in 0..N_EMIT {
        let row = (rng.next() as usize) % N_ROWS;
        // ~30% of contributions revisit a near neighbor, forcing duplicates
        let col = if rng.next() % 10 < 3 {
            (row + 1) % N_ROWS
        } else {
            (rng.next() as usize) % N_ROWS
        };
        let v = ((rng.next() % 1000) as f64) / 500.0 - 1.0;
        asm.add_value(row as u64, col as u64, v).unwrap();
        sum_emitted += v;
        if row != col {
            n_offdiag += 1;
        }
    }
    asm.flush(&comm).unwrap();
    asm.finalize(&comm, N_ROWS, |gid| {
        let g = gid as usize;
        (g < N_ROWS).then_some(g)
    })
    .unwrap();

    let coeffs = asm.coeffs().unwrap();

    // structural invariants: monotone row pointers, sorted unique
    // in-range columns per row
    assert_eq!(coeffs.row_index.len(), N_ROWS + 1);
    assert_eq!(coeffs.row_index[0], 0);
    assert_eq!(*coeffs.row_index.last().unwrap(), coeffs.col_id.len());
    for row in 0..N_ROWS {
        let (s, e) = (coeffs.row_index[row], coeffs.row_index[row + 1]);
        assert!(s <= e);
        for k in s..e {
            assert!(coeffs.col_id[k] < N_ROWS);
            assert_ne!(coeffs.col_id[k], row, "diagonal leaked into xval");
            if k + 1 < e {
                assert!(coeffs.col_id[k] < coeffs.col_id[k + 1]);
            }
        }
    }
    assert!(coeffs.col_id.len() <= n_offdiag);

    // duplicate summing preserves the total of all contributions
    let sum_assembled: f64 = coeffs.diag.iter().sum::<f64>() + coeffs.xval.iter().sum::<f64>();
    assert!(
        (sum_assembled - sum_emitted).abs() < 1e-8 * sum_emitted.abs().max(1.0),
        "{sum_assembled} vs {sum_emitted}"
    );
}

#[test]
fn out_of_range_row_is_rejected() {
    let comm = SingleProcessComm;
    let mut asm = MatrixAssembler::new(&comm, 4).unwrap();
    assert!(asm.add_value(4, 0, 1.0).is_err());
}

#[test]
fn column_without_local_mapping_is_an_error() {
    let comm = SingleProcessComm;
    let mut asm = MatrixAssembler::new(&comm, 4).unwrap();
    asm.add_value(0, 7, 1.0).unwrap();
    asm.flush(&comm).unwrap();
    let res = asm.finalize(&comm, 4, |gid| {
        let g = gid as usize;
        (g < 4).then_some(g)
    });
    assert!(res.is_err());
}
