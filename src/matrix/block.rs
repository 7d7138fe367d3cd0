//! Dense kernels for fixed-size diagonal blocks.
//!
//! Diagonal blocks are stored row-major. 3x3 blocks are inverted in closed
//! form; other sizes fall back to an in-place LU without pivoting — the
//! assembly layer guarantees diagonally-scaled non-singular blocks.

use crate::error::{FvError, Result};
use rayon::prelude::*;

/// y = B x for one row-major db x db block.
#[inline]
pub fn block_mul(db: usize, b: &[f64], x: &[f64], y: &mut [f64]) {
    for r in 0..db {
        let mut s = 0.0;
        for c in 0..db {
            s += b[r * db + c] * x[c];
        }
        y[r] = s;
    }
}

/// Closed-form inverse of a row-major 3x3 block.
fn invert_3x3(b: &mut [f64]) -> Result<()> {
    let m = <[f64; 9]>::try_from(&b[..9]).unwrap();
    let c00 = m[4] * m[8] - m[5] * m[7];
    let c01 = m[5] * m[6] - m[3] * m[8];
    let c02 = m[3] * m[7] - m[4] * m[6];
    let det = m[0] * c00 + m[1] * c01 + m[2] * c02;
    if det.abs() < f64::MIN_POSITIVE * 8.0 {
        return Err(FvError::Usage("singular 3x3 diagonal block".into()));
    }
    let inv = 1.0 / det;
    b[0] = c00 * inv;
    b[1] = (m[2] * m[7] - m[1] * m[8]) * inv;
    b[2] = (m[1] * m[5] - m[2] * m[4]) * inv;
    b[3] = c01 * inv;
    b[4] = (m[0] * m[8] - m[2] * m[6]) * inv;
    b[5] = (m[2] * m[3] - m[0] * m[5]) * inv;
    b[6] = c02 * inv;
    b[7] = (m[1] * m[6] - m[0] * m[7]) * inv;
    b[8] = (m[0] * m[4] - m[1] * m[3]) * inv;
    Ok(())
}

/// In-place inverse via LU without pivoting (Gauss-Jordan form).
fn invert_lu(db: usize, b: &mut [f64]) -> Result<()> {
    let n = db;
    let mut inv = vec![0.0; n * n];
    for i in 0..n {
        inv[i * n + i] = 1.0;
    }
    for col in 0..n {
        let pivot = b[col * n + col];
        if pivot.abs() < f64::MIN_POSITIVE * 8.0 {
            return Err(FvError::Usage(format!(
                "near-zero pivot in {n}x{n} diagonal block"
            )));
        }
        let pinv = 1.0 / pivot;
        for j in 0..n {
            b[col * n + j] *= pinv;
            inv[col * n + j] *= pinv;
        }
        for row in 0..n {
            if row == col {
                continue;
            }
            let f = b[row * n + col];
            if f == 0.0 {
                continue;
            }
            for j in 0..n {
                b[row * n + j] -= f * b[col * n + j];
                inv[row * n + j] -= f * inv[col * n + j];
            }
        }
    }
    b.copy_from_slice(&inv);
    Ok(())
}

/// Invert one diagonal block in place.
pub fn invert_block(db: usize, b: &mut [f64]) -> Result<()> {
    match db {
        1 => {
            if b[0].abs() < f64::MIN_POSITIVE * 8.0 {
                return Err(FvError::Usage("zero scalar diagonal".into()));
            }
            b[0] = 1.0 / b[0];
            Ok(())
        }
        3 => invert_3x3(b),
        _ => invert_lu(db, b),
    }
}

/// Invert every block of a block-diagonal array (`n` blocks of db x db),
/// returning the inverses and the worst condition estimate
/// (infinity-norm of the block times infinity-norm of its inverse).
pub fn invert_block_diag(db: usize, diag: &[f64]) -> Result<(Vec<f64>, f64)> {
    let bs = db * db;
    debug_assert_eq!(diag.len() % bs, 0);
    let results: Vec<Result<(Vec<f64>, f64)>> = diag
        .par_chunks(bs)
        .map(|block| {
            let norm_a = inf_norm(db, block);
            let mut inv = block.to_vec();
            invert_block(db, &mut inv)?;
            let cond = norm_a * inf_norm(db, &inv);
            Ok((inv, cond))
        })
        .collect();
    let mut out = Vec::with_capacity(diag.len());
    let mut worst = 0.0f64;
    for r in results {
        let (inv, cond) = r?;
        out.extend_from_slice(&inv);
        worst = worst.max(cond);
    }
    Ok((out, worst))
}

fn inf_norm(db: usize, b: &[f64]) -> f64 {
    (0..db)
        .map(|r| (0..db).map(|c| b[r * db + c].abs()).sum::<f64>())
        .fold(0.0, f64::max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn inverse_3x3_recovers_identity() {
        let a = [4.0, 1.0, 0.0, 1.0, 5.0, 2.0, 0.0, 2.0, 6.0];
        let mut inv = a;
        invert_block(3, &mut inv).unwrap();
        // A * inv(A) = I
        for r in 0..3 {
            for c in 0..3 {
                let mut s = 0.0;
                for k in 0..3 {
                    s += a[r * 3 + k] * inv[k * 3 + c];
                }
                let expect = if r == c { 1.0 } else { 0.0 };
                assert_abs_diff_eq!(s, expect, epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn inverse_6x6_via_lu() {
        // Diagonally dominant 6x6.
        let n = 6;
        let mut a = vec![0.0; n * n];
        for r in 0..n {
            for c in 0..n {
                a[r * n + c] = if r == c { 10.0 + r as f64 } else { 1.0 / (1 + r + c) as f64 };
            }
        }
        let mut inv = a.clone();
        invert_block(n, &mut inv).unwrap();
        for r in 0..n {
            for c in 0..n {
                let mut s = 0.0;
                for k in 0..n {
                    s += a[r * n + k] * inv[k * n + c];
                }
                let expect = if r == c { 1.0 } else { 0.0 };
                assert_abs_diff_eq!(s, expect, epsilon = 1e-10);
            }
        }
    }

    #[test]
    fn singular_block_is_an_error() {
        let mut a = [1.0, 2.0, 3.0, 2.0, 4.0, 6.0, 0.0, 0.0, 1.0];
        assert!(invert_block(3, &mut a).is_err());
    }

    #[test]
    fn block_diag_inverse_and_condition() {
        // Two well-conditioned scalar blocks.
        let (inv, cond) = invert_block_diag(1, &[2.0, 4.0]).unwrap();
        assert_abs_diff_eq!(inv[0], 0.5);
        assert_abs_diff_eq!(inv[1], 0.25);
        assert_abs_diff_eq!(cond, 1.0, epsilon = 1e-15);
    }
}
