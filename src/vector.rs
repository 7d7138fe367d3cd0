//! Dense vector kernels shared by the solver family.
//!
//! Vectors are plain `f64` slices. Dot products and norms take the number of
//! owned entries explicitly so that ghost-padded vectors are never double
//! counted, and go through the communication backend for the global sum.

use crate::comm::CommBackend;

/// Local dot product over the first `n` entries.
pub fn dot_local(x: &[f64], y: &[f64], n: usize) -> f64 {
    let mut s = 0.0;
    for k in 0..n {
        s += x[k] * y[k];
    }
    s
}

/// Global dot product over owned entries.
pub fn dot(comm: &dyn CommBackend, x: &[f64], y: &[f64], n_owned: usize) -> f64 {
    comm.all_reduce_sum(dot_local(x, y, n_owned))
}

/// Global 2-norm over owned entries.
pub fn norm2(comm: &dyn CommBackend, x: &[f64], n_owned: usize) -> f64 {
    comm.all_reduce_sum(dot_local(x, x, n_owned)).sqrt()
}

/// y += alpha * x
pub fn axpy(alpha: f64, x: &[f64], y: &mut [f64]) {
    for (yi, xi) in y.iter_mut().zip(x.iter()) {
        *yi += alpha * xi;
    }
}

/// x *= alpha
pub fn scale(alpha: f64, x: &mut [f64]) {
    for xi in x.iter_mut() {
        *xi *= alpha;
    }
}

/// y = x
pub fn copy(x: &[f64], y: &mut [f64]) {
    y.copy_from_slice(x);
}
