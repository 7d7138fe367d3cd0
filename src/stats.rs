//! Performance statistics collection for solver runs.

use std::time::{Duration, Instant};

/// Length of the residual history ring.
const RESIDUAL_RING: usize = 32;

/// Collects phase timings and iteration counters across solves.
///
/// Threaded as `Option<&mut SolveStats>`. Zero cost when `None` — no timing
/// calls, no counter increments.
pub struct SolveStats {
    total_start: Instant,
    // Phase accumulators (set by callers via start/stop helpers)
    pub setup: Duration,
    pub smoothing: Duration,
    pub coarse_solve: Duration,
    pub spmv: Duration,
    pub reductions: Duration,
    // Counters
    pub solves: u32,
    pub iterations: u64,
    pub halo_exchanges: u64,
    // Last residuals, newest at the end, capped ring
    pub residual_ring: Vec<f64>,
}

impl Default for SolveStats {
    fn default() -> Self {
        Self::new()
    }
}

impl SolveStats {
    pub fn new() -> Self {
        Self {
            total_start: Instant::now(),
            setup: Duration::ZERO,
            smoothing: Duration::ZERO,
            coarse_solve: Duration::ZERO,
            spmv: Duration::ZERO,
            reductions: Duration::ZERO,
            solves: 0,
            iterations: 0,
            halo_exchanges: 0,
            residual_ring: Vec::new(),
        }
    }

    pub fn push_residual(&mut self, r: f64) {
        if self.residual_ring.len() == RESIDUAL_RING {
            self.residual_ring.remove(0);
        }
        self.residual_ring.push(r);
    }

    /// Print the stats table to stderr.
    pub fn display(&self) {
        let total = self.total_start.elapsed();
        eprintln!();
        eprintln!("=== Solver Performance Stats ===");
        eprintln!("  Setup:                  {:>8.3}s", self.setup.as_secs_f64());
        eprintln!("  Smoothing:              {:>8.3}s", self.smoothing.as_secs_f64());
        eprintln!("  Coarse solve:           {:>8.3}s", self.coarse_solve.as_secs_f64());
        eprintln!("  SpMV:                   {:>8.3}s", self.spmv.as_secs_f64());
        eprintln!("  Reductions:             {:>8.3}s", self.reductions.as_secs_f64());
        eprintln!("  Solves:                 {}", self.solves);
        eprintln!("  Iterations:             {}", self.iterations);
        eprintln!("  Halo exchanges:         {}", self.halo_exchanges);
        if let Some(r) = self.residual_ring.last() {
            eprintln!("  Last residual:          {r:.3e}");
        }
        eprintln!("  Total:                  {:>8.3}s", total.as_secs_f64());
    }
}

/// Time one phase and add the elapsed duration to an accumulator when
/// stats collection is on.
pub fn timed<T>(acc: Option<&mut Duration>, f: impl FnOnce() -> T) -> T {
    match acc {
        Some(acc) => {
            let start = Instant::now();
            let out = f();
            *acc += start.elapsed();
            out
        }
        None => f(),
    }
}
