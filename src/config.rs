//! Process-wide tuning knobs, read once from the environment.
//!
//! All knobs are optional and carry defaults. A `CoreConfig` is built at
//! initialization and threaded by reference; it is never mutated after the
//! first solver is constructed.

use crate::error::{FvError, Result};
use crate::matrix::BackendKind;

/// Default minimum collective buffer size: 1 MiB.
pub const DEFAULT_MIN_COLL_BUF_SIZE: usize = 1 << 20;

/// Default cap on the number of multigrid levels.
pub const DEFAULT_AMG_MAX_LEVELS: usize = 25;

/// Default merge tolerance for periodic matches.
pub const DEFAULT_PERIODICITY_EPS: f64 = 1e-3;

#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// Minimum block size heuristic for part-to-block, in bytes
    /// (`CORE_MIN_COLL_BUF_SIZE`).
    pub min_coll_buf_size: usize,
    /// Default matrix back-end (`CORE_MATRIX_BACKEND`).
    pub matrix_backend: BackendKind,
    /// Maximum AMG hierarchy depth (`CORE_AMG_MAX_LEVELS`).
    pub amg_max_levels: usize,
    /// Device offload request (`CORE_SPMV_USE_DEVICE`). Accepted for forward
    /// compatibility; this build executes on the host only.
    pub spmv_use_device: bool,
    /// Merge tolerance for periodic matches (`CORE_PERIODICITY_EPS`).
    pub periodicity_eps: f64,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            min_coll_buf_size: DEFAULT_MIN_COLL_BUF_SIZE,
            matrix_backend: BackendKind::Msr,
            amg_max_levels: DEFAULT_AMG_MAX_LEVELS,
            spmv_use_device: false,
            periodicity_eps: DEFAULT_PERIODICITY_EPS,
        }
    }
}

impl CoreConfig {
    /// Read the configuration from the environment. Unset variables keep
    /// their defaults; a variable that is set but unparsable is a usage error.
    pub fn from_env() -> Result<Self> {
        let mut cfg = Self::default();
        if let Some(v) = read_var("CORE_MIN_COLL_BUF_SIZE")? {
            cfg.min_coll_buf_size = v
                .parse::<usize>()
                .map_err(|_| bad_value("CORE_MIN_COLL_BUF_SIZE", &v))?;
        }
        if let Some(v) = read_var("CORE_MATRIX_BACKEND")? {
            cfg.matrix_backend = match v.as_str() {
                "msr" => BackendKind::Msr,
                "dist" => BackendKind::Dist,
                "native" => BackendKind::Native,
                _ => return Err(bad_value("CORE_MATRIX_BACKEND", &v)),
            };
        }
        if let Some(v) = read_var("CORE_AMG_MAX_LEVELS")? {
            cfg.amg_max_levels = v
                .parse::<usize>()
                .map_err(|_| bad_value("CORE_AMG_MAX_LEVELS", &v))?;
        }
        if let Some(v) = read_var("CORE_SPMV_USE_DEVICE")? {
            cfg.spmv_use_device = match v.as_str() {
                "1" | "true" | "yes" => true,
                "0" | "false" | "no" => false,
                _ => return Err(bad_value("CORE_SPMV_USE_DEVICE", &v)),
            };
            if cfg.spmv_use_device {
                tracing::warn!("CORE_SPMV_USE_DEVICE requested but this build is host-only");
            }
        }
        if let Some(v) = read_var("CORE_PERIODICITY_EPS")? {
            cfg.periodicity_eps = v
                .parse::<f64>()
                .map_err(|_| bad_value("CORE_PERIODICITY_EPS", &v))?;
        }
        Ok(cfg)
    }
}

fn read_var(name: &str) -> Result<Option<String>> {
    match std::env::var(name) {
        Ok(v) => Ok(Some(v)),
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(std::env::VarError::NotUnicode(_)) => {
            Err(FvError::Usage(format!("{name} is not valid unicode")))
        }
    }
}

fn bad_value(name: &str, value: &str) -> FvError {
    FvError::Usage(format!("invalid value for {name}: {value:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = CoreConfig::default();
        assert_eq!(cfg.min_coll_buf_size, 1 << 20);
        assert_eq!(cfg.matrix_backend, BackendKind::Msr);
        assert_eq!(cfg.amg_max_levels, 25);
        assert!(!cfg.spmv_use_device);
        assert_eq!(cfg.periodicity_eps, 1e-3);
    }
}
