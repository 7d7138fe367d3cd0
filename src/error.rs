use thiserror::Error;

#[derive(Debug, Error)]
pub enum FvError {
    /// Programming error at the call site: mismatched dimensions or strides,
    /// a solver applied to a matrix it was not set up for.
    #[error("Usage error: {0}")]
    Usage(String),

    /// Inconsistent parallel state: a collective entered with incompatible
    /// arguments across ranks.
    #[error("Parallel error: {0}")]
    Parallel(String),

    /// Malformed persisted data (solver monitoring stream).
    #[error("Format error: {0}")]
    Format(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, FvError>;
