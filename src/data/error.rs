//! Data provider error types

use thiserror::Error;

/// Errors a data provider can report
#[derive(Error, Debug)]
pub enum ProviderError {
    /// Backing store could not answer (network, storage, etc.)
    #[error("Provider unavailable: {0}")]
    Unavailable(String),

    /// I/O operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV parsing failed
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Source data is malformed or empty
    #[error("Invalid data: {0}")]
    InvalidData(String),
}

/// Result type alias for provider operations
pub type ProviderResult<T> = Result<T, ProviderError>;
