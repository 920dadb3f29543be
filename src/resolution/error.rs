//! Resolution manager error types
//!
//! `CancelledFetch` is an expected outcome of superseding a request and is
//! never shown to users; callers drop it after a generation check.

use crate::cache::ChunkId;
use crate::data::ProviderError;
use thiserror::Error;

/// Errors that can occur in the resolution manager
#[derive(Error, Debug)]
pub enum ResolutionError {
    /// Data provider failed to answer a query
    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(#[from] ProviderError),

    /// Superseded by a newer request
    #[error("Fetch cancelled (generation {generation})")]
    CancelledFetch { generation: u64 },

    /// Chunk id outside the chunk index
    #[error("Stale chunk: {0}")]
    StaleChunk(ChunkId),

    /// Cache grew past its capacity
    #[error("Cache corruption: {len} entries exceed capacity {capacity}")]
    CacheCorruption { len: usize, capacity: usize },

    /// Domain with start >= end
    #[error("Invalid domain: [{start}, {end})")]
    InvalidDomain { start: i64, end: i64 },

    /// Configuration values violate their relationships
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl ResolutionError {
    /// Whether this error is a normal superseded-request outcome
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ResolutionError::CancelledFetch { .. })
    }
}

/// Result type alias for resolution operations
pub type ResolutionResult<T> = Result<T, ResolutionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ResolutionError::StaleChunk(ChunkId(60));
        assert_eq!(err.to_string(), "Stale chunk: chunk@60");

        let err = ResolutionError::CacheCorruption {
            len: 51,
            capacity: 50,
        };
        assert_eq!(
            err.to_string(),
            "Cache corruption: 51 entries exceed capacity 50"
        );
    }

    #[test]
    fn test_provider_error_conversion() {
        let err: ResolutionError = ProviderError::Unavailable("down".to_string()).into();
        assert!(matches!(err, ResolutionError::ProviderUnavailable(_)));
        assert!(!err.is_cancelled());
        assert!(ResolutionError::CancelledFetch { generation: 3 }.is_cancelled());
    }
}
