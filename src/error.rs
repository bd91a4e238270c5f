//! Error types for cache construction and invariant checking.
//!
//! A cache miss is not an error: lookups return `Option`. The variants here
//! cover rejected configuration and the debug-time invariant checks exposed
//! by [`LruCachePolicy::check_invariants`](crate::LruCachePolicy::check_invariants).

/// Result type alias for fallible cache operations.
pub type Result<T> = std::result::Result<T, CacheError>;

/// Errors reported by the cache layer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CacheError {
    /// A construction parameter was rejected.
    #[error("invalid cache configuration: {message}")]
    InvalidConfig { message: String },

    /// The lookup table and recency list disagree.
    #[error("cache invariant violated: {message}")]
    InvariantViolation { message: String },
}

impl CacheError {
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    pub fn invariant(message: impl Into<String>) -> Self {
        Self::InvariantViolation {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_message() {
        let err = CacheError::invalid_config("capacity must be positive");
        assert_eq!(
            err.to_string(),
            "invalid cache configuration: capacity must be positive"
        );

        let err = CacheError::invariant("map has 3 entries, list has 2");
        assert!(err.to_string().contains("map has 3 entries"));
    }

    #[test]
    fn test_implements_std_error() {
        fn assert_error<T: std::error::Error + Send + Sync + 'static>() {}
        assert_error::<CacheError>();
    }
}
