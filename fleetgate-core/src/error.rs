//! Validation errors for caller-supplied values.

/// A value supplied by a caller failed validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum ValidationError {
    #[error("ttl must be positive")]
    NonPositiveTtl,

    #[error("ttl exceeds maximum of {max_secs}s")]
    TtlTooLong { max_secs: i64 },

    #[error("invalid token id")]
    InvalidTokenId,

    #[error("invalid cluster id: {0}")]
    InvalidClusterId(&'static str),

    #[error("invalid label key {key:?}: {reason}")]
    InvalidLabelKey { key: String, reason: &'static str },

    #[error("invalid label value for {key:?}: {reason}")]
    InvalidLabelValue { key: String, reason: &'static str },

    #[error("too many labels: {count} (max {max})")]
    TooManyLabels { count: usize, max: usize },
}
