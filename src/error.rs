//! Error types for retry policy construction.
//!
//! Bad HTTP responses are never errors here: a 404 or a 503 is data, and it is
//! routed through an [`ErrorResolution`](crate::ErrorResolution). The errors in
//! this module describe a malformed policy, and they surface when the policy is
//! built so that a broken configuration aborts startup instead of misbehaving on
//! the first failed request.

/// The error type for building a [`RetryPolicy`](crate::RetryPolicy).
///
/// # Examples
///
/// ```
/// use rebound::{Action, Error, ResponseFilter, RetryPolicy};
///
/// let result = RetryPolicy::builder()
///     .filter(ResponseFilter::new(Action::Ignore).http_codes([999]))
///     .build();
///
/// assert!(matches!(result, Err(Error::InvalidStatusCode(999))));
/// ```
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// A filter listed a status code outside of `100..=599`.
    #[error("Invalid HTTP status code: {0}")]
    InvalidStatusCode(u16),

    /// A filter has no condition that could ever trigger it.
    ///
    /// Only the implicit catch-all filter is allowed to match unconditionally.
    #[error("Response filter has no http_codes, error_message_contains or predicate")]
    MissingCondition,

    /// A predicate expression failed to parse.
    ///
    /// # Fields
    ///
    /// * `expression` - The expression as written in the configuration
    /// * `position` - Byte offset where parsing failed
    /// * `reason` - What the parser expected
    #[error("Invalid predicate `{expression}` at position {position}: {reason}")]
    InvalidPredicate {
        /// The offending expression.
        expression: String,
        /// Byte offset of the failure.
        position: usize,
        /// Human-readable description of the failure.
        reason: String,
    },

    /// A backoff strategy was configured with a regex that does not compile.
    #[error("Invalid regex: {0}")]
    InvalidRegex(#[from] regex::Error),

    /// A backoff strategy names a header that is not a valid HTTP header name.
    #[error("Invalid header name `{name}`: {reason}")]
    InvalidHeaderName {
        /// The header name as configured.
        name: String,
        /// Why `http` rejected it.
        reason: String,
    },

    /// A duration in seconds was negative, NaN or infinite.
    #[error("Invalid duration for `{field}`: {value}")]
    InvalidDuration {
        /// Name of the configuration field.
        field: &'static str,
        /// The rejected value in seconds.
        value: f64,
    },

    /// Any other configuration problem.
    #[error("Configuration error: {0}")]
    ConfigurationError(String),
}

/// A specialized `Result` type for policy construction.
///
/// This is a convenience alias for `Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;
