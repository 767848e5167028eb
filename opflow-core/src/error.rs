//! Operation error taxonomy and retry classification.
//!
//! This module provides the core error types used across the pipeline:
//! - [`ErrorClass`]: retry classification consumed by the retry layer
//! - [`OperationError`]: the error type for pipeline operations

use http::StatusCode;

/// Retry classification for a failed attempt.
///
/// The retry layer never inspects concrete error variants; it acts on the
/// class reported by [`OperationError::class`] (or an injected classifier).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorClass {
    /// Transient condition (connection reset, 5xx) that may succeed on retry.
    Transient,
    /// The server asked us to slow down (429, throttling error codes).
    Throttling,
    /// The attempt timed out before a response was observed.
    Timeout,
    /// Retrying would reproduce the same failure.
    NonRetryable,
}

impl ErrorClass {
    /// Returns whether this class permits another attempt.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ErrorClass::NonRetryable)
    }
}

/// Error type for pipeline operations.
///
/// The taxonomy distinguishes configuration mistakes (never retried),
/// transport and service failures (retried per their [`ErrorClass`]),
/// serialization failures (never retried: a retry would reproduce them),
/// checksum mismatches (data corruption, always fatal), and pipeline
/// invariant violations (defects, always fatal).
#[derive(Clone, Debug, thiserror::Error)]
pub enum OperationError {
    /// Invalid configuration: unknown middleware id, unresolvable retry
    /// partition, missing required context value.
    #[error("configuration error: {0}")]
    Config(String),

    /// Transport-level failure (connection refused, reset, timeout).
    #[error("transport error: {message}")]
    Transport {
        message: String,
        class: ErrorClass,
    },

    /// A non-2xx response deserialized into a service error.
    #[error("service error ({status}): {message}")]
    Service {
        status: StatusCode,
        message: String,
        class: ErrorClass,
    },

    /// Input serialization failed.
    #[error("serialize error: {0}")]
    Serialize(String),

    /// Response deserialization failed.
    #[error("deserialize error: {0}")]
    Deserialize(String),

    /// A computed digest disagreed with the expected one.
    #[error("checksum mismatch: expected {expected}, computed {computed}")]
    ChecksumMismatch { expected: String, computed: String },

    /// The pipeline violated one of its own invariants. Always a defect.
    #[error("pipeline invariant violated: {0}")]
    Invariant(String),

    /// The retry budget was exhausted; carries the final attempt's error.
    #[error("retries exhausted after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: Box<OperationError>,
    },
}

impl OperationError {
    /// Create a configuration error.
    pub fn config<S: Into<String>>(message: S) -> Self {
        OperationError::Config(message.into())
    }

    /// Create a transient transport error.
    pub fn transport<S: Into<String>>(message: S) -> Self {
        OperationError::Transport {
            message: message.into(),
            class: ErrorClass::Transient,
        }
    }

    /// Create a transport timeout error.
    pub fn timeout<S: Into<String>>(message: S) -> Self {
        OperationError::Transport {
            message: message.into(),
            class: ErrorClass::Timeout,
        }
    }

    /// Create a service error classified from its HTTP status.
    ///
    /// 429 classifies as throttling, other 5xx as transient, everything else
    /// as non-retryable.
    pub fn service<S: Into<String>>(status: StatusCode, message: S) -> Self {
        let class = if status == StatusCode::TOO_MANY_REQUESTS {
            ErrorClass::Throttling
        } else if status.is_server_error() {
            ErrorClass::Transient
        } else {
            ErrorClass::NonRetryable
        };
        OperationError::Service {
            status,
            message: message.into(),
            class,
        }
    }

    /// Create a throttling service error.
    pub fn throttled<S: Into<String>>(message: S) -> Self {
        OperationError::Service {
            status: StatusCode::TOO_MANY_REQUESTS,
            message: message.into(),
            class: ErrorClass::Throttling,
        }
    }

    /// Create a serialization error.
    pub fn serialize<S: Into<String>>(message: S) -> Self {
        OperationError::Serialize(message.into())
    }

    /// Create a deserialization error.
    pub fn deserialize<S: Into<String>>(message: S) -> Self {
        OperationError::Deserialize(message.into())
    }

    /// Create a pipeline invariant violation.
    pub fn invariant<S: Into<String>>(message: S) -> Self {
        OperationError::Invariant(message.into())
    }

    /// Get the retry classification of this error.
    pub fn class(&self) -> ErrorClass {
        match self {
            OperationError::Transport { class, .. } | OperationError::Service { class, .. } => {
                *class
            }
            OperationError::Config(_)
            | OperationError::Serialize(_)
            | OperationError::Deserialize(_)
            | OperationError::ChecksumMismatch { .. }
            | OperationError::Invariant(_)
            | OperationError::RetriesExhausted { .. } => ErrorClass::NonRetryable,
        }
    }

    /// Returns whether this error indicates a transient condition that may be
    /// resolved by retrying.
    ///
    /// # Example
    ///
    /// ```
    /// use opflow_core::OperationError;
    ///
    /// assert!(OperationError::transport("connection reset").is_retryable());
    /// assert!(!OperationError::config("unknown middleware id").is_retryable());
    /// ```
    pub fn is_retryable(&self) -> bool {
        self.class().is_retryable()
    }
}
