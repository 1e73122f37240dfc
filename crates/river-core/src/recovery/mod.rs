//! Error recovery for store operations
//!
//! Appends and reads against the backing store are retried with exponential
//! backoff while the failure looks transient. Anything that retries through
//! [`RetryPolicy`] reports its classification via [`Retryable`].

pub mod backoff;
pub mod retry;

pub use backoff::{BackoffConfig, BackoffStrategy, ExponentialBackoff};
pub use retry::{RetryConfig, RetryPolicy, RetryResult};

use crate::backend::BackendError;
use crate::error::RiverError;

/// Error classification for recovery decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// May succeed on retry
    Transient,
    /// Will not succeed on retry
    Permanent,
    /// Retried only when the policy allows unknown errors
    Unknown,
}

/// Errors that can tell a retry policy whether another attempt makes sense
pub trait Retryable {
    fn retry_class(&self) -> ErrorClass;
}

impl Retryable for BackendError {
    fn retry_class(&self) -> ErrorClass {
        if self.is_transient() {
            ErrorClass::Transient
        } else {
            ErrorClass::Permanent
        }
    }
}

impl Retryable for RiverError {
    fn retry_class(&self) -> ErrorClass {
        match self {
            RiverError::StoreUnavailable { .. } => ErrorClass::Transient,
            RiverError::Internal(_) => ErrorClass::Unknown,
            _ => ErrorClass::Permanent,
        }
    }
}
