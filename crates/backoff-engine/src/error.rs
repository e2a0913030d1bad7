//! Engine error types.

use std::any::Any;
use std::backtrace::Backtrace;

use thiserror::Error;

/// Why a single attempt did not succeed.
#[derive(Debug, Error)]
pub enum AttemptError {
    /// The work unit (or the gate in front of it) returned an error.
    #[error(transparent)]
    Failure(anyhow::Error),

    /// The work unit panicked and the panic was contained.
    #[error("panic: {reason}\n{backtrace}")]
    Fault { reason: String, backtrace: String },

    /// The attempt task ended without reporting a result.
    #[error("attempt canceled: {0}")]
    Canceled(String),
}

impl AttemptError {
    /// Build a `Fault` from a caught panic payload.
    ///
    /// `trace` is the stack recorded at panic time. Without one the trace
    /// is captured here, at the catch site.
    pub(crate) fn from_panic(payload: Box<dyn Any + Send>, trace: Option<Backtrace>) -> Self {
        let reason = if let Some(msg) = payload.downcast_ref::<&'static str>() {
            (*msg).to_string()
        } else if let Some(msg) = payload.downcast_ref::<String>() {
            msg.clone()
        } else {
            "unknown panic".to_string()
        };
        AttemptError::Fault {
            reason,
            backtrace: trace.unwrap_or_else(Backtrace::force_capture).to_string(),
        }
    }

    /// Whether this attempt ended in a contained panic.
    pub fn is_fault(&self) -> bool {
        matches!(self, AttemptError::Fault { .. })
    }
}

/// Terminal outcome of [`Backoff::run`](crate::Backoff::run) and
/// [`Backoff::start`](crate::Backoff::start).
#[derive(Debug, Error)]
pub enum BackoffError {
    #[error("backoff already running")]
    AlreadyRunning,

    #[error("max retry exceeded")]
    MaxRetryExceeded {
        #[source]
        last_error: AttemptError,
    },

    /// The outer cancellation token fired.
    #[error("backoff canceled")]
    Canceled,
}

pub type BackoffResult<T> = Result<T, BackoffError>;
