//! Self-healing retry loop.
//!
//! Repeatedly runs a unit of work until it succeeds, waiting between
//! failures for an interval that grows by
//! `next = (last + inter) * 2^exponent + outer`, capped at `max_duration`.
//! An optional health checker observes each live attempt and can either
//! collapse the wait back to `initial_duration` or abort the attempt.
//!
//! # Architecture
//!
//! ```text
//! Backoff::run(token)
//!   └── per iteration
//!       ├── child token (attempt scope)
//!       ├── attempt task ── gate → work(token) ── oneshot result
//!       │     └── catch_unwind → AttemptError::Fault
//!       └── monitor task (if health_checker)
//!             ├── HealthSignal::Reset → reset-wait channel
//!             └── HealthSignal::Abort → cancel attempt token
//! ```
//!
//! Only retry exhaustion and outer cancellation end `run`; every other
//! failure is logged and retried.

pub mod attempt;
pub mod config;
pub mod engine;
pub mod error;
mod fault;
pub mod gate;
pub mod monitor;

pub use attempt::AttemptResult;
pub use config::{BackoffConfig, DEFAULT_INITIAL_DURATION, DEFAULT_MAX_DURATION};
pub use engine::Backoff;
pub use error::{AttemptError, BackoffError, BackoffResult};
pub use gate::{Gate, OnceGate};
pub use monitor::{HealthChecker, HealthSignal};

/// Boxed, sendable future returned by work units, gates and probes.
pub type BoxFuture<T> = std::pin::Pin<Box<dyn std::future::Future<Output = T> + Send>>;

/// Unit of work retried by the engine.
///
/// Receives the attempt's cancellation token and must return promptly
/// once it is cancelled.
pub type WorkFn =
    std::sync::Arc<dyn Fn(tokio_util::sync::CancellationToken) -> BoxFuture<anyhow::Result<()>> + Send + Sync>;

pub use tokio_util::sync::CancellationToken;
