//! Threshold polling: turns a single-shot probe into a health source.
//!
//! Each attempt gets its own polling task. The probe runs every
//! `check_interval` (after an optional `initial_delay`) until either
//! `success_threshold` consecutive passes or `failure_threshold`
//! consecutive failures are seen. Exactly one signal is sent, then the
//! task exits.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use backoff_engine::{HealthChecker, HealthSignal};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::ProbeError;

/// Future returned by [`Probe::check`].
pub type ProbeFuture<'a> = Pin<Box<dyn Future<Output = Result<(), ProbeError>> + Send + 'a>>;

/// A single-shot health check.
///
/// Takes no cancellation token: when the attempt ends, the polling task
/// drops the in-flight future, which abandons the check.
pub trait Probe: Send + Sync + 'static {
    fn check(&self) -> ProbeFuture<'_>;
}

impl<F, Fut> Probe for F
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), ProbeError>> + Send + 'static,
{
    fn check(&self) -> ProbeFuture<'_> {
        Box::pin(self())
    }
}

/// Polling parameters.
#[derive(Debug, Clone)]
pub struct ThresholdConfig {
    pub check_interval: Duration,
    pub initial_delay: Duration,
    pub success_threshold: u32,
    pub failure_threshold: u32,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(5),
            initial_delay: Duration::ZERO,
            success_threshold: 1,
            failure_threshold: 3,
        }
    }
}

/// Where a tracker stands after recording a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Neither threshold reached yet.
    Pending,
    Healthy,
    Unhealthy,
}

/// Consecutive success/failure counter.
///
/// The two streaks are independent: a pass clears the failure streak
/// and a failure clears the success streak.
#[derive(Debug)]
pub struct ThresholdTracker {
    consecutive_successes: u32,
    consecutive_failures: u32,
    success_threshold: u32,
    failure_threshold: u32,
}

impl ThresholdTracker {
    /// Thresholds below 1 are raised to 1.
    pub fn new(success_threshold: u32, failure_threshold: u32) -> Self {
        Self {
            consecutive_successes: 0,
            consecutive_failures: 0,
            success_threshold: success_threshold.max(1),
            failure_threshold: failure_threshold.max(1),
        }
    }

    /// Record one probe outcome.
    pub fn record(&mut self, passed: bool) -> Verdict {
        if passed {
            self.consecutive_failures = 0;
            self.consecutive_successes += 1;
            if self.consecutive_successes >= self.success_threshold {
                return Verdict::Healthy;
            }
        } else {
            self.consecutive_successes = 0;
            self.consecutive_failures += 1;
            if self.consecutive_failures >= self.failure_threshold {
                return Verdict::Unhealthy;
            }
        }
        Verdict::Pending
    }

    pub fn consecutive_successes(&self) -> u32 {
        self.consecutive_successes
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }
}

/// Wrap `probe` as a per-attempt health checker.
pub fn threshold_checker<P: Probe>(probe: P, config: ThresholdConfig) -> HealthChecker {
    let probe = Arc::new(probe);
    Arc::new(move |token: CancellationToken| {
        let (tx, rx) = mpsc::channel(1);
        let probe = probe.clone();
        let config = config.clone();

        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => debug!("health polling stopped"),
                signal = poll_until_threshold(&*probe, &config) => {
                    let _ = tx.try_send(signal);
                }
            }
        });

        rx
    })
}

async fn poll_until_threshold<P: Probe + ?Sized>(probe: &P, config: &ThresholdConfig) -> HealthSignal {
    if !config.initial_delay.is_zero() {
        tokio::time::sleep(config.initial_delay).await;
    }

    let mut tracker = ThresholdTracker::new(config.success_threshold, config.failure_threshold);
    loop {
        match probe.check().await {
            Ok(()) => {
                if tracker.record(true) == Verdict::Healthy {
                    debug!(successes = tracker.consecutive_successes(), "probe reached success threshold");
                    return HealthSignal::Reset;
                }
            }
            Err(e) => {
                debug!(error = %e, failures = tracker.consecutive_failures() + 1, "probe failed");
                if tracker.record(false) == Verdict::Unhealthy {
                    return HealthSignal::Abort(e.into());
                }
            }
        }

        tokio::time::sleep(config.check_interval).await;
    }
}
