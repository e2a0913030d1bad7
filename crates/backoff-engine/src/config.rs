//! Engine configuration.

use std::fmt;
use std::time::Duration;

use tracing::Span;

use crate::gate::Gate;
use crate::monitor::HealthChecker;

pub const DEFAULT_INITIAL_DURATION: Duration = Duration::from_secs(1);
pub const DEFAULT_MAX_DURATION: Duration = Duration::from_secs(20 * 60);

/// Retry and wait-growth parameters for a [`Backoff`](crate::Backoff).
///
/// The wait after a failure grows as
/// `next = (last + inter_const_factor) * 2^exponent_factor + outer_const_factor`
/// and never exceeds `max_duration`.
#[derive(Clone)]
pub struct BackoffConfig {
    /// First wait, and the value a healthy signal resets the wait to.
    pub initial_duration: Duration,
    /// Ceiling for the wait.
    pub max_duration: Duration,
    /// Retries allowed after the first attempt. `0` means unlimited.
    pub max_retry: u32,
    /// Non-positive values are treated as 1.
    pub exponent_factor: i32,
    pub inter_const_factor: Duration,
    pub outer_const_factor: Duration,
    /// Let panics in the work unit propagate instead of retrying them.
    pub disable_recovery: bool,
    /// Per-attempt health source.
    pub health_checker: Option<HealthChecker>,
    /// Run once, lazily, in front of the work unit until it succeeds.
    pub gate: Option<Gate>,
    /// Span every engine event is recorded under.
    pub span: Span,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_duration: DEFAULT_INITIAL_DURATION,
            max_duration: DEFAULT_MAX_DURATION,
            max_retry: 0,
            exponent_factor: 1,
            inter_const_factor: Duration::ZERO,
            outer_const_factor: Duration::ZERO,
            disable_recovery: false,
            health_checker: None,
            gate: None,
            span: tracing::info_span!("backoff"),
        }
    }
}

impl BackoffConfig {
    pub fn with_health_checker(mut self, checker: HealthChecker) -> Self {
        self.health_checker = Some(checker);
        self
    }

    pub fn with_gate(mut self, gate: Gate) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Fill zero durations and a non-positive exponent with defaults.
    pub(crate) fn normalized(mut self) -> Self {
        if self.initial_duration.is_zero() {
            self.initial_duration = DEFAULT_INITIAL_DURATION;
        }
        if self.max_duration.is_zero() {
            self.max_duration = DEFAULT_MAX_DURATION;
        }
        if self.exponent_factor <= 0 {
            self.exponent_factor = 1;
        }
        self
    }

    /// Wait that follows `last`, clamped to `max_duration`.
    ///
    /// Once `last` has reached the ceiling it stays there.
    pub fn next_wait(&self, last: Duration) -> Duration {
        let max = self.max_duration;
        if last >= max {
            return max;
        }

        let exponent = self.exponent_factor.max(1) as u32;
        let next = last
            .checked_add(self.inter_const_factor)
            .map(|base| base.as_nanos())
            .zip(2u128.checked_pow(exponent))
            .and_then(|(base, factor)| base.checked_mul(factor))
            .and_then(|grown| grown.checked_add(self.outer_const_factor.as_nanos()));

        match next {
            Some(nanos) if nanos < max.as_nanos() => {
                u64::try_from(nanos).map(Duration::from_nanos).unwrap_or(max)
            }
            _ => max,
        }
    }
}

impl fmt::Debug for BackoffConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackoffConfig")
            .field("initial_duration", &self.initial_duration)
            .field("max_duration", &self.max_duration)
            .field("max_retry", &self.max_retry)
            .field("exponent_factor", &self.exponent_factor)
            .field("inter_const_factor", &self.inter_const_factor)
            .field("outer_const_factor", &self.outer_const_factor)
            .field("disable_recovery", &self.disable_recovery)
            .field("health_checker", &self.health_checker.is_some())
            .field("gate", &self.gate.is_some())
            .finish()
    }
}
