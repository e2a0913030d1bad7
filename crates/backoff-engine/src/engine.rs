//! The outer retry loop.
//!
//! Each iteration spawns one attempt (and its health monitor), waits for
//! the attempt result while honouring wait resets, then either returns or
//! sleeps for the current wait and grows it.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error};

use crate::attempt::{AttemptScope, spawn_attempt};
use crate::config::BackoffConfig;
use crate::error::{BackoffError, BackoffResult};
use crate::gate::OnceGate;
use crate::monitor::spawn_monitor;
use crate::{BoxFuture, WorkFn};

/// Self-healing retry engine.
///
/// Cloning is cheap; clones share the work unit, the gate state and the
/// running flag used by [`Backoff::start`].
#[derive(Clone)]
pub struct Backoff {
    config: Arc<BackoffConfig>,
    work: WorkFn,
    gate: Option<OnceGate>,
    running: Arc<AtomicBool>,
}

impl Backoff {
    /// Create an engine for `work`.
    ///
    /// Zero durations and a non-positive exponent are replaced with the
    /// defaults (1s initial, 20m max, exponent 1).
    pub fn new<F, Fut>(work: F, config: BackoffConfig) -> Self
    where
        F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let work: WorkFn = Arc::new(move |token| -> BoxFuture<anyhow::Result<()>> { Box::pin(work(token)) });
        let config = config.normalized();
        let gate = config.gate.clone().map(OnceGate::new);
        Self {
            config: Arc::new(config),
            work,
            gate,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn config(&self) -> &BackoffConfig {
        &self.config
    }

    /// Whether a run started through [`Backoff::start`] is still active.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Wait that follows `last` under this engine's growth formula.
    pub fn next_wait(&self, last: Duration) -> Duration {
        self.config.next_wait(last)
    }

    /// Run in the background. Returns immediately.
    ///
    /// Fails with [`BackoffError::AlreadyRunning`] while a previous
    /// background run has not returned. Must be called within a tokio
    /// runtime.
    pub fn start(&self, token: CancellationToken) -> BackoffResult<()> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(BackoffError::AlreadyRunning);
        }

        let engine = self.clone();
        tokio::spawn(async move {
            let _running = RunningGuard(engine.running.clone());
            if let Err(e) = engine.run(token).await {
                debug!(error = %e, "background run ended");
            }
        });
        Ok(())
    }

    /// Run until the work unit succeeds, the retry budget is exhausted,
    /// or `token` is cancelled.
    ///
    /// Dropping the returned future cancels the live attempt.
    pub async fn run(&self, token: CancellationToken) -> BackoffResult<()> {
        let span = self.config.span.clone();
        self.run_loop(token).instrument(span).await
    }

    async fn run_loop(&self, token: CancellationToken) -> BackoffResult<()> {
        let config = &*self.config;
        // The first attempt is free.
        let mut retries = (config.max_retry != 0).then(|| config.max_retry.saturating_add(1));
        let mut wait = config.initial_duration;

        debug!("backoff started");

        loop {
            let (reset_tx, mut reset_rx) = mpsc::channel(1);
            let attempt_token = token.child_token();
            let _attempt_guard = attempt_token.clone().drop_guard();

            let mut attempt = spawn_attempt(
                self.work.clone(),
                self.gate.clone(),
                attempt_token.clone(),
                !config.disable_recovery,
                config.span.clone(),
            );
            if let Some(checker) = &config.health_checker {
                let scope = AttemptScope {
                    reset_wait: reset_tx,
                    cancel: attempt_token,
                };
                spawn_monitor(checker.clone(), scope, config.span.clone());
            }

            let result = loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        debug!("backoff canceled");
                        return Err(BackoffError::Canceled);
                    }
                    Some(()) = reset_rx.recv() => {
                        wait = config.initial_duration;
                    }
                    result = attempt.wait() => break result,
                }
            };

            let err = match result {
                Ok(()) => {
                    debug!("backoff finished");
                    return Ok(());
                }
                Err(err) => err,
            };

            match retries {
                Some(rest) => error!(
                    error = %err,
                    wait = ?wait,
                    retries_remaining = rest - 1,
                    "attempt failed"
                ),
                None => error!(error = %err, wait = ?wait, "attempt failed"),
            }

            if let Some(rest) = retries.as_mut() {
                *rest -= 1;
                if *rest == 0 {
                    error!("max retry exceeded");
                    return Err(BackoffError::MaxRetryExceeded { last_error: err });
                }
            }

            tokio::select! {
                _ = token.cancelled() => {
                    debug!("backoff canceled");
                    return Err(BackoffError::Canceled);
                }
                _ = tokio::time::sleep(wait) => {}
            }

            wait = config.next_wait(wait);
        }
    }
}

/// Clears the running flag when the background run ends, panics included.
struct RunningGuard(Arc<AtomicBool>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_applies_defaults() {
        let engine = Backoff::new(
            |_| async { Ok(()) },
            BackoffConfig {
                initial_duration: Duration::ZERO,
                max_duration: Duration::ZERO,
                exponent_factor: 0,
                ..BackoffConfig::default()
            },
        );
        assert_eq!(engine.config().initial_duration, Duration::from_secs(1));
        assert_eq!(engine.config().max_duration, Duration::from_secs(20 * 60));
        assert_eq!(engine.next_wait(Duration::from_secs(3)), Duration::from_secs(6));
        assert!(!engine.is_running());
    }

    #[test]
    fn clones_share_running_flag() {
        let engine = Backoff::new(|_| async { Ok(()) }, BackoffConfig::default());
        let clone = engine.clone();
        engine.running.store(true, Ordering::Release);
        assert!(clone.is_running());
        assert!(matches!(
            clone.start(CancellationToken::new()),
            Err(BackoffError::AlreadyRunning)
        ));
    }
}
