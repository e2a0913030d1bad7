//! Health monitor for one live attempt.
//!
//! The health checker is invoked once per attempt and hands back a
//! receiver. A `Reset` collapses the engine's wait interval; an `Abort`
//! cancels the attempt (not the engine), which then fails and goes
//! through the normal backoff path.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span, debug, warn};

use crate::attempt::AttemptScope;

/// Signal produced by a health source for the attempt it watches.
#[derive(Debug)]
pub enum HealthSignal {
    /// The attempt is healthy; reset the wait interval.
    Reset,
    /// The attempt is unhealthy; cancel it.
    Abort(anyhow::Error),
}

/// Factory for a per-attempt health source.
///
/// Receives a token that is cancelled when the attempt ends. The source
/// should deliver at most one signal and stop when the token fires.
pub type HealthChecker = Arc<dyn Fn(CancellationToken) -> mpsc::Receiver<HealthSignal> + Send + Sync>;

/// Spawn a monitor for the attempt described by `scope`.
pub(crate) fn spawn_monitor(checker: HealthChecker, scope: AttemptScope, span: Span) -> JoinHandle<()> {
    tokio::spawn(
        async move {
            // Stops the health source as soon as monitoring ends.
            let source_token = scope.cancel.child_token();
            let _source_guard = source_token.clone().drop_guard();
            let signals = checker(source_token);
            watch_attempt(signals, scope).await;
        }
        .instrument(span),
    )
}

async fn watch_attempt(mut signals: mpsc::Receiver<HealthSignal>, scope: AttemptScope) {
    loop {
        let signal = tokio::select! {
            _ = scope.cancel.cancelled() => return,
            signal = signals.recv() => signal,
        };

        match signal {
            None => {
                debug!("health source closed");
                return;
            }
            Some(HealthSignal::Reset) => {
                debug!("health check passed");
                tokio::select! {
                    _ = scope.cancel.cancelled() => return,
                    _ = scope.reset_wait.send(()) => {}
                }
            }
            Some(HealthSignal::Abort(err)) => {
                warn!(error = %err, "health check failed");
                scope.cancel.cancel();
                return;
            }
        }
    }
}
