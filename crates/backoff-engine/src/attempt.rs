//! Attempt runner: one execution of the work unit.
//!
//! Each attempt runs on its own tokio task under a child cancellation
//! token. The result is reported through a `oneshot`, so the task never
//! blocks on reporting even if the engine has already returned.

use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span};

use crate::WorkFn;
use crate::error::AttemptError;
use crate::fault;
use crate::gate::OnceGate;

/// Outcome of one attempt.
pub type AttemptResult = Result<(), AttemptError>;

/// Per-iteration handles shared by the attempt and its health monitor.
pub(crate) struct AttemptScope {
    /// Collapses the engine's wait back to its initial value.
    pub(crate) reset_wait: mpsc::Sender<()>,
    /// Cancels this attempt only.
    pub(crate) cancel: CancellationToken,
}

/// A running attempt.
pub(crate) struct AttemptHandle {
    result: Option<oneshot::Receiver<AttemptResult>>,
    task: JoinHandle<()>,
}

impl AttemptHandle {
    /// Wait for the attempt to finish.
    ///
    /// Cancel-safe. If the task died without reporting, a panic is resumed
    /// on the caller (recovery disabled), anything else is `Canceled`.
    pub(crate) async fn wait(&mut self) -> AttemptResult {
        if let Some(rx) = self.result.as_mut() {
            match rx.await {
                Ok(result) => return result,
                Err(_) => self.result = None,
            }
        }
        match (&mut self.task).await {
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(e) => Err(AttemptError::Canceled(e.to_string())),
            Ok(()) => Err(AttemptError::Canceled("attempt exited without a result".to_string())),
        }
    }
}

/// Spawn one attempt of `work` under `token`.
///
/// The token is cancelled when the attempt finishes, however it finishes.
pub(crate) fn spawn_attempt(
    work: WorkFn,
    gate: Option<OnceGate>,
    token: CancellationToken,
    recover: bool,
    span: Span,
) -> AttemptHandle {
    let (tx, rx) = oneshot::channel();
    if recover {
        fault::install_hook();
    }

    let task = tokio::spawn(
        async move {
            let _done = token.clone().drop_guard();

            let attempt = async move {
                if let Some(gate) = gate {
                    gate.pass().await?;
                }
                work(token).await
            };

            let result = if recover {
                match AssertUnwindSafe(attempt).catch_unwind().await {
                    Ok(outcome) => outcome.map_err(AttemptError::Failure),
                    Err(payload) => Err(AttemptError::from_panic(payload, fault::take_trace())),
                }
            } else {
                attempt.await.map_err(AttemptError::Failure)
            };

            // The engine may already have moved on.
            let _ = tx.send(result);
        }
        .instrument(span),
    );

    AttemptHandle {
        result: Some(rx),
        task,
    }
}
