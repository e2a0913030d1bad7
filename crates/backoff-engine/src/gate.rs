//! Lazy one-time gate in front of the work unit.
//!
//! A gate is run at the start of each attempt until it has succeeded once
//! (e.g. claiming a singleton socket). Its error is an ordinary attempt
//! failure and is retried with the normal backoff.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::BoxFuture;

/// Zero-argument check run before the first successful attempt.
pub type Gate = Arc<dyn Fn() -> BoxFuture<anyhow::Result<()>> + Send + Sync>;

/// Runs a [`Gate`] until it passes, then never again.
///
/// Attempts are serial within one engine, so a plain flag is enough.
#[derive(Clone)]
pub struct OnceGate {
    gate: Gate,
    passed: Arc<AtomicBool>,
}

impl OnceGate {
    pub fn new(gate: Gate) -> Self {
        Self {
            gate,
            passed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub async fn pass(&self) -> anyhow::Result<()> {
        if self.passed.load(Ordering::Acquire) {
            return Ok(());
        }
        (self.gate)().await?;
        self.passed.store(true, Ordering::Release);
        Ok(())
    }

    pub fn is_passed(&self) -> bool {
        self.passed.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    fn counting_gate(fail_first: u32) -> (Gate, Arc<AtomicU32>) {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let gate: Gate = Arc::new(move || -> BoxFuture<anyhow::Result<()>> {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move {
                if n < fail_first {
                    anyhow::bail!("socket busy");
                }
                Ok(())
            })
        });
        (gate, calls)
    }

    #[tokio::test]
    async fn passes_once() {
        let (gate, calls) = counting_gate(0);
        let gate = OnceGate::new(gate);

        gate.pass().await.unwrap();
        gate.pass().await.unwrap();
        gate.pass().await.unwrap();

        assert!(gate.is_passed());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_until_passed() {
        let (gate, calls) = counting_gate(2);
        let gate = OnceGate::new(gate);

        assert!(gate.pass().await.is_err());
        assert!(gate.pass().await.is_err());
        assert!(!gate.is_passed());
        gate.pass().await.unwrap();
        gate.pass().await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
