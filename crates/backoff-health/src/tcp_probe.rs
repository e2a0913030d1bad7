//! TCP health probe: a successful connect is a pass.

use std::time::Duration;

use tokio::net::TcpStream;

use crate::error::ProbeError;
use crate::threshold::{Probe, ProbeFuture};

#[derive(Debug, Clone)]
pub struct TcpProbeConfig {
    /// `host:port`.
    pub addr: String,
    pub timeout: Option<Duration>,
}

impl TcpProbeConfig {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            timeout: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TcpProbe {
    config: TcpProbeConfig,
}

impl TcpProbe {
    pub fn new(config: TcpProbeConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TcpProbeConfig {
        &self.config
    }

    /// Connect once and close the connection immediately.
    pub async fn probe(&self) -> Result<(), ProbeError> {
        let connect = TcpStream::connect(self.config.addr.as_str());
        let result = match self.config.timeout {
            Some(limit) => tokio::time::timeout(limit, connect)
                .await
                .map_err(|_| ProbeError::Timeout(limit))?,
            None => connect.await,
        };

        let stream = result.map_err(|source| ProbeError::Dial {
            addr: self.config.addr.clone(),
            source,
        })?;
        drop(stream);
        Ok(())
    }
}

impl Probe for TcpProbe {
    fn check(&self) -> ProbeFuture<'_> {
        Box::pin(self.probe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn connects_to_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let mut config = TcpProbeConfig::new(addr.to_string());
        config.timeout = Some(Duration::from_secs(2));
        TcpProbe::new(config).probe().await.unwrap();
    }

    #[tokio::test]
    async fn closed_port_is_dial_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = TcpProbe::new(TcpProbeConfig::new(addr.to_string()))
            .probe()
            .await
            .unwrap_err();
        match err {
            ProbeError::Dial { addr: dialed, .. } => assert_eq!(dialed, addr.to_string()),
            other => panic!("expected dial error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unresolvable_host_is_dial_error() {
        let err = TcpProbe::new(TcpProbeConfig::new("not a host"))
            .probe()
            .await
            .unwrap_err();
        assert!(matches!(err, ProbeError::Dial { .. }));
    }
}
