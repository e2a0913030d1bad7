//! Probe error types.

use std::time::Duration;

use thiserror::Error;

/// Why a single probe failed.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("invalid probe request: {0}")]
    Request(#[from] http::Error),

    #[error("tls setup failed: {0}")]
    Tls(#[from] rustls::Error),

    #[error("http request failed: {0}")]
    Transport(#[from] hyper_util::client::legacy::Error),

    #[error("reading response body failed: {0}")]
    Body(#[from] hyper::Error),

    #[error("probe timed out after {0:?}")]
    Timeout(Duration),

    #[error("unexpected http status: {0}")]
    UnexpectedHttpStatus(u16),

    #[error("keyword not found: {0}")]
    KeywordNotFound(String),

    #[error("dial {addr}: {source}")]
    Dial {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}
