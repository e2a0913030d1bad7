//! Health sources for the backoff engine.
//!
//! Turns single-shot probes into the engine's per-attempt
//! [`HealthChecker`](backoff_engine::HealthChecker) contract.
//!
//! # Architecture
//!
//! ```text
//! threshold_checker(probe, config) → HealthChecker
//!   └── per attempt: polling task
//!       ├── initial delay
//!       ├── probe.check() every check_interval
//!       ├── ThresholdTracker (consecutive successes / failures)
//!       └── one HealthSignal, then stop
//!
//! Probes
//!   ├── HttpProbe (http/https, status / keyword checks, optional redirects)
//!   └── TcpProbe  (connect, then close)
//! ```

pub mod error;
pub mod http_probe;
pub mod tcp_probe;
pub mod threshold;

pub use error::ProbeError;
pub use http_probe::{HttpProbe, HttpProbeConfig};
pub use tcp_probe::{TcpProbe, TcpProbeConfig};
pub use threshold::{Probe, ThresholdConfig, ThresholdTracker, Verdict, threshold_checker};
