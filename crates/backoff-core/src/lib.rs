pub mod config;
pub mod duration;
pub mod error;
pub mod settings;

pub use config::SupervisorConfig;
pub use duration::parse_duration;
pub use error::{ConfigError, ConfigResult};
pub use settings::*;
