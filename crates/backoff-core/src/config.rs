//! backoff.toml configuration parser.
//!
//! Every field is optional so a file and the command line can be layered
//! with [`SupervisorConfig::overlay`]. Durations stay as strings here and
//! are parsed by `SupervisorConfig::resolve`.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SupervisorConfig {
    pub backoff: Option<BackoffSection>,
    pub probe: Option<ProbeSection>,
    pub singleton: Option<SingletonSection>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BackoffSection {
    pub initial: Option<String>,
    pub max: Option<String>,
    /// 0 means unlimited.
    pub max_retry: Option<u32>,
    pub exponent: Option<i32>,
    pub inter_const: Option<String>,
    pub outer_const: Option<String>,
    pub disable_recovery: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProbeSection {
    pub interval: Option<String>,
    pub initial_delay: Option<String>,
    pub success_threshold: Option<u32>,
    pub failure_threshold: Option<u32>,
    pub http: Option<HttpSection>,
    pub tcp: Option<TcpSection>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HttpSection {
    pub url: Option<String>,
    pub method: Option<String>,
    pub timeout: Option<String>,
    pub follow_redirect: Option<bool>,
    /// Skip TLS certificate verification for `https` URLs.
    pub insecure: Option<bool>,
    pub status_code: Option<u16>,
    pub keyword: Option<String>,
    pub headers: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TcpSection {
    pub addr: Option<String>,
    pub timeout: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SingletonSection {
    pub enabled: Option<bool>,
    pub name: Option<String>,
}

impl SupervisorConfig {
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn to_toml_string(&self) -> ConfigResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Layer `over` on top of `self`: any value set in `over` wins.
    pub fn overlay(self, over: SupervisorConfig) -> SupervisorConfig {
        SupervisorConfig {
            backoff: merge(self.backoff, over.backoff, BackoffSection::overlay),
            probe: merge(self.probe, over.probe, ProbeSection::overlay),
            singleton: merge(self.singleton, over.singleton, SingletonSection::overlay),
        }
    }
}

fn merge<T>(base: Option<T>, over: Option<T>, f: impl FnOnce(T, T) -> T) -> Option<T> {
    match (base, over) {
        (Some(base), Some(over)) => Some(f(base, over)),
        (base, over) => over.or(base),
    }
}

impl BackoffSection {
    fn overlay(self, over: Self) -> Self {
        Self {
            initial: over.initial.or(self.initial),
            max: over.max.or(self.max),
            max_retry: over.max_retry.or(self.max_retry),
            exponent: over.exponent.or(self.exponent),
            inter_const: over.inter_const.or(self.inter_const),
            outer_const: over.outer_const.or(self.outer_const),
            disable_recovery: over.disable_recovery.or(self.disable_recovery),
        }
    }
}

impl ProbeSection {
    fn overlay(self, over: Self) -> Self {
        Self {
            interval: over.interval.or(self.interval),
            initial_delay: over.initial_delay.or(self.initial_delay),
            success_threshold: over.success_threshold.or(self.success_threshold),
            failure_threshold: over.failure_threshold.or(self.failure_threshold),
            http: merge(self.http, over.http, HttpSection::overlay),
            tcp: merge(self.tcp, over.tcp, TcpSection::overlay),
        }
    }
}

impl HttpSection {
    fn overlay(self, over: Self) -> Self {
        Self {
            url: over.url.or(self.url),
            method: over.method.or(self.method),
            timeout: over.timeout.or(self.timeout),
            follow_redirect: over.follow_redirect.or(self.follow_redirect),
            insecure: over.insecure.or(self.insecure),
            status_code: over.status_code.or(self.status_code),
            keyword: over.keyword.or(self.keyword),
            headers: merge(self.headers, over.headers, |mut base, over| {
                base.extend(over);
                base
            }),
        }
    }
}

impl TcpSection {
    fn overlay(self, over: Self) -> Self {
        Self {
            addr: over.addr.or(self.addr),
            timeout: over.timeout.or(self.timeout),
        }
    }
}

impl SingletonSection {
    fn overlay(self, over: Self) -> Self {
        Self {
            enabled: over.enabled.or(self.enabled),
            name: over.name.or(self.name),
        }
    }
}
