//! Resolved, validated settings.
//!
//! Values the downstream crates own defaults for stay `Option` here.

use std::time::Duration;

use crate::config::{HttpSection, ProbeSection, SupervisorConfig, TcpSection};
use crate::duration::parse_duration;
use crate::error::{ConfigError, ConfigResult};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Settings {
    pub backoff: BackoffSettings,
    /// `None` when neither an HTTP URL nor a TCP address is configured.
    pub probe: Option<ProbeSettings>,
    pub singleton: SingletonSettings,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BackoffSettings {
    pub initial: Option<Duration>,
    pub max: Option<Duration>,
    pub max_retry: Option<u32>,
    pub exponent: Option<i32>,
    pub inter_const: Option<Duration>,
    pub outer_const: Option<Duration>,
    pub disable_recovery: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProbeSettings {
    pub interval: Option<Duration>,
    pub initial_delay: Option<Duration>,
    pub success_threshold: Option<u32>,
    pub failure_threshold: Option<u32>,
    pub target: ProbeTarget,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProbeTarget {
    Http(HttpTarget),
    Tcp(TcpTarget),
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpTarget {
    pub url: String,
    /// Upper-cased; defaults to `GET`.
    pub method: String,
    pub headers: Vec<(String, String)>,
    pub timeout: Option<Duration>,
    pub follow_redirect: bool,
    pub insecure: bool,
    pub status_code: Option<u16>,
    pub keyword: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TcpTarget {
    pub addr: String,
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SingletonSettings {
    pub enabled: bool,
    pub name: Option<String>,
}

impl SingletonSettings {
    /// Configured name, or `backoff-<program stem>`.
    pub fn name_for(&self, program: &str) -> String {
        match &self.name {
            Some(name) if !name.is_empty() => name.clone(),
            _ => default_singleton_name(program),
        }
    }
}

/// `backoff-` followed by the program's file name up to its first dot.
pub fn default_singleton_name(program: &str) -> String {
    let normalized = program.replace('\\', "/");
    let base = normalized.rsplit('/').next().unwrap_or_default();
    let stem = base.split('.').next().unwrap_or_default();
    format!("backoff-{stem}")
}

/// Split a `KEY:VALUE` header flag.
pub fn parse_header(raw: &str) -> ConfigResult<(String, String)> {
    let (key, value) = raw
        .split_once(':')
        .ok_or_else(|| ConfigError::InvalidHeader(raw.to_string()))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(ConfigError::InvalidHeader(raw.to_string()));
    }
    Ok((key.to_string(), value.trim().to_string()))
}

fn duration(field: &'static str, value: Option<&String>) -> ConfigResult<Option<Duration>> {
    value
        .map(|raw| {
            parse_duration(raw).ok_or_else(|| ConfigError::InvalidDuration {
                field,
                value: raw.clone(),
            })
        })
        .transpose()
}

impl SupervisorConfig {
    /// Parse durations, pick the probe target and apply defaults.
    pub fn resolve(&self) -> ConfigResult<Settings> {
        let backoff = match &self.backoff {
            Some(section) => BackoffSettings {
                initial: duration("backoff.initial", section.initial.as_ref())?,
                max: duration("backoff.max", section.max.as_ref())?,
                max_retry: section.max_retry,
                exponent: section.exponent,
                inter_const: duration("backoff.inter_const", section.inter_const.as_ref())?,
                outer_const: duration("backoff.outer_const", section.outer_const.as_ref())?,
                disable_recovery: section.disable_recovery.unwrap_or(false),
            },
            None => BackoffSettings::default(),
        };

        let probe = match &self.probe {
            Some(section) => resolve_probe(section)?,
            None => None,
        };

        let singleton = self
            .singleton
            .as_ref()
            .map(|section| SingletonSettings {
                enabled: section.enabled.unwrap_or(false),
                name: section.name.clone(),
            })
            .unwrap_or_default();

        Ok(Settings {
            backoff,
            probe,
            singleton,
        })
    }
}

fn resolve_probe(section: &ProbeSection) -> ConfigResult<Option<ProbeSettings>> {
    let http = section.http.as_ref().filter(|h| h.url.as_deref().is_some_and(|u| !u.is_empty()));
    let tcp = section.tcp.as_ref().filter(|t| t.addr.as_deref().is_some_and(|a| !a.is_empty()));

    let target = match (http, tcp) {
        (Some(_), Some(_)) => return Err(ConfigError::ConflictingProbes),
        (Some(http), None) => ProbeTarget::Http(resolve_http(http)?),
        (None, Some(tcp)) => ProbeTarget::Tcp(resolve_tcp(tcp)?),
        (None, None) => return Ok(None),
    };

    Ok(Some(ProbeSettings {
        interval: duration("probe.interval", section.interval.as_ref())?,
        initial_delay: duration("probe.initial_delay", section.initial_delay.as_ref())?,
        success_threshold: section.success_threshold,
        failure_threshold: section.failure_threshold,
        target,
    }))
}

fn resolve_http(section: &HttpSection) -> ConfigResult<HttpTarget> {
    Ok(HttpTarget {
        url: section.url.clone().unwrap_or_default(),
        method: section
            .method
            .as_deref()
            .map(str::to_ascii_uppercase)
            .unwrap_or_else(|| "GET".to_string()),
        headers: section
            .headers
            .iter()
            .flatten()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
        timeout: duration("probe.http.timeout", section.timeout.as_ref())?,
        follow_redirect: section.follow_redirect.unwrap_or(false),
        insecure: section.insecure.unwrap_or(false),
        status_code: section.status_code,
        keyword: section.keyword.clone().filter(|k| !k.is_empty()),
    })
}

fn resolve_tcp(section: &TcpSection) -> ConfigResult<TcpTarget> {
    Ok(TcpTarget {
        addr: section.addr.clone().unwrap_or_default(),
        timeout: duration("probe.tcp.timeout", section.timeout.as_ref())?,
    })
}
