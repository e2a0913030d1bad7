//! Probe settings to a health checker.

use anyhow::{Context, bail};
use backoff_core::{HttpTarget, ProbeSettings, ProbeTarget, TcpTarget};
use backoff_engine::HealthChecker;
use backoff_health::{
    HttpProbe, HttpProbeConfig, TcpProbe, TcpProbeConfig, ThresholdConfig, threshold_checker,
};
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri};
use tracing::info;

pub fn build_checker(settings: &ProbeSettings) -> anyhow::Result<HealthChecker> {
    let threshold = threshold_config(settings);
    let checker = match &settings.target {
        ProbeTarget::Http(target) => {
            let config = http_config(target)?;
            info!(url = %config.url, method = %config.method, "http health probe enabled");
            threshold_checker(HttpProbe::new(config)?, threshold)
        }
        ProbeTarget::Tcp(target) => {
            let config = tcp_config(target)?;
            info!(addr = %config.addr, "tcp health probe enabled");
            threshold_checker(TcpProbe::new(config), threshold)
        }
    };
    Ok(checker)
}

fn threshold_config(settings: &ProbeSettings) -> ThresholdConfig {
    let defaults = ThresholdConfig::default();
    ThresholdConfig {
        check_interval: settings.interval.unwrap_or(defaults.check_interval),
        initial_delay: settings.initial_delay.unwrap_or(defaults.initial_delay),
        success_threshold: settings.success_threshold.unwrap_or(defaults.success_threshold),
        failure_threshold: settings.failure_threshold.unwrap_or(defaults.failure_threshold),
    }
}

fn http_config(target: &HttpTarget) -> anyhow::Result<HttpProbeConfig> {
    let url: Uri = target
        .url
        .parse()
        .with_context(|| format!("invalid probe url {:?}", target.url))?;
    match url.scheme_str() {
        Some("http" | "https") => {}
        Some(other) => bail!("unsupported probe url scheme {other:?}, expected http or https"),
        None => bail!("probe url {:?} has no scheme", target.url),
    }

    let method = Method::from_bytes(target.method.as_bytes())
        .with_context(|| format!("invalid http method {:?}", target.method))?;

    let mut headers = HeaderMap::new();
    for (name, value) in &target.headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .with_context(|| format!("invalid header name {name:?}"))?;
        let value = HeaderValue::from_str(value)
            .with_context(|| format!("invalid value for header {name}"))?;
        headers.append(name, value);
    }

    let status_code = target
        .status_code
        .map(StatusCode::from_u16)
        .transpose()
        .context("invalid http status code")?;

    let mut config = HttpProbeConfig::new(url);
    config.method = method;
    config.headers = headers;
    config.timeout = target.timeout;
    config.follow_redirect = target.follow_redirect;
    config.insecure = target.insecure;
    config.status_code = status_code;
    config.keyword = target.keyword.clone();
    Ok(config)
}

fn tcp_config(target: &TcpTarget) -> anyhow::Result<TcpProbeConfig> {
    let valid_port = target
        .addr
        .rsplit_once(':')
        .is_some_and(|(host, port)| !host.is_empty() && port.parse::<u16>().is_ok());
    if !valid_port {
        bail!("tcp probe address {:?} must be host:port", target.addr);
    }

    let mut config = TcpProbeConfig::new(target.addr.clone());
    config.timeout = target.timeout;
    Ok(config)
}
