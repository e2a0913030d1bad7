//! Command-line flags.
//!
//! Every flag is optional and layered over `--config` through
//! [`SupervisorConfig::overlay`].

use std::collections::BTreeMap;
use std::path::PathBuf;

use backoff_core::config::{
    BackoffSection, HttpSection, ProbeSection, SingletonSection, TcpSection,
};
use backoff_core::{SupervisorConfig, parse_header};
use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    name = "backoff",
    version,
    about = "Run a program and restart it with exponential backoff"
)]
pub struct Cli {
    /// TOML file with [backoff], [probe] and [singleton] sections.
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// First wait after a failure, e.g. 500ms, 5s, 2m.
    #[arg(long, value_name = "DURATION")]
    pub duration_initial: Option<String>,

    /// Ceiling for the wait.
    #[arg(long, value_name = "DURATION")]
    pub duration_max: Option<String>,

    /// Retries after the first attempt, 0 means unlimited.
    #[arg(long, value_name = "N")]
    pub retry_max: Option<u32>,

    #[arg(long, value_name = "N", allow_hyphen_values = true)]
    pub factor_exponent: Option<i32>,

    /// Added to the last wait before growth.
    #[arg(long, value_name = "DURATION")]
    pub factor_inter: Option<String>,

    /// Added after growth.
    #[arg(long, value_name = "DURATION")]
    pub factor_outer: Option<String>,

    /// Let panics in the work unit escape instead of retrying them.
    #[arg(long)]
    pub disable_recovery: bool,

    #[arg(long, value_name = "DURATION")]
    pub probe_interval: Option<String>,

    #[arg(long, value_name = "DURATION")]
    pub probe_initial_delay: Option<String>,

    #[arg(long, value_name = "N")]
    pub probe_success_threshold: Option<u32>,

    #[arg(long, value_name = "N")]
    pub probe_failure_threshold: Option<u32>,

    /// Probe the program over HTTP or HTTPS.
    #[arg(long, value_name = "URL", conflicts_with = "tcp_addr")]
    pub http_url: Option<String>,

    #[arg(long, value_name = "METHOD")]
    pub http_method: Option<String>,

    /// Extra request header, repeatable.
    #[arg(long = "http-header", value_name = "KEY:VALUE")]
    pub http_headers: Vec<String>,

    #[arg(long, value_name = "DURATION")]
    pub http_timeout: Option<String>,

    #[arg(long)]
    pub http_follow_redirect: bool,

    /// Accept any TLS certificate from the probed endpoint.
    #[arg(long)]
    pub http_insecure: bool,

    /// Required status code. Any 2xx passes when unset.
    #[arg(long, value_name = "CODE")]
    pub http_status: Option<u16>,

    /// Text that must appear on one line of the response body.
    #[arg(long, value_name = "TEXT")]
    pub http_keyword: Option<String>,

    /// Probe the program with a TCP connect to host:port.
    #[arg(long, value_name = "ADDR")]
    pub tcp_addr: Option<String>,

    #[arg(long, value_name = "DURATION")]
    pub tcp_timeout: Option<String>,

    /// Ask a running instance with the same name to exit, then take its place.
    #[arg(long)]
    pub singleton: bool,

    /// Singleton name. Defaults to backoff-<program name>.
    #[arg(long)]
    pub name: Option<String>,

    /// Log filter, overrides RUST_LOG.
    #[arg(long, value_name = "FILTER")]
    pub log_level: Option<String>,

    /// Program to supervise and its arguments.
    #[arg(
        required = true,
        trailing_var_arg = true,
        allow_hyphen_values = true,
        value_name = "PROGRAM"
    )]
    pub command: Vec<String>,
}

fn switch(set: bool) -> Option<bool> {
    set.then_some(true)
}

impl Cli {
    /// The flags as a config layer.
    pub fn overrides(&self) -> anyhow::Result<SupervisorConfig> {
        let headers = if self.http_headers.is_empty() {
            None
        } else {
            Some(
                self.http_headers
                    .iter()
                    .map(|raw| parse_header(raw))
                    .collect::<Result<BTreeMap<_, _>, _>>()?,
            )
        };

        Ok(SupervisorConfig {
            backoff: Some(BackoffSection {
                initial: self.duration_initial.clone(),
                max: self.duration_max.clone(),
                max_retry: self.retry_max,
                exponent: self.factor_exponent,
                inter_const: self.factor_inter.clone(),
                outer_const: self.factor_outer.clone(),
                disable_recovery: switch(self.disable_recovery),
            }),
            probe: Some(ProbeSection {
                interval: self.probe_interval.clone(),
                initial_delay: self.probe_initial_delay.clone(),
                success_threshold: self.probe_success_threshold,
                failure_threshold: self.probe_failure_threshold,
                http: Some(HttpSection {
                    url: self.http_url.clone(),
                    method: self.http_method.clone(),
                    timeout: self.http_timeout.clone(),
                    follow_redirect: switch(self.http_follow_redirect),
                    insecure: switch(self.http_insecure),
                    status_code: self.http_status,
                    keyword: self.http_keyword.clone(),
                    headers,
                }),
                tcp: Some(TcpSection {
                    addr: self.tcp_addr.clone(),
                    timeout: self.tcp_timeout.clone(),
                }),
            }),
            singleton: Some(SingletonSection {
                enabled: switch(self.singleton),
                name: self.name.clone(),
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use backoff_core::ProbeTarget;
    use std::time::Duration;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("backoff").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn program_and_arguments_after_separator() {
        let cli = parse(&["--retry-max", "3", "--", "server", "--port", "8080"]);
        assert_eq!(cli.retry_max, Some(3));
        assert_eq!(cli.command, ["server", "--port", "8080"]);
    }

    #[test]
    fn program_is_required() {
        assert!(Cli::try_parse_from(["backoff", "--singleton"]).is_err());
    }

    #[test]
    fn http_and_tcp_conflict() {
        let parsed = Cli::try_parse_from([
            "backoff",
            "--http-url",
            "http://localhost/",
            "--tcp-addr",
            "localhost:80",
            "--",
            "server",
        ]);
        assert!(parsed.is_err());
    }

    #[test]
    fn flags_resolve_to_settings() {
        let cli = parse(&[
            "--duration-initial",
            "500ms",
            "--factor-exponent",
            "2",
            "--http-url",
            "https://127.0.0.1:8443/healthz",
            "--http-insecure",
            "--http-header",
            "X-Probe: yes",
            "--http-keyword",
            "ok",
            "--probe-failure-threshold",
            "5",
            "--",
            "server",
        ]);
        let settings = cli.overrides().unwrap().resolve().unwrap();

        assert_eq!(settings.backoff.initial, Some(Duration::from_millis(500)));
        assert_eq!(settings.backoff.exponent, Some(2));
        assert!(!settings.backoff.disable_recovery);
        assert!(!settings.singleton.enabled);

        let probe = settings.probe.unwrap();
        assert_eq!(probe.failure_threshold, Some(5));
        match probe.target {
            ProbeTarget::Http(http) => {
                assert_eq!(http.headers, [("X-Probe".to_string(), "yes".to_string())]);
                assert_eq!(http.keyword.as_deref(), Some("ok"));
                assert!(http.insecure);
                assert!(!http.follow_redirect);
            }
            other => panic!("expected http target, got {other:?}"),
        }
    }

    #[test]
    fn unset_switches_keep_file_values() {
        let file = SupervisorConfig::from_toml_str(
            "[backoff]\ndisable_recovery = true\nmax_retry = 9\n[singleton]\nenabled = true\n",
        )
        .unwrap();
        let cli = parse(&["--retry-max", "2", "--", "server"]);

        let settings = file.overlay(cli.overrides().unwrap()).resolve().unwrap();
        assert!(settings.backoff.disable_recovery);
        assert!(settings.singleton.enabled);
        assert_eq!(settings.backoff.max_retry, Some(2));
    }

    #[test]
    fn malformed_header_is_rejected() {
        let cli = parse(&["--http-header", "nocolon", "--", "server"]);
        assert!(cli.overrides().is_err());
    }
}
