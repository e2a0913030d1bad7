//! backoff: run a program and restart it with exponential backoff.
//!
//! # Usage
//!
//! ```text
//! backoff --retry-max 10 --http-url http://127.0.0.1:8080/healthz -- ./server --port 8080
//! ```
//!
//! The program is restarted whenever it exits non-zero. A configured
//! probe resets the wait once the program is healthy again, or kills it
//! when it stops answering.

mod flags;
mod health;
mod process;
mod singleton;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use backoff_core::{BackoffSettings, SupervisorConfig};
use backoff_engine::{Backoff, BackoffConfig, BackoffError, BackoffResult, CancellationToken};
use clap::Parser;
use tokio::task::JoinError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::flags::Cli;
use crate::process::Program;
use crate::singleton::Singleton;

const DEFAULT_LOG_FILTER: &str = "info,backoff=debug";
/// How long the engine gets to wind down after a shutdown request.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_level.as_deref());

    let program = Arc::new(Program::from_command(&cli.command)?);

    let file = match &cli.config {
        Some(path) => SupervisorConfig::from_file(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => SupervisorConfig::default(),
    };
    let settings = file
        .overlay(cli.overrides()?)
        .resolve()
        .context("invalid configuration")?;

    let quit = CancellationToken::new();
    let singleton = settings.singleton.enabled.then(|| {
        Arc::new(Singleton::new(
            settings.singleton.name_for(program.program()),
            quit.clone(),
        ))
    });

    let mut config = engine_config(&settings.backoff)
        .with_span(tracing::info_span!("backoff", program = %program.program()));
    if let Some(probe) = &settings.probe {
        config = config.with_health_checker(health::build_checker(probe)?);
    }
    if let Some(singleton) = &singleton {
        info!(name = %singleton.name(), "singleton mode enabled");
        config = config.with_gate(singleton.clone().gate());
    }

    let engine = Backoff::new(
        {
            let program = program.clone();
            move |token: CancellationToken| {
                let program = program.clone();
                async move { program.run(token).await }
            }
        },
        config,
    );

    let root = CancellationToken::new();
    let mut run = tokio::spawn({
        let token = root.clone();
        async move { engine.run(token).await }
    });

    let finished = tokio::select! {
        joined = &mut run => Some(joined),
        signal = wait_for_shutdown_signal() => {
            if let Err(e) = signal {
                warn!(error = %e, "failed to listen for shutdown signals");
            }
            info!("shutdown signal received");
            None
        }
        _ = quit.cancelled() => {
            info!("shutting down for a newer instance");
            None
        }
    };

    let result = match finished {
        Some(joined) => report(joined),
        None => {
            root.cancel();
            if let Some(singleton) = &singleton {
                singleton.shutdown();
            }
            match tokio::time::timeout(SHUTDOWN_TIMEOUT, &mut run).await {
                Ok(joined) => report(joined),
                Err(_) => {
                    warn!(timeout = ?SHUTDOWN_TIMEOUT, "engine did not stop in time");
                    Ok(())
                }
            }
        }
    };

    if let Some(singleton) = &singleton {
        singleton.shutdown();
    }
    info!("backoff stopped");
    result
}

fn init_tracing(level: Option<&str>) {
    let filter = match level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn engine_config(settings: &BackoffSettings) -> BackoffConfig {
    let defaults = BackoffConfig::default();
    BackoffConfig {
        initial_duration: settings.initial.unwrap_or(defaults.initial_duration),
        max_duration: settings.max.unwrap_or(defaults.max_duration),
        max_retry: settings.max_retry.unwrap_or(defaults.max_retry),
        exponent_factor: settings.exponent.unwrap_or(defaults.exponent_factor),
        inter_const_factor: settings.inter_const.unwrap_or_default(),
        outer_const_factor: settings.outer_const.unwrap_or_default(),
        disable_recovery: settings.disable_recovery,
        ..defaults
    }
}

fn report(joined: Result<BackoffResult<()>, JoinError>) -> anyhow::Result<()> {
    match joined {
        Ok(Ok(())) => {
            info!("program finished");
            Ok(())
        }
        Ok(Err(BackoffError::Canceled)) => Ok(()),
        Ok(Err(e)) => Err(e).context("backoff run failed"),
        Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
        Err(e) => Err(e).context("backoff task failed"),
    }
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result?,
        _ = sigterm.recv() => {}
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}
