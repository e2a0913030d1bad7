//! The supervised program as a work unit.

use std::process::Stdio;

use anyhow::{Context, bail};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    program: String,
    args: Vec<String>,
}

impl Program {
    /// A single argument containing spaces is split on whitespace, so
    /// `backoff "server --port 80"` and `backoff -- server --port 80`
    /// run the same thing.
    pub fn from_command(command: &[String]) -> anyhow::Result<Self> {
        let parts: Vec<String> = match command {
            [single] => single.split_whitespace().map(str::to_string).collect(),
            many => many.to_vec(),
        };
        let Some((program, args)) = parts.split_first() else {
            bail!("no program to run");
        };
        if program.is_empty() {
            bail!("no program to run");
        }
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Run to completion with inherited stdio.
    ///
    /// A non-zero exit is an error. Cancelling `token` kills the child.
    pub async fn run(&self, token: CancellationToken) -> anyhow::Result<()> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to start {}", self.program))?;
        info!(pid = child.id(), program = %self.program, "program started");

        tokio::select! {
            status = child.wait() => {
                let status = status.with_context(|| format!("failed to wait for {}", self.program))?;
                if !status.success() {
                    bail!("{} exited with {status}", self.program);
                }
                debug!(program = %self.program, "program exited cleanly");
                Ok(())
            }
            _ = token.cancelled() => {
                child
                    .kill()
                    .await
                    .with_context(|| format!("failed to kill {}", self.program))?;
                bail!("{} stopped by cancellation", self.program);
            }
        }
    }
}
