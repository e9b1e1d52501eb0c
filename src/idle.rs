use crate::{
    config::{CONNECTIONS_REGEX, Config},
    error::CountError,
    lifecycle::Orchestrator,
};
use async_trait::async_trait;
use std::process::Stdio;
use tokio::process::Command;

#[async_trait]
pub trait ConnectionCounter: Send + Sync {
    async fn live_connections(&self) -> Result<u32, CountError>;
}

pub struct SystemdSocketCounter {
    unit: String,
}

impl SystemdSocketCounter {
    pub fn new(config: &Config) -> Self {
        Self {
            unit: config.socket_unit.clone(),
        }
    }
}

#[async_trait]
impl ConnectionCounter for SystemdSocketCounter {
    async fn live_connections(&self) -> Result<u32, CountError> {
        let command = format!("systemctl show {} -p NConnections", self.unit);
        let output = Command::new("systemctl")
            .args(["show", self.unit.as_str(), "-p", "NConnections"])
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| CountError::Spawn {
                command: command.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(CountError::Failed {
                command,
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            });
        }

        parse_connections(&String::from_utf8_lossy(&output.stdout))
    }
}

fn parse_connections(output: &str) -> Result<u32, CountError> {
    let captures = CONNECTIONS_REGEX
        .captures(output)
        .ok_or(CountError::Missing)?;
    let value = &captures[1];

    value
        .parse()
        .map_err(|_| CountError::Parse(value.to_owned()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleDecision {
    Stopped,
    StopFailed,
    /// Other sessions were still open.
    Skipped(u32),
    /// The count could not be read, so nothing was stopped.
    Unknown,
}

pub struct IdleShutdownDecider<'a, O, C> {
    orchestrator: &'a O,
    counter: &'a C,
}

impl<'a, O: Orchestrator, C: ConnectionCounter> IdleShutdownDecider<'a, O, C> {
    pub fn new(orchestrator: &'a O, counter: &'a C) -> Self {
        Self {
            orchestrator,
            counter,
        }
    }

    /// Must run after this session's own connections are closed. The count
    /// includes this (still running) process. Reading the count and stopping
    /// are not atomic with new arrivals: a session accepted after the count
    /// is read can see the backend stopped underneath it.
    pub async fn maybe_stop_backend(&self) -> IdleDecision {
        let count = match self.counter.live_connections().await {
            Ok(count) => count,
            Err(err) => {
                log::error!("cannot read live connection count, leaving backend up: {}", err);
                return IdleDecision::Unknown;
            }
        };
        log::info!("live connections: {}", count);

        if count > 1 {
            log::info!("other sessions still active, leaving backend up");
            return IdleDecision::Skipped(count);
        }

        log::info!("last session closed, stopping backend");
        match self.orchestrator.stop().await {
            Ok(()) => {
                log::info!("backend stopped");
                IdleDecision::Stopped
            }
            Err(err) => {
                log::error!("backend stop failed: {}", err);
                IdleDecision::StopFailed
            }
        }
    }
}
