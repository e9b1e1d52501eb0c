use crate::{config::Config, error::OrchestrationError};
use async_trait::async_trait;
use std::{path::PathBuf, process::Stdio};
use tokio::process::Command;

#[async_trait]
pub trait Orchestrator: Send + Sync {
    async fn is_running(&self) -> Result<bool, OrchestrationError>;
    async fn start(&self) -> Result<(), OrchestrationError>;
    async fn stop(&self) -> Result<(), OrchestrationError>;
}

pub struct ComposeOrchestrator {
    program: String,
    compose_file: PathBuf,
}

impl ComposeOrchestrator {
    pub fn new(config: &Config) -> Self {
        Self {
            program: config.compose_program.clone(),
            compose_file: config.compose_file.clone(),
        }
    }

    async fn compose(&self, args: &[&str]) -> Result<String, OrchestrationError> {
        let command = format!(
            "{} compose -f {} {}",
            self.program,
            self.compose_file.display(),
            args.join(" ")
        );
        log::debug!("running `{}`", command);

        let output = Command::new(&self.program)
            .arg("compose")
            .arg("-f")
            .arg(&self.compose_file)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| OrchestrationError::Spawn {
                command: command.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(OrchestrationError::Failed {
                command,
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl Orchestrator for ComposeOrchestrator {
    async fn is_running(&self) -> Result<bool, OrchestrationError> {
        let stdout = self.compose(&["ps", "--quiet"]).await?;
        let ids = stdout.trim();
        log::debug!("compose ps output: {:?}", ids);
        Ok(!ids.is_empty())
    }

    async fn start(&self) -> Result<(), OrchestrationError> {
        self.compose(&["up", "-d"]).await.map(drop)
    }

    async fn stop(&self) -> Result<(), OrchestrationError> {
        self.compose(&["stop"]).await.map(drop)
    }
}

pub struct LifecycleController<O> {
    orchestrator: O,
}

impl<O: Orchestrator> LifecycleController<O> {
    pub fn new(orchestrator: O) -> Self {
        Self { orchestrator }
    }

    pub fn orchestrator(&self) -> &O {
        &self.orchestrator
    }

    /// A failing status query counts as "not running".
    pub async fn ensure_running(&self) -> Result<bool, OrchestrationError> {
        match self.orchestrator.is_running().await {
            Ok(true) => {
                log::info!("backend already running");
                return Ok(false);
            }
            Ok(false) => log::info!("backend not running, starting it"),
            Err(err) => log::error!("backend status unknown ({}), starting it anyway", err),
        }

        self.orchestrator.start().await?;
        log::info!("backend start issued");
        Ok(true)
    }
}
