use std::{io, process::ExitStatus, time::Duration};

#[derive(Debug, thiserror::Error)]
pub enum OrchestrationError {
    #[error("failed to run `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("`{command}` exited with {status}: {stderr}")]
    Failed {
        command: String,
        status: ExitStatus,
        stderr: String,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("status probe I/O: {0}")]
    Io(#[from] io::Error),

    #[error("status probe timed out after {0:?}")]
    Timeout(Duration),

    #[error("malformed status response: {0}")]
    Protocol(String),

    #[error("invalid status JSON: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum CountError {
    #[error("failed to run `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("`{command}` exited with {status}: {stderr}")]
    Failed {
        command: String,
        status: ExitStatus,
        stderr: String,
    },

    #[error("no NConnections line in service manager output")]
    Missing,

    #[error("unparsable NConnections value {0:?}")]
    Parse(String),
}

/// Fatal conditions; every one of them ends the process with exit code 1.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("inherited connection unusable: {0}")]
    Acquire(#[source] io::Error),

    #[error("backend start failed: {0}")]
    Orchestration(#[from] OrchestrationError),

    #[error("all {attempts} connection attempts to {target} failed: {last}")]
    ConnectExhausted {
        target: String,
        attempts: u32,
        #[source]
        last: io::Error,
    },

    #[error("backend not ready within {0:?}")]
    ReadinessTimeout(Duration),
}

impl SessionError {
    pub fn exit_code(&self) -> u8 {
        1
    }
}
