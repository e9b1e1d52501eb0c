use lazy_static::lazy_static;
use regex::Regex;
use std::{net::SocketAddr, path::PathBuf, time::Duration};

pub const TARGET_HOST: &str = "127.0.0.1";
pub const TARGET_PORT: u16 = 25564;

pub const COMPOSE_PROGRAM: &str = "docker";
pub const COMPOSE_FILE: &str = "/opt/minecraft-on-demand/compose.yaml";
pub const SOCKET_UNIT: &str = "minecraft-on-demand.socket";

pub const POLL_INTERVAL_SEC: u64 = 2;
pub const SETTLE_DELAY_SEC: u64 = 3;
pub const READY_TIMEOUT_SEC: u64 = 60;

pub const MAX_CONNECT_ATTEMPTS: u32 = 3;
pub const CONNECT_RETRY_DELAY_SEC: u64 = 2;
pub const TCP_PROBE_TIMEOUT_SEC: u64 = 5;
pub const STATUS_PROBE_TIMEOUT_SEC: u64 = 5;

pub const INITIAL_DATA_WAIT_MS: u64 = 50;
pub const COPY_BUFFER_SIZE: usize = 4096;

lazy_static! {
    pub static ref CONNECTIONS_REGEX: Regex = Regex::new(r"(?m)^NConnections=[ \t]*(\S*)\s*$").unwrap();
}

#[derive(Debug, Clone)]
pub struct Config {
    pub target_host: String,
    pub target_port: u16,
    pub compose_program: String,
    pub compose_file: PathBuf,
    pub socket_unit: String,
    pub poll_interval: Duration,
    pub settle_delay: Duration,
    pub ready_timeout: Duration,
    pub connect_attempts: u32,
    pub connect_retry_delay: Duration,
    pub tcp_probe_timeout: Duration,
    pub status_probe_timeout: Duration,
    pub initial_data_wait: Duration,
    pub chunk_size: usize,
}

impl Config {
    pub fn target(&self) -> String {
        format!("{}:{}", self.target_host, self.target_port)
    }

    pub fn with_target(mut self, addr: SocketAddr) -> Self {
        self.target_host = addr.ip().to_string();
        self.target_port = addr.port();
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            target_host: TARGET_HOST.to_owned(),
            target_port: TARGET_PORT,
            compose_program: COMPOSE_PROGRAM.to_owned(),
            compose_file: PathBuf::from(COMPOSE_FILE),
            socket_unit: SOCKET_UNIT.to_owned(),
            poll_interval: Duration::from_secs(POLL_INTERVAL_SEC),
            settle_delay: Duration::from_secs(SETTLE_DELAY_SEC),
            ready_timeout: Duration::from_secs(READY_TIMEOUT_SEC),
            connect_attempts: MAX_CONNECT_ATTEMPTS,
            connect_retry_delay: Duration::from_secs(CONNECT_RETRY_DELAY_SEC),
            tcp_probe_timeout: Duration::from_secs(TCP_PROBE_TIMEOUT_SEC),
            status_probe_timeout: Duration::from_secs(STATUS_PROBE_TIMEOUT_SEC),
            initial_data_wait: Duration::from_millis(INITIAL_DATA_WAIT_MS),
            chunk_size: COPY_BUFFER_SIZE,
        }
    }
}
