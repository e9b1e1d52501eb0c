use crate::{
    config::Config,
    signal::{self, Cancelled},
};
use std::{future::Future, io};
use tokio::{
    net::TcpStream,
    time::{Duration, timeout},
};
use tokio_util::sync::CancellationToken;

#[derive(Debug)]
pub enum Connect<T> {
    Connected(T),
    Exhausted { attempts: u32, last: io::Error },
    Cancelled,
}

pub struct RetryingConnector {
    host: String,
    port: u16,
    attempts: u32,
    retry_delay: Duration,
    poll_interval: Duration,
    attempt_timeout: Duration,
}

impl RetryingConnector {
    pub fn new(config: &Config) -> Self {
        Self {
            host: config.target_host.clone(),
            port: config.target_port,
            attempts: config.connect_attempts.max(1),
            retry_delay: config.connect_retry_delay,
            poll_interval: config.poll_interval,
            attempt_timeout: config.tcp_probe_timeout,
        }
    }

    pub fn target(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub async fn connect(&self, cancel: &CancellationToken) -> Connect<TcpStream> {
        self.connect_with(cancel, move || self.dial()).await
    }

    /// The retry delay is only observed between attempts.
    pub async fn connect_with<T, F, Fut>(&self, cancel: &CancellationToken, mut dial: F) -> Connect<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = io::Result<T>>,
    {
        let mut last = io::Error::other("no connection attempt made");

        for attempt in 1..=self.attempts {
            if cancel.is_cancelled() {
                return Connect::Cancelled;
            }

            let Some(result) = cancel.run_until_cancelled(dial()).await else {
                return Connect::Cancelled;
            };
            match result {
                Ok(stream) => {
                    log::info!("connected to backend {} on attempt {}", self.target(), attempt);
                    return Connect::Connected(stream);
                }
                Err(err) => {
                    log::warn!(
                        "connection attempt {}/{} to {} failed: {}",
                        attempt,
                        self.attempts,
                        self.target(),
                        err,
                    );
                    last = err;
                }
            }

            if attempt < self.attempts && signal::pause(self.retry_delay, cancel).await.is_err() {
                return Connect::Cancelled;
            }
        }

        log::error!(
            "all {} connection attempts to {} failed",
            self.attempts,
            self.target()
        );
        Connect::Exhausted {
            attempts: self.attempts,
            last,
        }
    }

    /// Unbounded apart from cancellation. Each successful dial is closed
    /// immediately.
    pub async fn wait_reachable(&self, cancel: &CancellationToken) -> Result<(), Cancelled> {
        self.wait_reachable_with(cancel, move || self.dial()).await
    }

    pub async fn wait_reachable_with<T, F, Fut>(
        &self,
        cancel: &CancellationToken,
        mut dial: F,
    ) -> Result<(), Cancelled>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = io::Result<T>>,
    {
        log::info!("waiting for {} to accept TCP connections", self.target());

        loop {
            let Some(result) = cancel.run_until_cancelled(dial()).await else {
                return Err(Cancelled);
            };
            match result {
                Ok(_) => {
                    log::info!("{} is accepting TCP connections", self.target());
                    return Ok(());
                }
                Err(err) => log::debug!("{} not reachable yet: {}", self.target(), err),
            }

            signal::pause(self.poll_interval, cancel).await?;
        }
    }

    async fn dial(&self) -> io::Result<TcpStream> {
        match timeout(
            self.attempt_timeout,
            TcpStream::connect((self.host.as_str(), self.port)),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "connect timeout")),
        }
    }
}
