use crate::{
    config::Config,
    signal,
    status::{ServerStatus, StatusProbe},
};
use tokio::time::{Duration, Instant, timeout_at};
use tokio_util::sync::CancellationToken;

#[derive(Debug, PartialEq, Eq)]
pub enum Readiness {
    Ready(ServerStatus),
    TimedOut,
    Cancelled,
}

pub struct ReadinessGate<P> {
    probe: P,
    host: String,
    port: u16,
    poll_interval: Duration,
}

impl<P: StatusProbe> ReadinessGate<P> {
    pub fn new(probe: P, config: &Config) -> Self {
        Self {
            probe,
            host: config.target_host.clone(),
            port: config.target_port,
            poll_interval: config.poll_interval,
        }
    }

    #[cfg(test)]
    pub(crate) fn probe(&self) -> &P {
        &self.probe
    }

    /// Neither a query nor a sleep outlives the deadline.
    pub async fn await_ready(&self, timeout: Duration, cancel: &CancellationToken) -> Readiness {
        log::info!(
            "waiting up to {:?} for {}:{} to answer status requests",
            timeout,
            self.host,
            self.port
        );
        let deadline = Instant::now() + timeout;
        let mut attempts = 0u32;

        loop {
            if cancel.is_cancelled() {
                return Readiness::Cancelled;
            }

            attempts += 1;
            let query = timeout_at(deadline, self.probe.query_status(&self.host, self.port));
            let Some(result) = cancel.run_until_cancelled(query).await else {
                return Readiness::Cancelled;
            };
            match result {
                Ok(Ok(status)) if status.is_ready() => {
                    log::info!(
                        "backend ready after {} probe(s): version {} (protocol {}), players {}/{}",
                        attempts,
                        status.version,
                        status.protocol,
                        status.players_online.unwrap_or(0),
                        status.players_max.unwrap_or(0),
                    );
                    return Readiness::Ready(status);
                }
                Ok(Ok(_)) => log::debug!("backend answered status without a version label"),
                Ok(Err(err)) => log::debug!("backend not ready yet: {}", err),
                Err(_) => log::debug!("status query still pending at the deadline"),
            }

            let now = Instant::now();
            if now >= deadline {
                log::error!(
                    "backend did not become ready within {:?} ({} probes)",
                    timeout,
                    attempts
                );
                return Readiness::TimedOut;
            }

            let wake = deadline.min(now + self.poll_interval);
            if signal::pause_until(wake, cancel).await.is_err() {
                return Readiness::Cancelled;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProbeError;
    use async_trait::async_trait;
    use std::{
        io,
        sync::atomic::{AtomicU32, Ordering},
    };

    /// Fails `failures` times, then reports `version`.
    struct ScriptedProbe {
        failures: u32,
        version: &'static str,
        calls: AtomicU32,
    }

    impl ScriptedProbe {
        fn new(failures: u32, version: &'static str) -> Self {
            Self {
                failures,
                version,
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl StatusProbe for ScriptedProbe {
        async fn query_status(&self, _host: &str, _port: u16) -> Result<ServerStatus, ProbeError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                return Err(ProbeError::Io(io::Error::new(
                    io::ErrorKind::ConnectionRefused,
                    "refused",
                )));
            }
            Ok(ServerStatus {
                version: self.version.to_owned(),
                protocol: 763,
                players_online: None,
                players_max: None,
            })
        }
    }

    fn gate(probe: ScriptedProbe, poll: Duration) -> ReadinessGate<ScriptedProbe> {
        let mut config = Config::default();
        config.poll_interval = poll;
        ReadinessGate::new(probe, &config)
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_after_failures() {
        let gate = gate(ScriptedProbe::new(3, "1.20"), Duration::from_secs(2));
        let start = Instant::now();

        let readiness = gate
            .await_ready(Duration::from_secs(60), &CancellationToken::new())
            .await;

        match readiness {
            Readiness::Ready(status) => assert_eq!(status.version, "1.20"),
            other => panic!("unexpected readiness: {:?}", other),
        }
        assert_eq!(gate.probe.calls.load(Ordering::SeqCst), 4);
        assert_eq!(start.elapsed(), Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_immediately_without_delay() {
        let gate = gate(ScriptedProbe::new(0, "1.20"), Duration::from_secs(2));
        let start = Instant::now();

        let readiness = gate
            .await_ready(Duration::from_secs(60), &CancellationToken::new())
            .await;

        assert!(matches!(readiness, Readiness::Ready(_)));
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_within_bound() {
        let poll = Duration::from_secs(2);
        let timeout = Duration::from_secs(7);
        let gate = gate(ScriptedProbe::new(u32::MAX, "1.20"), poll);
        let start = Instant::now();

        let readiness = gate.await_ready(timeout, &CancellationToken::new()).await;

        assert_eq!(readiness, Readiness::TimedOut);
        assert!(start.elapsed() >= timeout);
        assert!(start.elapsed() <= timeout + poll);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_version_is_not_ready() {
        let gate = gate(ScriptedProbe::new(0, ""), Duration::from_secs(1));
        let readiness = gate
            .await_ready(Duration::from_secs(3), &CancellationToken::new())
            .await;
        assert_eq!(readiness, Readiness::TimedOut);
        assert!(gate.probe.calls.load(Ordering::SeqCst) >= 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_while_polling() {
        let gate = gate(ScriptedProbe::new(u32::MAX, "1.20"), Duration::from_secs(2));
        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            canceller.cancel();
        });

        let start = Instant::now();
        let readiness = gate.await_ready(Duration::from_secs(60), &token).await;

        assert_eq!(readiness, Readiness::Cancelled);
        assert!(start.elapsed() < Duration::from_secs(6));
    }

    /// Takes `delay` to answer, and never with a version.
    struct StalledServer {
        delay: Duration,
        calls: AtomicU32,
    }

    #[async_trait]
    impl StatusProbe for StalledServer {
        async fn query_status(&self, _host: &str, _port: u16) -> Result<ServerStatus, ProbeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            Err(ProbeError::Timeout(self.delay))
        }
    }

    fn stalled_gate(delay: Duration, poll: Duration) -> ReadinessGate<StalledServer> {
        let mut config = Config::default();
        config.poll_interval = poll;
        let probe = StalledServer {
            delay,
            calls: AtomicU32::new(0),
        };
        ReadinessGate::new(probe, &config)
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_queries_do_not_outlive_deadline() {
        let poll = Duration::from_secs(2);
        let timeout = Duration::from_secs(7);
        let gate = stalled_gate(Duration::from_secs(5), poll);
        let start = Instant::now();

        let readiness = gate.await_ready(timeout, &CancellationToken::new()).await;

        assert_eq!(readiness, Readiness::TimedOut);
        assert!(start.elapsed() >= timeout);
        assert!(start.elapsed() <= timeout + poll);
        assert!(gate.probe.calls.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_pending_query() {
        let poll = Duration::from_secs(2);
        let gate = stalled_gate(Duration::from_secs(5), poll);
        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            canceller.cancel();
        });

        let start = Instant::now();
        let readiness = gate.await_ready(Duration::from_secs(60), &token).await;

        assert_eq!(readiness, Readiness::Cancelled);
        assert!(start.elapsed() < poll);
        assert_eq!(gate.probe.calls.load(Ordering::SeqCst), 1);
    }
}
