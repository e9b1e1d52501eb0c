use crate::{
    bridge::{BridgeEnd, ConnectionBridge},
    config::Config,
    connector::{Connect, RetryingConnector},
    error::SessionError,
    idle::{ConnectionCounter, IdleDecision, IdleShutdownDecider},
    lifecycle::{LifecycleController, Orchestrator},
    readiness::{Readiness, ReadinessGate},
    signal,
    status::StatusProbe,
};
use bytes::{Bytes, BytesMut};
use std::fmt;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    time::timeout,
};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    AcquireConnection,
    EnsureBackendRunning,
    AwaitTcpReachable,
    AwaitProtocolReady,
    SettleDelay,
    BufferInitialData,
    EstablishBackendConnection,
    ReplayInitialData,
    Bridge,
    DecideShutdown,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendState {
    NotRunning,
    Starting,
    TcpReachable,
    ProtocolReady,
    Stopping,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    Completed,
    ShutdownRequested,
}

impl SessionEnd {
    pub fn exit_code(&self) -> u8 {
        0
    }
}

impl fmt::Display for SessionEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionEnd::Completed => f.write_str("session completed"),
            SessionEnd::ShutdownRequested => f.write_str("shutdown requested"),
        }
    }
}

pub struct SessionRunner<O, P, C> {
    config: Config,
    lifecycle: LifecycleController<O>,
    gate: ReadinessGate<P>,
    connector: RetryingConnector,
    counter: C,
    cancel: CancellationToken,
    phase: Phase,
    backend: BackendState,
}

impl<O, P, C> SessionRunner<O, P, C>
where
    O: Orchestrator,
    P: StatusProbe,
    C: ConnectionCounter,
{
    pub fn new(
        config: Config,
        orchestrator: O,
        probe: P,
        counter: C,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            lifecycle: LifecycleController::new(orchestrator),
            gate: ReadinessGate::new(probe, &config),
            connector: RetryingConnector::new(&config),
            counter,
            cancel,
            config,
            phase: Phase::AcquireConnection,
            backend: BackendState::NotRunning,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn backend_state(&self) -> BackendState {
        self.backend
    }

    /// `inbound` is dropped, and with it closed, on every return path.
    pub async fn run<S>(&mut self, mut inbound: S) -> Result<SessionEnd, SessionError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        self.enter(Phase::EnsureBackendRunning);
        if self.lifecycle.ensure_running().await? {
            self.set_backend(BackendState::Starting);
        }

        self.enter(Phase::AwaitTcpReachable);
        if self.connector.wait_reachable(&self.cancel).await.is_err() {
            return Ok(self.shutdown_requested());
        }
        self.set_backend(BackendState::TcpReachable);

        self.enter(Phase::AwaitProtocolReady);
        let readiness = self
            .gate
            .await_ready(self.config.ready_timeout, &self.cancel)
            .await;
        match readiness {
            Readiness::Ready(_) => self.set_backend(BackendState::ProtocolReady),
            Readiness::TimedOut => {
                return Err(SessionError::ReadinessTimeout(self.config.ready_timeout));
            }
            Readiness::Cancelled => return Ok(self.shutdown_requested()),
        }

        self.enter(Phase::SettleDelay);
        log::info!(
            "giving the backend {:?} to finish initialising",
            self.config.settle_delay
        );
        if signal::pause(self.config.settle_delay, &self.cancel)
            .await
            .is_err()
        {
            return Ok(self.shutdown_requested());
        }

        self.enter(Phase::BufferInitialData);
        let initial = self.buffer_initial_data(&mut inbound).await;

        self.enter(Phase::EstablishBackendConnection);
        let outbound = match self.connector.connect(&self.cancel).await {
            Connect::Connected(stream) => stream,
            Connect::Exhausted { attempts, last } => {
                return Err(SessionError::ConnectExhausted {
                    target: self.connector.target(),
                    attempts,
                    last,
                });
            }
            Connect::Cancelled => return Ok(self.shutdown_requested()),
        };

        self.finish(inbound, outbound, initial).await;
        Ok(SessionEnd::Completed)
    }

    /// Replay, bridge and the idle decision. Neither a failed replay nor a
    /// cancelled bridge skips the decision.
    async fn finish<S, B>(&mut self, mut inbound: S, mut outbound: B, initial: Bytes)
    where
        S: AsyncRead + AsyncWrite + Unpin,
        B: AsyncRead + AsyncWrite + Unpin,
    {
        self.enter(Phase::ReplayInitialData);
        if !initial.is_empty() {
            match outbound.write_all(&initial).await {
                Ok(()) => log::info!("replayed {} bytes of initial data", initial.len()),
                Err(err) => log::error!("failed to replay initial data: {}", err),
            }
        }
        drop(initial);

        self.enter(Phase::Bridge);
        let report = ConnectionBridge::new(self.config.chunk_size)
            .bridge(&mut inbound, &mut outbound, &self.cancel)
            .await;
        drop(outbound);
        drop(inbound);
        log::info!(
            "connections closed: {} bytes client->backend, {} bytes backend->client",
            report.client_to_backend,
            report.backend_to_client
        );
        if let BridgeEnd::Transport(..) = report.end {
            log::warn!("session ended by a transport error");
        }

        self.enter(Phase::DecideShutdown);
        let decision = IdleShutdownDecider::new(self.lifecycle.orchestrator(), &self.counter)
            .maybe_stop_backend()
            .await;
        if decision == IdleDecision::Stopped {
            self.set_backend(BackendState::Stopping);
        }

        self.enter(Phase::Closed);
    }

    /// Nothing pending within the wait means an empty buffer.
    async fn buffer_initial_data<S>(&self, inbound: &mut S) -> Bytes
    where
        S: AsyncRead + Unpin,
    {
        let mut buf = BytesMut::zeroed(self.config.chunk_size);
        let n = match timeout(self.config.initial_data_wait, inbound.read(&mut buf)).await {
            Ok(Ok(n)) => n,
            Ok(Err(err)) => {
                log::error!("failed to read initial client data: {}", err);
                0
            }
            Err(_) => 0,
        };
        buf.truncate(n);
        log::info!("buffered {} bytes of initial client data", n);
        buf.freeze()
    }

    fn enter(&mut self, phase: Phase) {
        debug_assert!(phase > self.phase, "{:?} -> {:?}", self.phase, phase);
        log::debug!("session phase {:?} -> {:?}", self.phase, phase);
        self.phase = phase;
    }

    fn set_backend(&mut self, state: BackendState) {
        log::debug!("backend state {:?} -> {:?}", self.backend, state);
        self.backend = state;
    }

    fn shutdown_requested(&self) -> SessionEnd {
        log::info!(
            "shutdown requested during {:?}, leaving without forwarding",
            self.phase
        );
        SessionEnd::ShutdownRequested
    }
}
