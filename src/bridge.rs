use std::{fmt, io};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Client,
    Backend,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Client => f.write_str("client"),
            Side::Backend => f.write_str("backend"),
        }
    }
}

/// Why the bridge stopped. Every variant tears down both directions.
#[derive(Debug)]
pub enum BridgeEnd {
    Closed(Side),
    Reset(Side),
    Transport(Side, io::Error),
    Cancelled,
}

#[derive(Debug)]
pub struct BridgeReport {
    pub end: BridgeEnd,
    pub client_to_backend: u64,
    pub backend_to_client: u64,
}

enum Event {
    Read(Side, io::Result<usize>),
    Cancelled,
}

pub struct ConnectionBridge {
    chunk_size: usize,
}

impl ConnectionBridge {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
        }
    }

    pub async fn bridge<A, B>(
        &self,
        client: &mut A,
        backend: &mut B,
        cancel: &CancellationToken,
    ) -> BridgeReport
    where
        A: AsyncRead + AsyncWrite + Unpin,
        B: AsyncRead + AsyncWrite + Unpin,
    {
        let mut client_buf = vec![0u8; self.chunk_size];
        let mut backend_buf = vec![0u8; self.chunk_size];
        let mut client_to_backend = 0u64;
        let mut backend_to_client = 0u64;

        log::debug!("bridge started");

        let end = loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => Event::Cancelled,
                res = client.read(&mut client_buf) => Event::Read(Side::Client, res),
                res = backend.read(&mut backend_buf) => Event::Read(Side::Backend, res),
            };

            let (from, n) = match event {
                Event::Cancelled => break BridgeEnd::Cancelled,
                Event::Read(side, Ok(0)) => break BridgeEnd::Closed(side),
                Event::Read(side, Ok(n)) => (side, n),
                Event::Read(side, Err(err)) => break classify(side, err),
            };

            let (to, written) = match from {
                Side::Client => (
                    Side::Backend,
                    backend.write_all(&client_buf[..n]).await,
                ),
                Side::Backend => (Side::Client, client.write_all(&backend_buf[..n]).await),
            };
            if let Err(err) = written {
                break classify(to, err);
            }

            match from {
                Side::Client => client_to_backend += n as u64,
                Side::Backend => backend_to_client += n as u64,
            }
        };

        match &end {
            BridgeEnd::Closed(side) => log::debug!("{} closed the connection", side),
            BridgeEnd::Reset(side) => log::warn!("{} reset the connection", side),
            BridgeEnd::Transport(side, err) => log::error!("I/O error on {} side: {}", side, err),
            BridgeEnd::Cancelled => log::info!("bridge interrupted by shutdown request"),
        }

        BridgeReport {
            end,
            client_to_backend,
            backend_to_client,
        }
    }
}

fn classify(side: Side, err: io::Error) -> BridgeEnd {
    match err.kind() {
        io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::BrokenPipe => BridgeEnd::Reset(side),
        _ => BridgeEnd::Transport(side, err),
    }
}
