use crate::error::SessionError;
use std::os::fd::{FromRawFd, OwnedFd, RawFd};
use tokio::net::TcpStream;

/// `Accept=yes` units with `StandardInput=socket` pass the connection on stdin.
pub const STDIN_FD: RawFd = 0;
pub const SD_LISTEN_FDS_START: RawFd = 3;

/// fd 3 when `LISTEN_FDS` announces exactly one descriptor for this
/// process, stdin otherwise.
pub fn inherited_fd() -> RawFd {
    let for_us = std::env::var("LISTEN_PID")
        .ok()
        .and_then(|pid| pid.parse::<u32>().ok())
        .is_none_or(|pid| pid == std::process::id());
    let count = std::env::var("LISTEN_FDS")
        .ok()
        .and_then(|n| n.parse::<u32>().ok());

    match count {
        Some(1) if for_us => SD_LISTEN_FDS_START,
        _ => STDIN_FD,
    }
}

pub fn inherited_connection() -> Result<TcpStream, SessionError> {
    let fd = inherited_fd();
    log::debug!("adopting inherited connection on fd {}", fd);
    // SAFETY: the descriptor is handed to this process by the service manager
    // and nothing else in the process refers to it.
    let owned = unsafe { OwnedFd::from_raw_fd(fd) };
    adopt(owned)
}

/// Must be called from within the runtime.
pub fn adopt(fd: OwnedFd) -> Result<TcpStream, SessionError> {
    let stream = std::net::TcpStream::from(fd);
    let peer = stream.peer_addr().map_err(SessionError::Acquire)?;
    stream.set_nonblocking(true).map_err(SessionError::Acquire)?;
    let stream = TcpStream::from_std(stream).map_err(SessionError::Acquire)?;
    log::info!("client connected from {}", peer);
    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_adopt_connected_socket() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let mut client = tokio::net::TcpStream::connect(listener.local_addr().unwrap())
            .await
            .unwrap();
        let (accepted, _) = listener.accept().unwrap();

        let mut inbound = adopt(OwnedFd::from(accepted)).unwrap();
        client.write_all(b"hello").await.unwrap();

        let mut buf = [0u8; 5];
        inbound.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");
    }

    #[tokio::test]
    async fn test_adopt_rejects_non_socket() {
        let file = std::fs::File::open("/dev/null").unwrap();
        let err = adopt(OwnedFd::from(file)).unwrap_err();
        assert!(matches!(err, SessionError::Acquire(_)));
        assert_eq!(err.exit_code(), 1);
    }
}
