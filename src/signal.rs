use tokio::time::{Duration, Instant, sleep, sleep_until};
use tokio_util::sync::CancellationToken;

/// Marker returned when a wait was interrupted by a termination request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cancelled;

/// Cancels `token` on the first SIGINT or SIGTERM. The token is never reset.
pub fn spawn_signal_listener(token: CancellationToken) {
    tokio::spawn(async move {
        let name = wait_for_termination().await;
        log::info!("received {}, shutting down", name);
        token.cancel();
    });
}

#[cfg(unix)]
async fn wait_for_termination() -> &'static str {
    use tokio::signal::unix::{SignalKind, signal};

    let mut term = match signal(SignalKind::terminate()) {
        Ok(term) => term,
        Err(err) => {
            log::warn!("cannot listen for SIGTERM: {}", err);
            let _ = tokio::signal::ctrl_c().await;
            return "SIGINT";
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => "SIGINT",
        _ = term.recv() => "SIGTERM",
    }
}

#[cfg(not(unix))]
async fn wait_for_termination() -> &'static str {
    let _ = tokio::signal::ctrl_c().await;
    "SIGINT"
}

pub async fn pause(duration: Duration, token: &CancellationToken) -> Result<(), Cancelled> {
    tokio::select! {
        _ = token.cancelled() => Err(Cancelled),
        _ = sleep(duration) => Ok(()),
    }
}

pub async fn pause_until(deadline: Instant, token: &CancellationToken) -> Result<(), Cancelled> {
    tokio::select! {
        _ = token.cancelled() => Err(Cancelled),
        _ = sleep_until(deadline) => Ok(()),
    }
}
