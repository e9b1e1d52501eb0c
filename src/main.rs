use mc_wake_proxy::{
    activation,
    config::Config,
    idle::SystemdSocketCounter,
    lifecycle::ComposeOrchestrator,
    session::SessionRunner,
    signal,
    status::JavaStatusProbe,
};
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cancel = CancellationToken::new();
    signal::spawn_signal_listener(cancel.clone());

    let inbound = match activation::inherited_connection() {
        Ok(stream) => stream,
        Err(err) => {
            log::error!("{}", err);
            return ExitCode::from(err.exit_code());
        }
    };

    let config = Config::default();
    log::info!("proxying to backend {}", config.target());

    let mut runner = SessionRunner::new(
        config.clone(),
        ComposeOrchestrator::new(&config),
        JavaStatusProbe::new(config.status_probe_timeout),
        SystemdSocketCounter::new(&config),
        cancel,
    );

    match runner.run(inbound).await {
        Ok(end) => {
            log::info!("{}", end);
            ExitCode::from(end.exit_code())
        }
        Err(err) => {
            log::error!("{}", err);
            ExitCode::from(err.exit_code())
        }
    }
}
