use clap::Parser;
use tokio::net::TcpListener;
use tracing::{error, info};

use respd::clock::Clock;
use respd::config::{ServerConfig, DEFAULT_CONFIG_PATH};
use respd::server;

#[derive(Parser, Debug)]
#[command(
    name = "respd-server",
    version,
    about = "In-memory key-value server speaking RESP v2"
)]
struct Cli {
    /// Configuration file path
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: String,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();
    let config = ServerConfig::load(Some(&cli.config));
    let address = config.address();

    let listener = match TcpListener::bind(&address).await {
        Ok(listener) => listener,
        Err(err) => {
            error!(%address, cause = %err, "bind failed");
            std::process::exit(1);
        }
    };
    info!(%address, "listening");

    if let Err(err) = server::run(listener, shutdown_signal(), &config, Clock::System).await {
        error!(cause = %err, "server terminated abnormally");
        std::process::exit(1);
    }
}

/// Completes on the first of SIGHUP, SIGQUIT, SIGTERM, or SIGINT.
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let (Ok(mut hup), Ok(mut quit), Ok(mut term), Ok(mut int)) = (
        signal(SignalKind::hangup()),
        signal(SignalKind::quit()),
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
    ) else {
        error!("failed to install signal handlers");
        return std::future::pending().await;
    };

    tokio::select! {
        _ = hup.recv() => {}
        _ = quit.recv() => {}
        _ = term.recv() => {}
        _ = int.recv() => {}
    }
}
