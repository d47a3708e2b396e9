//! termgate-server: browser terminal gateway.
//!
//! Accepts WebSocket channels at `/ws-shell/{sessionKey}` and either runs
//! allowlisted commands on this host or relays each channel to an external
//! terminal backend.

mod config;
mod server;
mod transport;

use clap::Parser;
use config::{CliOverrides, Mode, ServerConfig};
use server::GatewayServer;
use std::path::PathBuf;
use tracing::{error, info};

/// termgate-server: browser terminal gateway
#[derive(Parser, Debug)]
#[command(name = "termgate-server", version, about = "Browser terminal gateway")]
struct Cli {
    /// Listen port
    #[arg(short, long)]
    port: Option<u16>,

    /// Bind address
    #[arg(long)]
    bind: Option<String>,

    /// Serve channels locally or relay them to terminal backends
    #[arg(long, value_enum)]
    mode: Option<Mode>,

    /// Config file path
    #[arg(long, default_value = "~/.termgate/config.toml")]
    config: String,

    /// Maximum concurrent sessions
    #[arg(long)]
    max_sessions: Option<usize>,

    /// External command timeout in seconds
    #[arg(long)]
    command_timeout: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing
    use tracing_subscriber::EnvFilter;
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "starting termgate-server");

    let overrides = CliOverrides {
        port: cli.port,
        bind: cli.bind,
        mode: cli.mode,
        max_sessions: cli.max_sessions,
        command_timeout: cli.command_timeout,
    };
    let config_path = PathBuf::from(&cli.config);
    let server_config = match ServerConfig::load(Some(&config_path), &overrides) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(error = %e, "failed to load config");
            std::process::exit(1);
        }
    };

    let gateway = match GatewayServer::new(server_config) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "failed to create server");
            std::process::exit(1);
        }
    };

    if let Err(e) = gateway.run(shutdown_signal()).await {
        error!(error = %e, "server error");
        std::process::exit(1);
    }

    info!("termgate-server stopped");
}

/// Wait for SIGTERM or SIGINT (Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                ctrl_c.await.ok();
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}
