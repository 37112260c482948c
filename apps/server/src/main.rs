//! cast-server - standalone headless cast streaming server.

mod config;

use std::net::IpAddr;
use std::path::PathBuf;
use std::process::ExitCode;

use castcore::block_source::BlockSource;
use castcore::{bootstrap_services, start_server, NetworkContext};
use clap::Parser;
use tokio::signal;

use crate::config::ServerConfig;

/// Headless cast streaming server.
#[derive(Parser, Debug)]
#[command(name = "cast-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (YAML).
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(short, long, default_value = "info", env = "CASTCORE_LOG_LEVEL")]
    log_level: log::LevelFilter,

    /// Bind port (overrides config file).
    #[arg(short = 'p', long, env = "CASTCORE_LISTEN_PORT")]
    port: Option<u16>,

    /// Bind host (overrides config file).
    #[arg(short = 'H', long, env = "CASTCORE_LISTEN_HOST")]
    listen_host: Option<String>,

    /// Advertise IP address (overrides config file).
    #[arg(short = 'a', long, env = "CASTCORE_ADVERTISE_IP")]
    advertise_ip: Option<IpAddr>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    env_logger::Builder::new()
        .filter_level(args.log_level)
        .format_timestamp_millis()
        .init();

    log::info!("cast-server v{}", env!("CARGO_PKG_VERSION"));

    let mut config = match ServerConfig::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            log::error!("failed to load configuration: {:#}", e);
            return ExitCode::from(2);
        }
    };

    if let Some(port) = args.port {
        config.listen_port = port;
    }
    if let Some(host) = args.listen_host {
        config.listen_host = host;
    }
    if let Some(ip) = args.advertise_ip {
        config.advertise_ip = Some(ip);
    }

    let network = if let Some(ip) = config.advertise_ip {
        log::info!(
            "configuration: listen={}:{}, advertise={}",
            config.listen_host,
            config.listen_port,
            ip
        );
        NetworkContext::explicit(config.listen_host.clone(), config.listen_port, ip)
    } else {
        log::info!(
            "configuration: listen={}:{}, advertise=auto",
            config.listen_host,
            config.listen_port
        );
        match NetworkContext::auto_detect(config.listen_host.clone(), config.listen_port) {
            Ok(network) => network,
            Err(e) => {
                log::error!(
                    "failed to auto-detect local IP address: {}. \
                     Specify --advertise-ip or set CASTCORE_ADVERTISE_IP.",
                    e
                );
                return ExitCode::from(2);
            }
        }
    };

    let core_config = config.to_core_config();
    let state = match bootstrap_services(&core_config, network) {
        Ok(state) => state,
        Err(e) => {
            log::error!("failed to bootstrap services: {}", e);
            return ExitCode::from(2);
        }
    };

    if let Err(e) = state.block_source.health_check().await {
        log::error!("block source readiness check failed: {}", e);
        return ExitCode::from(1);
    }

    log::info!("services bootstrapped successfully");

    let server_handle = tokio::spawn(async move {
        if let Err(e) = start_server(state).await {
            log::error!("server error: {}", e);
        }
    });

    shutdown_signal().await;
    log::info!("shutdown signal received");

    server_handle.abort();
    ExitCode::SUCCESS
}

/// Waits for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
