//! StrandKV server executable.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};

use strandkv::{Config, DatabaseServer, NetworkConfig, NetworkServer, Result};

#[derive(Debug, Parser)]
#[command(name = "strandkv-server", version, about = "StrandKV database server")]
struct Args {
    /// Path to a TOML config file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Database directory (overrides the config file).
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Listen address (overrides the config file).
    #[arg(long)]
    listen_address: Option<String>,

    /// Listen port (overrides the config file).
    #[arg(long)]
    listen_port: Option<u16>,

    /// Worker threads; 0 uses available parallelism.
    #[arg(long, default_value_t = 0)]
    workers: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("strandkv=info")),
        )
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::load_from_file(path)?,
        None => Config::default(),
    };
    if let Some(db_path) = args.db_path {
        config.db_path = db_path;
    }
    if let Some(listen_address) = args.listen_address {
        config.listen_address = listen_address;
    }
    if let Some(listen_port) = args.listen_port {
        config.listen_port = listen_port;
    }
    config.validate()?;

    tracing::info!(
        db_path = %config.db_path.display(),
        listen = %config.listen_addr(),
        "starting strandkv v{}",
        strandkv::VERSION
    );

    let server = Arc::new(DatabaseServer::open(&config, args.workers)?);
    server.start();

    let network = NetworkServer::new(
        Arc::clone(&server),
        NetworkConfig {
            host: config.listen_address.clone(),
            port: config.listen_port,
        },
    );
    Arc::clone(&network).start().await?;
    tracing::info!(port = network.port(), "ready");

    wait_for_shutdown_signal().await;
    tracing::info!("shutdown signal received");

    network.stop().await;
    server.stop();
    tracing::info!("bye");
    Ok(())
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigint =
            signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
        let mut sigterm =
            signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");

        tokio::select! {
            _ = sigint.recv() => {}
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to listen for ctrl-c");
    }
}
