// File:    main.rs
// Author:  apezoo
// Date:    2026-10-18
//
// Description: The otp-relay binary: loads configuration and runs the relay until Ctrl-C.
//
// License:
// This project is licensed under the terms of the GNU AGPLv3 license.
// See the LICENSE.md file in the project root for full license information.

//! Store-and-forward relay for one-time-pad peers.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use local_ip_address::local_ip;
use log::{info, warn};
use otp_relay::{RelayConfig, RelayServer};

#[derive(Parser)]
#[command(author, version, about = "Store-and-forward relay for one-time-pad peers", long_about = None)]
struct Args {
    /// Path to configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Bind address (IP), overrides config
    #[arg(long)]
    host: Option<String>,

    /// TCP port, overrides config
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => RelayConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => RelayConfig::default(),
    };

    // CLI overrides
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }

    info!(
        "relay config: max_connections={}, registration_timeout={}s, outbox={}, unknown_recipient={:?}, queue={}x{:?} (total {})",
        config.max_connections,
        config.registration_timeout_secs,
        config.outbox_capacity,
        config.unknown_recipient,
        config.queue.max_per_recipient,
        config.queue.overflow,
        config.queue.max_total,
    );

    let server = RelayServer::bind(&config)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr()))?;
    let addr = server.local_addr().context("failed to read bound address")?;
    info!("listening on {addr}");
    match local_ip() {
        Ok(ip) => info!("peers on this network can connect to {ip}:{}", addr.port()),
        Err(e) => warn!("could not determine LAN address: {e}"),
    }

    server
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("failed to listen for Ctrl-C: {e}");
                std::future::pending::<()>().await;
            }
            info!("Ctrl-C received, shutting down");
        })
        .await;

    Ok(())
}
