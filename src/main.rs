// Copyright 2026 The Relayguard Project
// SPDX-License-Identifier: Apache-2.0

use clap::Parser;
use relayguard::config;
use relayguard::metering;
use relayguard::proxy;
use relayguard::relay;

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "relayguard",
    about = "Streaming chat-completion proxy with sentence-level moderation"
)]
struct Cli {
    /// Path to the relayguard.yaml config file
    #[arg(long, default_value = "relayguard.yaml", env = "RELAYGUARD_CONFIG")]
    config: String,

    /// Address to bind
    #[arg(long, default_value = "0.0.0.0", env = "RELAYGUARD_HOST")]
    host: IpAddr,

    /// Port to listen on
    #[arg(long, default_value_t = 9000, env = "PORT")]
    port: u16,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .json()
        .with_target(false)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let addr = SocketAddr::new(cli.host, cli.port);
    tracing::info!(%addr, "relayguard starting");

    let source = config::FileSource {
        path: std::path::PathBuf::from(cli.config),
    };
    let config = match config::load_config(&source) {
        Ok(c) => Arc::new(c),
        Err(e) => {
            tracing::error!("failed to load config: {e}");
            std::process::exit(1);
        }
    };

    tracing::info!(
        version = %config.version,
        environment = %config.environment,
        upstream = %config.upstream.base_url,
        on_failure = ?config.moderation.on_failure,
        contract_hash = %config.contract_hash,
        "config loaded"
    );

    metering::preload_tokenizer();

    let counters = match metering::build_sink(&config.metering).await {
        Ok(sink) => sink,
        Err(e) => {
            tracing::warn!("metering disabled: {e}");
            None
        }
    };

    let upstream: Arc<dyn proxy::Relay> = Arc::new(relay::build_relay(config, counters));
    let app = proxy::build_router(upstream);

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!(%addr, "failed to bind: {e}");
            std::process::exit(1);
        }
    };

    tracing::info!(%addr, "relayguard listening");

    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!("server error: {e}");
        std::process::exit(1);
    }
}
