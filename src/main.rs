//! Sandbox VNC reverse proxy.
//!
//! # Architecture Overview
//!
//! ```text
//!                       ┌───────────────────────────────────────────────┐
//!                       │               SANDBOX VNC PROXY               │
//!   Browser             │                                               │
//!   /{host}/{path}  ────┼─▶ http::server ──▶ http::request               │
//!   /websockify         │        │            (routing + token)         │
//!                       │        │                   │                  │
//!                       │        │        ┌──────────┴─────────┐        │
//!                       │        │        ▼                    ▼        │
//!                       │        │   http::websocket     http::forward  │
//!                       │        │   (101 + splice)      (token::rewrite)│──▶ Sandbox host
//!                       │        ▼                                      │
//!                       │   security::headers (CORS, header stripping)  │
//!                       │                                               │
//!                       │   config (TOML, --watch) · observability ·    │
//!                       │   lifecycle (signals, shutdown) · net::tls    │
//!                       └───────────────────────────────────────────────┘
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use sandbox_vnc_proxy::config::validation::validate_config;
use sandbox_vnc_proxy::config::watcher::ConfigWatcher;
use sandbox_vnc_proxy::config::{load_config, ConfigError, ProxyConfig};
use sandbox_vnc_proxy::lifecycle::{wait_for_signal, Shutdown};
use sandbox_vnc_proxy::net::tls;
use sandbox_vnc_proxy::observability::{logging, metrics};
use sandbox_vnc_proxy::HttpServer;

#[derive(Debug, Parser)]
#[command(name = "sandbox-vnc-proxy", version, about = "Reverse proxy for sandbox noVNC sessions")]
struct Cli {
    /// Path to a TOML configuration file. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override `listener.bind_address`.
    #[arg(short, long)]
    bind: Option<String>,

    /// Reload the configuration file when it changes.
    #[arg(long, requires = "config")]
    watch: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ProxyConfig::default(),
    };
    if let Some(bind) = cli.bind {
        config.listener.bind_address = bind;
        validate_config(&config).map_err(ConfigError::Validation)?;
    }

    logging::init_logging(&config.observability.log_level);
    tracing::info!("sandbox-vnc-proxy v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        bind_address = %config.listener.bind_address,
        tls = config.listener.tls.is_some(),
        upstream_scheme = %config.upstream.scheme,
        marker = %config.upstream.sandbox_host_marker,
        rewrite_enabled = config.rewrite.enabled,
        rewrite_max_body_bytes = config.rewrite.max_body_bytes,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    // The watcher stops delivering events once dropped.
    let (_watcher, config_updates) = match (&cli.config, cli.watch) {
        (Some(path), true) => {
            let (watcher, updates) = ConfigWatcher::new(path);
            (Some(watcher.run()?), updates)
        }
        _ => {
            let (_tx, updates) = mpsc::unbounded_channel();
            (None, updates)
        }
    };

    let shutdown = Shutdown::new();
    let server_shutdown = shutdown.subscribe();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            wait_for_signal().await;
            shutdown.trigger();
        }
    });

    let server = HttpServer::new(config.clone())?;

    match &config.listener.tls {
        Some(tls_config) => {
            let addr: SocketAddr = config.listener.bind_address.parse()?;
            let rustls = tls::from_listener_config(tls_config).await?;
            server.run_tls(addr, rustls, config_updates, server_shutdown).await?;
        }
        None => {
            let listener = TcpListener::bind(&config.listener.bind_address).await?;
            tracing::info!(address = %listener.local_addr()?, "Listening for connections");
            server.run(listener, config_updates, server_shutdown).await?;
        }
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
