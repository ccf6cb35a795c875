//! WireHub Server: session gateway over TCP and WebSocket
//!
//! Main entry point that wires the listeners, the session manager and the
//! optional upstream link together.

mod echo;

use std::sync::Arc;

use bytes::Bytes;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{EnvFilter, fmt};

use wirehub_core::config::AppConfig;
use wirehub_core::AppResult;
use wirehub_net::{
    Manager, Protocol, ReconnectingClient, TcpServer, WebsocketServer, WebsocketTlsServer,
    json_codec,
};

use crate::echo::{EchoProtocol, UpstreamProtocol};

/// Command-line arguments.
#[derive(Debug, Parser)]
#[command(name = "wirehub-server", version, about = "Session gateway over TCP and WebSocket")]
struct Args {
    /// Directory holding `default.toml` and per-environment overlays
    #[arg(long, env = "WIREHUB_CONFIG", default_value = "config")]
    config: String,

    /// Environment overlay to load on top of the defaults
    #[arg(long, env = "WIREHUB_ENV", default_value = "development")]
    env: String,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let config = match AppConfig::load(&args.config, &args.env) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    init_logging(&config);

    if let Err(e) = run(config).await {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }
}

/// Initialize tracing/logging
fn init_logging(config: &AppConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format.as_str() {
        "json" => {
            fmt()
                .json()
                .with_env_filter(filter)
                .with_target(true)
                .with_thread_ids(true)
                .init();
        }
        _ => {
            fmt()
                .pretty()
                .with_env_filter(filter)
                .with_target(true)
                .init();
        }
    }
}

/// Main server run function
async fn run(config: AppConfig) -> AppResult<()> {
    tracing::info!("Starting WireHub v{}", env!("CARGO_PKG_VERSION"));

    let cancel = CancellationToken::new();

    // ── Step 1: Session manager ──────────────────────────────────
    let manager = Manager::from_config(&config.session, cancel.clone());
    let protocol: Arc<dyn Protocol> = Arc::new(EchoProtocol::new(config.session.write_timeout()));

    // ── Step 2: Listeners ────────────────────────────────────────
    let tcp = TcpServer::new(manager.clone(), json_codec(), protocol.clone());
    tcp.start(&config.server.tcp_addr).await?;

    let ws = WebsocketServer::new(manager.clone(), json_codec(), protocol.clone());
    ws.start(&config.server.ws_addr).await?;

    let wss = match &config.server.tls {
        Some(tls) => {
            let server = WebsocketTlsServer::new(manager.clone(), json_codec(), protocol.clone());
            server.start(&tls.addr, &tls.cert_path, &tls.key_path).await?;
            Some(server)
        }
        None => None,
    };

    // ── Step 3: Upstream link ────────────────────────────────────
    let upstream = match &config.client.upstream_url {
        Some(url) => {
            let client = ReconnectingClient::builder(url, json_codec(), Arc::new(UpstreamProtocol))
                .retry_delay(config.client.retry_delay())
                .keepalive(config.client.keepalive_interval(), Arc::new(keepalive_payload))
                .connect()
                .await?;
            Some(client)
        }
        None => None,
    };

    // ── Step 4: Graceful shutdown ────────────────────────────────
    shutdown_signal().await;
    tracing::info!("Shutdown signal received, starting graceful shutdown...");

    tcp.stop();
    ws.stop();
    if let Some(wss) = &wss {
        wss.stop();
    }
    if let Some(client) = &upstream {
        client.close().await;
    }
    cancel.cancel();
    manager.close_all().await;

    tracing::info!("WireHub stopped");
    Ok(())
}

/// Keepalive sent on the upstream link.
fn keepalive_payload() -> Bytes {
    let body = serde_json::json!({
        "type": "keepalive",
        "ts": chrono::Utc::now().timestamp_millis(),
    });
    Bytes::from(body.to_string())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
