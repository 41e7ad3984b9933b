//! conn-dispatcher
//!
//! Runs a small demonstration application behind the multi-process
//! connection dispatcher.
//!
//! # Architecture Overview
//!
//! ```text
//!                     ┌──────────────────────── master ────────────────────────┐
//!                     │                                                        │
//!   Client ──────────▶│ net::listener ─▶ net::sniff ─▶ routing ─▶ load_balancer │
//!                     │                                  │                     │
//!                     │   cluster::supervisor ◀── control channel (fd 3) ──┐   │
//!                     └──────────────────────────────────┼─────────────────┼───┘
//!                                                        │ CONNECTION      │
//!                                                        ▼ + socket        │
//!                     ┌─────────── worker 1..N ───────────────────────────┴───┐
//!   Client ◀─────────▶│ worker::replay ─▶ hyper (auto) ─▶ axum Router          │
//!                     └────────────────────────────────────────────────────────┘
//! ```
//!
//! Every process runs this same binary; workers are told apart by their
//! environment.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use conn_dispatcher::config::loader::{apply_env_overrides, read_config};
use conn_dispatcher::config::{BalanceStrategy, DispatcherConfig, StickySource};
use conn_dispatcher::observability::{logging, metrics};
use conn_dispatcher::worker::is_worker_process;
use conn_dispatcher::Dispatcher;

#[derive(Parser, Debug)]
#[command(name = "conn-dispatcher")]
#[command(about = "Multi-process connection dispatcher", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listening port (overrides config and PORT)
    #[arg(short, long)]
    port: Option<u16>,

    /// Worker process count (overrides config and CORES)
    #[arg(short, long)]
    workers: Option<usize>,

    /// round-robin, random or active-connections
    #[arg(short, long)]
    balance: Option<BalanceStrategy>,

    /// Pin clients by this request header
    #[arg(long, conflicts_with = "sticky_remote")]
    sticky: Option<String>,

    /// Pin clients by their remote address
    #[arg(long)]
    sticky_remote: bool,
}

impl Cli {
    fn apply(&self, config: &mut DispatcherConfig) {
        if let Some(port) = self.port {
            config.listener.port = port;
        }
        if let Some(workers) = self.workers {
            config.cluster.workers = workers;
        }
        if let Some(balance) = self.balance {
            config.routing.balance = balance;
        }
        if let Some(header) = &self.sticky {
            config.routing.sticky = StickySource::header(header);
        } else if self.sticky_remote {
            config.routing.sticky = StickySource::RemoteAddress;
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => read_config(path)?,
        None => DispatcherConfig::default(),
    };
    apply_env_overrides(&mut config, |name| std::env::var(name).ok())?;
    cli.apply(&mut config);

    logging::init_logging(&config.observability.log_level);

    if !is_worker_process() {
        tracing::info!("conn-dispatcher v{} starting", env!("CARGO_PKG_VERSION"));

        if config.observability.metrics_enabled {
            match config.observability.metrics_address.parse::<SocketAddr>() {
                Ok(addr) => {
                    if let Err(e) = metrics::init_metrics(addr) {
                        tracing::error!(error = %e, "Failed to start metrics endpoint");
                    }
                }
                Err(_) => tracing::error!(
                    metrics_address = %config.observability.metrics_address,
                    "Failed to parse metrics address"
                ),
            }
        }
    }

    Dispatcher::builder(config)
        .worker(|id| async move { Ok(demo::app(id)) })
        .build()?
        .start()
        .await?;

    Ok(())
}

/// Demonstration application served by every worker.
mod demo {
    use std::net::SocketAddr;

    use axum::body::Bytes;
    use axum::extract::{ConnectInfo, State};
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use conn_dispatcher::WorkerId;
    use serde_json::{json, Value};
    use tower_http::trace::TraceLayer;

    pub fn app(id: WorkerId) -> Router {
        Router::new()
            .route("/", get(identity))
            .route("/echo", post(echo))
            .route("/health", get(health))
            .with_state(id)
            .layer(TraceLayer::new_for_http())
    }

    /// Which worker answered, and who it thinks the client is.
    async fn identity(
        State(id): State<WorkerId>,
        ConnectInfo(peer): ConnectInfo<SocketAddr>,
    ) -> Json<Value> {
        Json(json!({
            "worker": id.get(),
            "pid": std::process::id(),
            "peer": peer.to_string(),
        }))
    }

    async fn echo(body: Bytes) -> Bytes {
        body
    }

    async fn health() -> &'static str {
        "ok"
    }
}
