//! DirectIP SBD receiver and distributor.
//!
//! # Architecture Overview
//!
//! ```text
//!   Iridium gateway                ┌──────────────────────────────────────────────┐
//!   (TCP, one message per conn)    │                 directip-mux                 │
//!   ───────────────────────────────┼─▶ net::listener → proxy_protocol (optional) │
//!                                  │        → net::connection (deadline)          │
//!                                  │        → protocol::decode                    │
//!                                  │        → Logged → distributor               │
//!                                  │              → routing table snapshot        │
//!                                  │              → POST JSON ──────────────────┼──▶ HTTP backends
//!   ◀──────────────────────────────┼── confirmation (accepted / rejected)        │
//!                                  │                                              │
//!                                  │  config (TOML + watcher)   health (axum)     │
//!                                  │  observability (tracing, Prometheus)         │
//!                                  │  lifecycle (signals, drain)                  │
//!                                  └──────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use directip_mux::config::{self, ServiceConfig};
use directip_mux::distributor::Distributor;
use directip_mux::health::HealthServer;
use directip_mux::lifecycle::{spawn_signal_handler, Shutdown};
use directip_mux::net::{Listener, Logged};
use directip_mux::observability::{self, LogFormat};

#[derive(Parser, Debug)]
#[command(name = "directip-mux", version)]
#[command(about = "Receive Iridium DirectIP messages and forward them to HTTP backends")]
struct Cli {
    /// Listen address for DirectIP connections.
    listen: Option<String>,

    /// TOML configuration file with listener settings and forwarding targets.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Address of the HTTP health endpoint.
    #[arg(long)]
    health: Option<String>,

    /// Log filter, e.g. debug, info, warn, error.
    #[arg(long)]
    loglevel: Option<String>,

    /// Log format: json, fmt or term.
    #[arg(long)]
    logformat: Option<LogFormat>,

    /// Number of distributor workers.
    #[arg(long)]
    workers: Option<usize>,

    /// Expect a PROXY protocol header on every connection.
    #[arg(long)]
    proxyprotocol: bool,

    /// Reload the targets when the configuration file changes.
    #[arg(long, requires = "config")]
    watch: bool,

    /// Maximum concurrent dispatches, 0 for unbounded.
    #[arg(long)]
    max_in_flight: Option<usize>,
}

impl Cli {
    /// Command-line flags win over the file.
    fn apply(&self, config: &mut ServiceConfig) {
        if let Some(listen) = &self.listen {
            config.listener.bind_address = listen.clone();
        }
        if let Some(health) = &self.health {
            config.health.bind_address = health.clone();
        }
        if let Some(level) = &self.loglevel {
            config.observability.log_level = level.clone();
        }
        if let Some(format) = self.logformat {
            config.observability.log_format = format;
        }
        if let Some(workers) = self.workers {
            config.distributor.workers = workers;
        }
        if self.proxyprotocol {
            config.listener.proxy_protocol = true;
        }
        if let Some(max) = self.max_in_flight {
            config.distributor.max_in_flight = max;
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => config::load_config(path)?,
        None => ServiceConfig::default(),
    };
    cli.apply(&mut config);
    if let Err(errors) = config::validate_config(&config) {
        return Err(config::LoadError::Validation(errors).into());
    }

    observability::logging::init(&config.observability.log_level, config.observability.log_format)?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        listen = %config.listener.bind_address,
        "Start service"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => observability::metrics::init_metrics(addr)?,
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let distributor = Arc::new(Distributor::new(&config.distributor));
    if !config.targets.is_empty() {
        let count = config.targets.len();
        distributor.set_targets(config.targets.clone()).await?;
        tracing::info!(targets = count, "Routing table configured");
    }

    let _watcher = match (&cli.config, cli.watch) {
        (Some(path), true) => {
            let (watcher, updates) = config::ConfigWatcher::new(path);
            let handle = watcher.run()?;
            tokio::spawn(config::apply_target_updates(updates, distributor.clone()));
            Some(handle)
        }
        _ => None,
    };

    let shutdown = Shutdown::new();
    spawn_signal_handler(shutdown.clone());

    let health = if config.health.enabled {
        let server = HealthServer::bind(&config.health.bind_address).await?;
        let signal = shutdown.subscribe();
        Some(tokio::spawn(async move {
            if let Err(e) = server.run(signal).await {
                tracing::error!(error = %e, "Health endpoint failed");
            }
        }))
    } else {
        None
    };

    let listener = Listener::bind(&config.listener).await?;
    let tracker = listener.tracker();
    let handler = Arc::new(Logged::new(distributor.clone()));
    let result = listener.run(handler, shutdown.subscribe()).await;

    shutdown.trigger();
    let grace = Duration::from_secs(config.listener.connection_deadline_secs);
    if !tracker.wait_idle(grace).await {
        tracing::warn!(
            active = tracker.active_count(),
            "Grace period elapsed with connections still open"
        );
    }
    distributor.close();
    if let Some(health) = health {
        let _ = health.await;
    }

    result?;
    tracing::info!("Shutdown complete");
    Ok(())
}
