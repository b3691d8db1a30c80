//! # pointcast
//!
//! Pointcast server binary. Loads settings, installs logging and metrics,
//! and serves until SIGINT or SIGTERM.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use pointcast_core::{InMemoryPointRepository, PointRepository};
use pointcast_hooks::{LoggingMiddleware, Recover};
use pointcast_logging::LoggingConfig;
use pointcast_server::{Manager, PointcastServer, ServerConfig};
use pointcast_settings::PointcastSettings;
use tracing::{info, warn};

/// Real-time point server.
#[derive(Parser, Debug)]
#[command(name = "pointcast", about = "Real-time point server", version)]
struct Cli {
    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Settings file (default: `$POINTCAST_HOME/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,
}

impl Cli {
    fn load_settings(&self) -> Result<PointcastSettings> {
        let path = self.settings.clone().unwrap_or_else(pointcast_settings::settings_path);
        let mut settings = pointcast_settings::load_settings_from_path(&path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?;
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        Ok(settings)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = cli.load_settings()?;

    pointcast_logging::init_subscriber(&LoggingConfig {
        level: settings.logging.level,
        format: settings.logging.format,
        module_levels: Vec::new(),
    })
    .context("Failed to initialize logging")?;

    let metrics = match pointcast_server::metrics::install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!(error = %e, "metrics disabled");
            None
        }
    };

    let config = ServerConfig::from(&settings);
    let repo: Arc<dyn PointRepository> = Arc::new(InMemoryPointRepository::new(config.bounds));
    let manager = Manager::new(config.manager.clone()).with_middleware(Arc::new(Recover::new(LoggingMiddleware)));

    let mut server = PointcastServer::new(config, repo, manager).context("Failed to build server")?;
    if let Some(handle) = metrics {
        server = server.with_metrics(handle);
    }

    let addr = server.listen().await.context("Failed to start server")?;
    info!(%addr, version = pointcast_core::constants::VERSION, "pointcast ready");

    pointcast_server::shutdown::shutdown_signal().await;
    server.shutdown().await;
    Ok(())
}
