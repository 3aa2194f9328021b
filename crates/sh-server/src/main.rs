//! smarthome daemon
//!
//! Usage: `smarthome [CONFIG_DIR]`
//!
//! The config directory defaults to `$SMARTHOME_CONFIG`, then the current
//! directory. `SIGHUP` reloads logic sources; `SIGTERM` and `SIGINT` stop
//! the daemon.

mod plugins;

use anyhow::{Context, Result};
use sh_config::{load_items, load_logics, load_plugins, SmartHomeConfig};
use sh_engine::SmartHome;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::plugins::{from_definitions, ChangelogPlugin};

fn config_dir() -> PathBuf {
    std::env::args_os()
        .nth(1)
        .or_else(|| std::env::var_os("SMARTHOME_CONFIG"))
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
}

fn init_logging(config: &SmartHomeConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.filter));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .init();
}

fn build(dir: &Path, config: SmartHomeConfig) -> Result<Arc<SmartHome>> {
    let sh = SmartHome::new(config);

    let definitions = load_plugins(dir).context("failed to load plugin.yaml")?;
    let mut plugins = from_definitions(&definitions);
    if !plugins.iter().any(|p| p.name() == ChangelogPlugin::CLASS) {
        plugins.push(Arc::new(ChangelogPlugin::new()));
    }
    for plugin in plugins {
        sh.add_plugin(plugin);
    }

    let items = load_items(dir).context("failed to load items")?;
    sh.load_items(&items);

    let logics = load_logics(dir).context("failed to load logic.yaml")?;
    sh.load_logics(logics);
    Ok(sh)
}

#[tokio::main]
async fn main() -> Result<()> {
    let dir = config_dir();
    let config = SmartHomeConfig::load(&dir)
        .with_context(|| format!("failed to load configuration from {}", dir.display()))?;
    init_logging(&config);

    info!(config_dir = %dir.display(), "Starting smarthome");
    if config.smarthome.location().is_none() {
        warn!("No latitude/longitude configured, sunrise and sunset entries will not fire");
    }

    let sh = build(&dir, config)?;
    sh.start().context("failed to start scheduler")?;
    info!("smarthome is running");

    let mut sighup = signal(SignalKind::hangup())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    loop {
        tokio::select! {
            _ = sighup.recv() => {
                let sh = sh.clone();
                let reloaded = tokio::task::spawn_blocking(move || sh.reload_logics()).await?;
                info!(count = reloaded, "Reloaded logics");
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
                break;
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
                break;
            }
        }
    }

    info!("Shutting down");
    let stopping = sh.clone();
    tokio::task::spawn_blocking(move || stopping.stop()).await?;
    info!("Stopped");
    Ok(())
}
