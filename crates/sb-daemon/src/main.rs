//! switchboard daemon: loads configuration, starts the session manager and
//! serves the WebSocket gateway until interrupted.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use sb_bridge::server::{self, AppState};
use sb_core::config::Config;
use sb_session::pty::PtySpawner;
use sb_session::SessionSettings;
use sb_telemetry::logging::{self, LogFormat};
use tracing::{error, info};

mod environment;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> Result<()> {
    let env_file = environment::load();

    let mut config = Config::load().context("failed to load configuration")?;
    config
        .apply_env()
        .context("invalid SWITCHBOARD_* environment override")?;

    logging::init(
        "switchboard",
        &config.general.log_level,
        LogFormat::from_config(&config.general.log_format),
    );
    env_file.report();
    info!(version = env!("CARGO_PKG_VERSION"), pid = std::process::id(), "switchboard starting");

    let settings = SessionSettings::from_config(&config);
    info!(
        max_sessions = settings.max_sessions,
        idle_timeout_secs = settings.idle_timeout.as_secs(),
        scratch_dir = %settings.scratch_dir.display(),
        projects = settings.projects.len(),
        "session settings"
    );
    let state = AppState::build(
        settings,
        Arc::new(PtySpawner),
        Duration::from_secs(config.gateway.heartbeat_secs),
    );

    let addr = config.gateway.bind_addr();
    let listener = match server::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(%addr, "cannot start gateway: {e:#}");
            return Err(e);
        }
    };

    server::serve(listener, state.clone(), shutdown_signal()).await?;

    let killed = state.manager.shutdown();
    info!(killed, "switchboard stopped");
    Ok(())
}

/// Resolves on ctrl-c. If the handler cannot be installed the daemon runs
/// until killed.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("ctrl-c received, shutting down");
}
