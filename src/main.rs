//! mentord server: wires the background core to its HTTP/WebSocket host.
//!
//! Constructs the owned instances (store, hub, governor, scheduler, policy
//! engine) once at startup, registers the nightly sweeps, and serves the
//! guarded API endpoints plus the realtime endpoint.

use std::error::Error;
use std::sync::Arc;

use clap::Parser;

use mentord::api::{router, AppState};
use mentord::config::{Cli, Config};
use mentord::governor::RateGovernor;
use mentord::hub::Hub;
use mentord::mlog;
use mentord::policy::PolicyEngine;
use mentord::scheduler::Scheduler;
use mentord::store::{DataStore, SqliteStore};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    mentord::logging::init();
    let config = Config::from_cli_and_env(Cli::parse());

    let store: Arc<dyn DataStore> = Arc::new(SqliteStore::open(&config.db_path)?);
    let hub = Hub::new();
    let governor = Arc::new(RateGovernor::new());

    let scheduler = Scheduler::new();
    let engine = Arc::new(PolicyEngine::new(
        store.clone(),
        hub.clone(),
        config.suspend_duration_days,
    ));
    engine.register(&scheduler, &config.reminder_at, &config.suspension_at)?;

    let state = AppState::new(store, governor, hub.clone());
    let app = hub.attach(router(state));

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    mlog!("mentord: listening on {}", config.bind_addr);
    axum::serve(listener, app).await?;
    Ok(())
}
