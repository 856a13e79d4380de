//! # autoedged — autoedge agent daemon
//!
//! Composition root that wires all adapters together and starts the agent.
//!
//! ## Responsibilities
//! - Parse configuration (config file, env vars)
//! - Initialize the `SQLite` connection pool and run migrations
//! - Pick the remote platform adapter (virtual devices or REST)
//! - Construct the [`Agent`], recover persisted state, start the workers,
//!   the scheduler, the janitor and the capability refresh loop
//! - Build the axum router and serve it
//! - Handle graceful shutdown (SIGTERM/SIGINT)
//!
//! ## Dependency rule
//! This is the **only** crate that depends on all other crates.
//! It is the wiring layer — no domain logic belongs here.

mod config;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use autoedge_adapter_http_axum::state::AppState;
use autoedge_adapter_remote_http::HttpRemote;
use autoedge_adapter_storage_sqlite_sqlx::SqliteStorage;
use autoedge_adapter_virtual::VirtualPlatform;
use autoedge_app::agent::Agent;
use autoedge_app::event_bus::InProcessEventBus;
use autoedge_app::ports::{Clock, RemotePlatform, Storage, SystemClock};
use autoedge_domain::spec::StateChange;

use crate::config::{Config, RemoteMode};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(&config.logging.filter))
        .init();

    let db = autoedge_adapter_storage_sqlite_sqlx::Config {
        database_url: config.database_url().to_string(),
    }
    .build()
    .await?;
    let store = Arc::new(db.storage());

    match config.remote.mode {
        RemoteMode::Virtual => {
            let remote = Arc::new(VirtualPlatform::demo());
            let changes = remote.subscribe();
            tracing::info!("driving the virtual demo platform");
            run(&config, store, remote, Some(changes)).await
        }
        RemoteMode::Http => {
            let remote = Arc::new(HttpRemote::new(&config.remote.http)?);
            tracing::info!(base_url = %config.remote.http.base_url, "driving a remote platform");
            run(&config, store, remote, None).await
        }
    }
}

async fn run<R: RemotePlatform>(
    config: &Config,
    store: Arc<SqliteStorage>,
    remote: Arc<R>,
    changes: Option<broadcast::Receiver<StateChange>>,
) -> Result<(), Box<dyn std::error::Error>> {
    let settings = config.engine_settings();
    let workers = settings.workers;
    let agent = Arc::new(Agent::new(
        store,
        remote,
        Arc::new(SystemClock),
        Arc::new(InProcessEventBus::new(256)),
        settings,
    ));
    let recovery = agent.start().await?;
    tracing::info!(
        requeued = recovery.requeued,
        waiting = recovery.waiting,
        "persisted state recovered"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut handles: Vec<JoinHandle<()>> = agent.dispatcher.spawn(workers, &shutdown_rx);
    handles.push(tokio::spawn({
        let agent = Arc::clone(&agent);
        let tick = config.scheduler_tick();
        let shutdown = shutdown_rx.clone();
        async move { agent.scheduler.run(tick, shutdown).await }
    }));
    handles.push(tokio::spawn({
        let agent = Arc::clone(&agent);
        let interval = config.sweep_interval();
        let shutdown = shutdown_rx.clone();
        async move { agent.janitor.run(interval, shutdown).await }
    }));
    handles.push(tokio::spawn(refresh_loop(
        Arc::clone(&agent),
        config.refresh_interval(),
        shutdown_rx.clone(),
    )));
    if let Some(changes) = changes {
        handles.push(tokio::spawn(forward_changes(
            Arc::clone(&agent),
            changes,
            shutdown_rx.clone(),
        )));
    }

    let app = autoedge_adapter_http_axum::router::build(AppState::new(Arc::clone(&agent)));
    let bind_addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(%bind_addr, workers, "autoedged listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("stopping background tasks");
    let _ = shutdown_tx.send(true);
    for handle in handles {
        if let Err(err) = handle.await {
            tracing::warn!(error = %err, "background task ended abnormally");
        }
    }
    Ok(())
}

/// Rebuild the capability snapshot every `interval`.
async fn refresh_loop<S, R, C>(
    agent: Arc<Agent<S, R, C>>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) where
    S: Storage,
    R: RemotePlatform,
    C: Clock,
{
    loop {
        tokio::select! {
            () = tokio::time::sleep(interval) => {}
            _ = shutdown.changed() => {}
        }
        if *shutdown.borrow() {
            break;
        }
        let graph = agent.refresh_capabilities().await;
        tracing::debug!(version = graph.version, "capability snapshot refreshed");
    }
}

/// Feed state changes of the virtual devices into the trigger router.
async fn forward_changes<S, R, C>(
    agent: Arc<Agent<S, R, C>>,
    mut changes: broadcast::Receiver<StateChange>,
    mut shutdown: watch::Receiver<bool>,
) where
    S: Storage,
    R: RemotePlatform,
    C: Clock,
{
    loop {
        let change = tokio::select! {
            change = changes.recv() => change,
            _ = shutdown.changed() => break,
        };
        match change {
            Ok(change) => {
                if let Err(err) = agent.router.route(&change).await {
                    tracing::error!(error = %err, event_id = %change.event_id, "routing failed");
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "state change stream lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
    tracing::info!("shutdown signal received");
}
