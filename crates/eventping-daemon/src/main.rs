use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use eventping_core::config::EventPingConfig;
use eventping_scheduler::{DeliveryRecorder, ReminderService};
use tokio::sync::watch;
use tracing::{info, warn};

mod app;
mod http;
mod store;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "eventping_daemon=info,eventping_scheduler=info,eventping_channels=info,tower_http=debug"
                    .into()
            }),
        )
        .init();

    // config: EVENTPING_CONFIG > ~/.eventping/eventping.toml, then EVENTPING_* env
    let config_path = std::env::var("EVENTPING_CONFIG").ok();
    let config = EventPingConfig::load(config_path.as_deref()).unwrap_or_else(|e| {
        warn!("Config load failed ({}), using defaults", e);
        EventPingConfig::default()
    });

    let db_path = config.database.path.clone();
    ensure_parent_dir(&db_path);
    info!(path = %db_path, "opening SQLite database");

    // each subsystem gets its own connection to the same file
    let store = Arc::new(store::SqliteEventStore::new(open_db(&db_path)?)?);
    let recorder = DeliveryRecorder::new(open_db(&db_path)?)?;
    info!("database migrations complete");

    let channels = Arc::new(eventping_channels::build_channels(&config.channels));
    if channels.is_empty() {
        warn!("no channel configured; every reminder will fail as not configured");
    }
    let connecting = Arc::clone(&channels);
    tokio::spawn(async move { connecting.connect_all().await });

    let service = ReminderService::new(
        recorder,
        store.clone(),
        Arc::clone(&channels),
        &config.scheduler,
    );
    service.recover().await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let engine = tokio::spawn(service.engine().run(shutdown_rx.clone()));

    let addr: SocketAddr = format!("{}:{}", config.daemon.bind, config.daemon.port).parse()?;
    if config.daemon.api_token.is_none() && !addr.ip().is_loopback() {
        warn!(%addr, "RPC surface exposed without api_token");
    }

    let state = Arc::new(app::AppState::new(config, service, store, Arc::clone(&channels)));
    tokio::spawn(purge_loop(Arc::clone(&state), shutdown_rx));
    let router = app::build_router(Arc::clone(&state));

    info!("EventPing daemon listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "ctrl-c handler failed; shutting down");
            }
            info!("shutdown requested");
            let _ = shutdown_tx.send(true);
        })
        .await?;

    if let Err(e) = engine.await {
        warn!(error = %e, "scheduler engine task ended abnormally");
    }
    // sends already handed to adapters finish before channels go down
    let grace = Duration::from_secs(state.config.scheduler.send_timeout_secs + 5);
    if !state.service.dispatcher().drain(grace).await {
        warn!("deliveries still running at shutdown; they become unknown on restart");
    }
    channels.disconnect_all().await;
    info!("EventPing daemon stopped");
    Ok(())
}

fn open_db(path: &str) -> rusqlite::Result<rusqlite::Connection> {
    let db = rusqlite::Connection::open(path)?;
    db.execute_batch("PRAGMA journal_mode=WAL; PRAGMA busy_timeout=5000;")?;
    Ok(db)
}

fn ensure_parent_dir(path: &str) {
    if let Some(parent) = std::path::Path::new(path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
}

/// Delete closed delivery history past the retention window, once per
/// `purge_interval_secs`, until shutdown.
async fn purge_loop(state: Arc<app::AppState>, mut shutdown: watch::Receiver<bool>) {
    let cfg = &state.config.scheduler;
    let retention = chrono::Duration::days(i64::from(cfg.retention_days));
    let mut tick = tokio::time::interval(Duration::from_secs(cfg.purge_interval_secs.max(60)));
    loop {
        tokio::select! {
            _ = tick.tick() => {
                if let Err(e) = state.service.purge_history(retention) {
                    warn!(error = %e, "delivery history purge failed");
                }
            }
            _ = shutdown.changed() => break,
        }
    }
}
