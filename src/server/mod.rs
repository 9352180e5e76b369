mod broadcast;
mod history;
mod mode;
mod registry;
mod ws;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

use crate::clock::{Clock, SystemClock};
use crate::constants::{
    BROADCAST_INTERVAL_MS, BROADCAST_MAX_ROWS, DEFAULT_TTL_SECS, FEED_SOCKET_PATH,
    OUTBOX_CAPACITY, RECENCY_WINDOW_SECS, RECONNECT_BACKOFF_MS, SERVER_BIND_ADDR,
    STORE_TIMEOUT_MS, SWEEP_INTERVAL_SECS,
};
use crate::ingest::{self, Ingestor};
use crate::logging;
use crate::shutdown::{self, ShutdownSignal};
use crate::store::{MemoryStore, TickStore};

pub use broadcast::{broadcast_tick, run_broadcast_loop, BroadcastReport};
pub use history::{query, HistoryParams, HistoryRange, QueryError};
pub use mode::{LiveSuspension, ModeController};
pub use registry::{Connection, ConnectionId, ConnectionRegistry, PushError, WsConnection};

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    pub feed_path: PathBuf,
    /// Attach the ingestion pipeline to `feed_path`.
    pub ingest: bool,
    pub ttl_secs: u64,
    pub broadcast_interval: Duration,
    pub recency_window_secs: i64,
    pub max_rows: usize,
    pub store_timeout: Duration,
    pub outbox_capacity: usize,
    pub sweep_interval: Duration,
    pub reconnect_backoff: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SERVER_BIND_ADDR
                .parse()
                .unwrap_or_else(|_| SocketAddr::from(([127, 0, 0, 1], 8080))),
            feed_path: PathBuf::from(FEED_SOCKET_PATH),
            ingest: true,
            ttl_secs: DEFAULT_TTL_SECS,
            broadcast_interval: Duration::from_millis(BROADCAST_INTERVAL_MS),
            recency_window_secs: RECENCY_WINDOW_SECS,
            max_rows: BROADCAST_MAX_ROWS,
            store_timeout: Duration::from_millis(STORE_TIMEOUT_MS),
            outbox_capacity: OUTBOX_CAPACITY,
            sweep_interval: Duration::from_secs(SWEEP_INTERVAL_SECS),
            reconnect_backoff: Duration::from_millis(RECONNECT_BACKOFF_MS),
        }
    }
}

/// Everything the handlers and background tasks share. Cloning is cheap.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub store: Arc<dyn TickStore>,
    pub clock: Arc<dyn Clock>,
    pub registry: Arc<ConnectionRegistry>,
    pub mode: Arc<ModeController>,
    shutdown: watch::Receiver<ShutdownSignal>,
}

impl AppState {
    pub fn new(config: ServerConfig, store: Arc<dyn TickStore>, clock: Arc<dyn Clock>) -> Self {
        // sender dropped: sessions built from this state never see a stop
        let (_, shutdown) = watch::channel(ShutdownSignal::None);
        Self {
            config: Arc::new(config),
            store,
            clock,
            registry: Arc::new(ConnectionRegistry::new()),
            mode: Arc::new(ModeController::new()),
            shutdown,
        }
    }

    fn with_shutdown(mut self, shutdown: watch::Receiver<ShutdownSignal>) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn ingestor(&self) -> Ingestor {
        Ingestor::new(
            Arc::clone(&self.store),
            self.config.ttl_secs,
            self.config.store_timeout,
        )
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws::websocket_upgrade))
        .route("/data", get(history::history_handler))
        .route("/health", get(health))
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "connections": state.registry.len(),
        "live": state.mode.is_live(),
    }))
}

pub async fn run() -> Result<()> {
    run_with_config(ServerConfig::default()).await
}

pub async fn run_with_config(config: ServerConfig) -> Result<()> {
    let (shutdown_tx, shutdown_rx) = watch::channel(ShutdownSignal::None);
    let signals_task = tokio::spawn(shutdown::handle_signals(shutdown_tx.clone()));

    let result = serve(config, shutdown_rx).await;

    signals_task.abort();
    let _ = signals_task.await;
    drop(shutdown_tx);
    result
}

/// Runs the server with the in-memory store until `shutdown` fires.
pub async fn serve(config: ServerConfig, shutdown: watch::Receiver<ShutdownSignal>) -> Result<()> {
    let listener = TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind server at {}", config.bind_addr))?;
    serve_on(listener, config, shutdown).await
}

/// Same as [`serve`] on an already bound listener. `config.bind_addr` is
/// ignored.
pub async fn serve_on(
    listener: TcpListener,
    config: ServerConfig,
    shutdown: watch::Receiver<ShutdownSignal>,
) -> Result<()> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store = Arc::new(MemoryStore::with_clock(Arc::clone(&clock)));
    let state = AppState::new(config, store.clone(), clock).with_shutdown(shutdown.clone());
    let config = Arc::clone(&state.config);

    let addr = listener
        .local_addr()
        .context("failed to read server listener address")?;
    logging::info(
        "server.bind",
        "Serving live feed and history",
        json!({ "addr": addr.to_string(), "ttl_secs": config.ttl_secs }),
    );

    let ingest_task = config.ingest.then(|| {
        tokio::spawn(ingest::run_feed(
            state.ingestor(),
            config.feed_path.clone(),
            config.reconnect_backoff,
            shutdown.clone(),
        ))
    });
    let sweeper_task = tokio::spawn(run_sweeper(store, config.sweep_interval, shutdown.clone()));

    let app = router(state.clone());
    let http = async {
        axum::serve(listener, app.into_make_service())
            .with_graceful_shutdown(shutdown::wait_for_stop(shutdown.clone()))
            .await
            .context("server terminated with error")
    };

    let run_result = tokio::try_join!(
        http,
        broadcast::run_broadcast_loop(state, shutdown.clone())
    );

    sweeper_task.abort();
    let _ = sweeper_task.await;
    if let Some(task) = ingest_task {
        task.abort();
        let _ = task.await;
    }

    run_result?;
    logging::info_simple("server.stop", "Server stopped");
    Ok(())
}

async fn run_sweeper(
    store: Arc<MemoryStore>,
    period: Duration,
    mut shutdown: watch::Receiver<ShutdownSignal>,
) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let purged = store.purge_expired().await;
                if purged > 0 {
                    logging::debug(
                        "store.sweep",
                        "Expired rows purged",
                        json!({ "purged": purged }),
                    );
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || shutdown.borrow().is_stopping() {
                    break;
                }
            }
        }
    }
}
