use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use thiserror::Error;
use tokio::sync::watch;

use crate::logging;
use crate::shutdown::ShutdownSignal;
use crate::store::{self, StoreError, TickStore};
use crate::tick::{TickError, TickRecord};
use crate::transport::{SocketFeed, TickSource};

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("malformed payload: {0}")]
    MalformedPayload(#[from] TickError),
    #[error("store unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),
    #[error("transport failed: {0:#}")]
    Transport(anyhow::Error),
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IngestReport {
    pub accepted: u64,
    pub rejected: u64,
}

/// Parses transport payloads and writes them to the store, one at a time.
#[derive(Clone)]
pub struct Ingestor {
    store: Arc<dyn TickStore>,
    ttl_secs: u64,
    store_timeout: Duration,
}

impl Ingestor {
    pub fn new(store: Arc<dyn TickStore>, ttl_secs: u64, store_timeout: Duration) -> Self {
        Self {
            store,
            ttl_secs,
            store_timeout,
        }
    }

    pub async fn ingest(&self, payload: &[u8]) -> Result<TickRecord, IngestError> {
        let record = TickRecord::from_payload(payload)?;
        store::bounded(
            self.store_timeout,
            self.store.upsert(record.clone(), self.ttl_secs),
        )
        .await?;
        Ok(record)
    }

    /// Drains `source` in order. Malformed payloads are logged and skipped;
    /// a store failure ends the run and is returned.
    pub async fn run<S: TickSource>(&self, source: &mut S) -> Result<IngestReport, IngestError> {
        let mut report = IngestReport::default();
        while let Some(payload) = source
            .next_payload()
            .await
            .map_err(IngestError::Transport)?
        {
            match self.ingest(&payload).await {
                Ok(record) => {
                    report.accepted += 1;
                    logging::debug(
                        "ingest.accepted",
                        "Tick written to store",
                        json!({ "symbol": record.symbol(), "timestamp": record.timestamp() }),
                    );
                }
                Err(IngestError::MalformedPayload(err)) => {
                    report.rejected += 1;
                    logging::warn(
                        "ingest.rejected",
                        "Dropping malformed tick payload",
                        json!({
                            "error": err.to_string(),
                            "payload": String::from_utf8_lossy(&payload),
                        }),
                    );
                }
                Err(err) => return Err(err),
            }
        }
        Ok(report)
    }
}

/// Keeps an ingestion run attached to the feed socket, reconnecting after
/// `backoff` whenever the publisher is missing or closes the stream. Returns
/// on shutdown, or with the error once the store stops accepting writes.
pub async fn run_feed(
    ingestor: Ingestor,
    feed_path: std::path::PathBuf,
    backoff: Duration,
    mut shutdown: watch::Receiver<ShutdownSignal>,
) -> Result<(), IngestError> {
    logging::info(
        "ingest.start",
        "Ingestion pipeline started",
        json!({ "feed": feed_path.display().to_string() }),
    );

    loop {
        let attempt = async {
            let mut feed = SocketFeed::connect(&feed_path)
                .await
                .map_err(IngestError::Transport)?;
            logging::info(
                "ingest.connected",
                "Connected to tick feed",
                json!({ "feed": feed.path().display().to_string() }),
            );
            ingestor.run(&mut feed).await
        };

        let outcome = tokio::select! {
            outcome = attempt => outcome,
            _ = crate::shutdown::wait_for_stop(shutdown.clone()) => break,
        };

        match outcome {
            Ok(report) => logging::info(
                "ingest.feed_closed",
                "Tick feed closed, reconnecting",
                json!({ "accepted": report.accepted, "rejected": report.rejected }),
            ),
            Err(IngestError::Transport(err)) => logging::warn(
                "ingest.transport_error",
                "Tick feed unavailable, retrying",
                json!({ "error": format!("{err:#}"), "backoff_ms": backoff.as_millis() as u64 }),
            ),
            Err(err) => {
                logging::error(
                    "ingest.store_unavailable",
                    "Store rejected a write, stopping ingestion",
                    json!({ "error": err.to_string() }),
                );
                return Err(err);
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(backoff) => {}
            changed = shutdown.changed() => {
                if changed.is_err() || shutdown.borrow().is_stopping() {
                    break;
                }
            }
        }
    }

    logging::info_simple("ingest.stop", "Ingestion pipeline stopped");
    Ok(())
}
