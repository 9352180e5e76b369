use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde_json::json;
use tokio::sync::{broadcast, watch};
use tokio::time::{self, MissedTickBehavior};

use crate::clock::{Clock, SystemClock};
use crate::constants::{FEED_SOCKET_PATH, PRODUCE_INTERVAL_MS, PRODUCE_SYMBOLS};
use crate::logging;
use crate::shutdown::{self, ShutdownSignal};
use crate::tick::TickRecord;
use crate::transport;

#[derive(Clone, Debug)]
pub struct ProducerConfig {
    pub feed_path: PathBuf,
    pub interval: Duration,
    pub symbols: Vec<String>,
    pub max_ticks: Option<usize>,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            feed_path: PathBuf::from(FEED_SOCKET_PATH),
            interval: Duration::from_millis(PRODUCE_INTERVAL_MS),
            symbols: PRODUCE_SYMBOLS.iter().map(|s| s.to_string()).collect(),
            max_ticks: None,
        }
    }
}

/// Publishes random ticks on the feed socket until a signal arrives or the
/// tick budget is spent.
pub async fn run_with_config(config: ProducerConfig) -> Result<()> {
    if config.symbols.is_empty() {
        anyhow::bail!("producer needs at least one symbol");
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(ShutdownSignal::None);
    let (sender, _) = broadcast::channel::<Vec<u8>>(1024);
    let signals_task = tokio::spawn(shutdown::handle_signals(shutdown_tx.clone()));

    let run_result = tokio::try_join!(
        transport::serve_feed(&config.feed_path, sender.clone(), shutdown_rx.clone()),
        generate_ticks(&config, sender, shutdown_tx, shutdown_rx),
    );

    signals_task.abort();
    let _ = signals_task.await;
    run_result?;
    Ok(())
}

async fn generate_ticks(
    config: &ProducerConfig,
    sender: broadcast::Sender<Vec<u8>>,
    shutdown_tx: watch::Sender<ShutdownSignal>,
    mut shutdown_rx: watch::Receiver<ShutdownSignal>,
) -> Result<()> {
    let mut rng = StdRng::from_entropy();
    let clock = SystemClock;
    let mut ticker = time::interval(config.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut emitted: usize = 0;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            changed = shutdown_rx.changed() => {
                if changed.is_err() || shutdown_rx.borrow().is_stopping() {
                    break;
                }
                continue;
            }
        }

        let tick = random_tick(&mut rng, &config.symbols, clock.now_secs())?;
        let payload = serde_json::to_vec(&tick).context("serialize tick payload")?;
        // no subscribers yet is fine, the tick is simply not seen
        let _ = sender.send(payload);
        emitted += 1;

        if let Some(max) = config.max_ticks {
            if emitted >= max {
                logging::info(
                    "producer.limit",
                    "Producer reached max tick budget",
                    json!({ "max_ticks": max }),
                );
                let _ = shutdown_tx.send(ShutdownSignal::Graceful);
                break;
            }
        }
    }

    logging::info(
        "producer.stop",
        "Producer stopped",
        json!({ "emitted": emitted }),
    );
    Ok(())
}

pub fn random_tick<R: Rng>(rng: &mut R, symbols: &[String], timestamp: i64) -> Result<TickRecord> {
    let symbol = symbols
        .choose(rng)
        .context("producer needs at least one symbol")?;
    let price = rng.gen_range(100.0..500.0);
    TickRecord::new(symbol.clone(), price, timestamp)
        .with_context(|| format!("producer symbol {symbol:?} is not a valid ticker"))
}
