use std::path::PathBuf;

use anyhow::Result;
use clap::Args;

use crate::constants::FEED_SOCKET_PATH;
use crate::tick::TickRecord;
use crate::transport::{SocketFeed, TickSource};

#[derive(Debug, Args, Clone)]
pub struct TailArgs {
    /// Feed socket to subscribe to
    #[arg(long, default_value = FEED_SOCKET_PATH)]
    pub feed: PathBuf,

    /// Filter ticks to a single symbol (e.g. AAPL)
    #[arg(short, long)]
    pub symbol: Option<String>,

    /// Stop after printing this many ticks
    #[arg(short, long)]
    pub limit: Option<usize>,
}

pub async fn run(args: TailArgs) -> Result<()> {
    let mut feed = SocketFeed::connect(&args.feed).await?;
    let mut printed = 0usize;
    println!("Connected to {}; streaming ticks...", args.feed.display());

    while let Some(payload) = feed.next_payload().await? {
        let tick = match TickRecord::from_payload(&payload) {
            Ok(tick) => tick,
            Err(err) => {
                eprintln!("skipping payload: {err}");
                continue;
            }
        };
        if let Some(ref filter) = args.symbol {
            if filter != tick.symbol() {
                continue;
            }
        }

        println!(
            "{:>12} | {:>8} | {:>10.4}",
            tick.timestamp(),
            tick.symbol(),
            tick.price()
        );
        printed += 1;

        if let Some(limit) = args.limit {
            if printed >= limit {
                break;
            }
        }
    }
    Ok(())
}
