use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use crate::constants::{
    BROADCAST_INTERVAL_MS, BROADCAST_MAX_ROWS, DEFAULT_TTL_SECS, FEED_SOCKET_PATH,
    PRODUCE_INTERVAL_MS, RECENCY_WINDOW_SECS, SERVER_BIND_ADDR, STORE_TIMEOUT_MS,
};
use crate::producer::ProducerConfig;
use crate::server::ServerConfig;
use crate::tail::TailArgs;

#[derive(Debug, Parser)]
#[command(author, version, about = "Live tick relay with historical range queries")]
#[command(args_conflicts_with_subcommands = true)]
pub struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    #[command(flatten)]
    serve: ServeArgs,
}

impl Cli {
    pub fn command(self) -> Command {
        self.command.unwrap_or(Command::Serve(self.serve))
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Ingest the tick feed and serve /ws and /data (default)
    Serve(ServeArgs),
    /// Publish random ticks on the feed socket
    Produce(ProduceArgs),
    /// Subscribe to the feed socket and print incoming ticks
    Tail(TailArgs),
}

#[derive(Debug, Args, Clone)]
pub struct ServeArgs {
    /// Address for the HTTP and WebSocket listener
    #[arg(long, default_value = SERVER_BIND_ADDR)]
    pub bind: SocketAddr,

    /// Feed socket carrying newline-delimited tick JSON
    #[arg(long, default_value = FEED_SOCKET_PATH)]
    pub feed: PathBuf,

    /// Serve only, without attaching to the feed
    #[arg(long)]
    pub no_ingest: bool,

    /// Seconds a stored tick stays readable
    #[arg(long, default_value_t = DEFAULT_TTL_SECS)]
    pub ttl_secs: u64,

    /// Live broadcast period in milliseconds
    #[arg(long, default_value_t = BROADCAST_INTERVAL_MS)]
    pub interval_ms: u64,

    /// Only ticks newer than this many seconds are broadcast
    #[arg(long, default_value_t = RECENCY_WINDOW_SECS)]
    pub recency_secs: i64,

    /// Rows fetched per broadcast tick
    #[arg(long, default_value_t = BROADCAST_MAX_ROWS)]
    pub max_rows: usize,

    /// Upper bound on any single store call, in milliseconds
    #[arg(long, default_value_t = STORE_TIMEOUT_MS)]
    pub store_timeout_ms: u64,
}

impl From<ServeArgs> for ServerConfig {
    fn from(args: ServeArgs) -> Self {
        ServerConfig {
            bind_addr: args.bind,
            feed_path: args.feed,
            ingest: !args.no_ingest,
            ttl_secs: args.ttl_secs,
            broadcast_interval: Duration::from_millis(args.interval_ms.max(1)),
            recency_window_secs: args.recency_secs,
            max_rows: args.max_rows,
            store_timeout: Duration::from_millis(args.store_timeout_ms),
            ..ServerConfig::default()
        }
    }
}

#[derive(Debug, Args, Clone)]
pub struct ProduceArgs {
    /// Feed socket to publish on
    #[arg(long, default_value = FEED_SOCKET_PATH)]
    pub feed: PathBuf,

    /// Milliseconds between ticks
    #[arg(long, default_value_t = PRODUCE_INTERVAL_MS)]
    pub interval_ms: u64,

    /// Symbols to draw from, comma separated
    #[arg(long, value_delimiter = ',')]
    pub symbols: Vec<String>,

    /// Stop after publishing this many ticks
    #[arg(long)]
    pub max_ticks: Option<usize>,
}

impl From<ProduceArgs> for ProducerConfig {
    fn from(args: ProduceArgs) -> Self {
        let defaults = ProducerConfig::default();
        ProducerConfig {
            feed_path: args.feed,
            interval: Duration::from_millis(args.interval_ms.max(1)),
            symbols: if args.symbols.is_empty() {
                defaults.symbols
            } else {
                args.symbols
            },
            max_ticks: args.max_ticks,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_subcommand_serves_with_defaults() {
        let cli = Cli::parse_from(["tick-relay"]);
        let Command::Serve(args) = cli.command() else {
            panic!("expected serve");
        };
        let config = ServerConfig::from(args);
        assert_eq!(config.ttl_secs, 3_600);
        assert_eq!(config.broadcast_interval, Duration::from_secs(1));
        assert!(config.ingest);
    }

    #[test]
    fn serve_flags_map_onto_config() {
        let cli = Cli::parse_from([
            "tick-relay",
            "serve",
            "--bind",
            "0.0.0.0:9000",
            "--no-ingest",
            "--ttl-secs",
            "60",
            "--max-rows",
            "20",
        ]);
        let Command::Serve(args) = cli.command() else {
            panic!("expected serve");
        };
        let config = ServerConfig::from(args);
        assert_eq!(config.bind_addr.port(), 9000);
        assert!(!config.ingest);
        assert_eq!(config.ttl_secs, 60);
        assert_eq!(config.max_rows, 20);
    }

    #[test]
    fn produce_symbols_are_comma_separated() {
        let cli = Cli::parse_from(["tick-relay", "produce", "--symbols", "AAPL,NVDA"]);
        let Command::Produce(args) = cli.command() else {
            panic!("expected produce");
        };
        assert_eq!(ProducerConfig::from(args).symbols, vec!["AAPL", "NVDA"]);
    }
}
