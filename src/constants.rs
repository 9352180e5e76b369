pub const FEED_SOCKET_PATH: &str = "ticks.sock";
pub const SERVER_BIND_ADDR: &str = "127.0.0.1:8080";

pub const DEFAULT_TTL_SECS: u64 = 3_600;
pub const BROADCAST_INTERVAL_MS: u64 = 1_000;
pub const RECENCY_WINDOW_SECS: i64 = 2;
pub const BROADCAST_MAX_ROWS: usize = 5;
pub const STORE_TIMEOUT_MS: u64 = 2_000;
pub const OUTBOX_CAPACITY: usize = 64;
pub const SWEEP_INTERVAL_SECS: u64 = 30;
pub const RECONNECT_BACKOFF_MS: u64 = 1_000;

pub const PRODUCE_INTERVAL_MS: u64 = 1_000;
pub const PRODUCE_SYMBOLS: [&str; 5] = ["AAPL", "GOOGL", "MSFT", "AMZN", "FB"];
