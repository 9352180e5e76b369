pub mod cli;
pub mod clock;
pub mod constants;
pub mod ingest;
pub mod logging;
pub mod producer;
pub mod server;
pub mod shutdown;
pub mod store;
pub mod tail;
pub mod tick;
pub mod transport;
