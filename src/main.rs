use anyhow::Result;
use clap::Parser;
use tick_relay::cli::{Cli, Command};
use tick_relay::{logging, producer, server, tail};

#[tokio::main]
async fn main() -> Result<()> {
    logging::init();
    match Cli::parse().command() {
        Command::Serve(args) => server::run_with_config(args.into()).await,
        Command::Produce(args) => producer::run_with_config(args.into()).await,
        Command::Tail(args) => tail::run(args).await,
    }
}
