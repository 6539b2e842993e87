//! reverb: a multi-threaded TCP echo server.
//!
//! One non-blocking acceptor on the main thread distributes connections
//! round-robin across a fixed pool of worker threads, each running its
//! own mio event loop. Runs until terminated externally.

use reverb::config::Config;
use reverb::server::Server;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        addresses = config.listens.len(),
        workers = config.workers,
        poller = ?config.poller,
        "starting reverb"
    );

    let server = Server::bind(&config)?;
    server.run()?;
    Ok(())
}
