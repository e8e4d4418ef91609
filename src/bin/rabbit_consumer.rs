use anyhow::{Context, Result};
use rabbit_worker::config;
use rabbit_worker::handler::PrintHandler;
use rabbit_worker::shutdown::ShutdownCoordinator;
use rabbit_worker::worker;
use rustls::crypto::{CryptoProvider, ring::default_provider};
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // Crypto provider for amqps:// brokers
    _ = CryptoProvider::install_default(default_provider());

    // Logging, .env and settings (with defaults)
    let (cfg, settings) = config::init().context("Failed to load configuration")?;
    info!("Starting standalone RabbitMQ consumer with config: {:?}", cfg);
    info!("Consumer settings: {:?}", settings);

    let coordinator = ShutdownCoordinator::new();
    coordinator.listen_for_signals();

    let mut handle = tokio::spawn(worker::run(
        cfg,
        settings,
        Arc::new(PrintHandler::stdout()),
        coordinator.clone(),
    ));

    info!("Consumer running. Press Ctrl+C to stop.");

    // Returns once the worker has drained and closed the connection
    let finished = tokio::select! {
        _ = coordinator.wait() => None,
        joined = &mut handle => Some(joined),
    };
    let joined = match finished {
        Some(joined) => joined,
        None => handle.await,
    };
    joined.context("Worker task panicked")??;

    info!("Consumer stopped. Goodbye!");
    Ok(())
}
