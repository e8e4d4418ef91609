pub mod consumer;
pub mod error;
pub mod rabbit;

use dotenv::dotenv;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::{consumer::ConsumerSettings, error::Result, rabbit::RabbitMQConfig};

pub use consumer::AckMode;

/// Install the global tracing subscriber. Logs go to stderr so stdout only
/// carries message bodies.
pub fn init_tracing() -> Result<()> {
    tracing_log::LogTracer::init()?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    Ok(())
}

/// Load `.env`, set up logging and resolve everything the worker needs.
pub fn init() -> Result<(RabbitMQConfig, ConsumerSettings)> {
    dotenv().ok();
    init_tracing()?;

    info!("Starting rabbit_worker");

    let rabbitmq_config = RabbitMQConfig::from_env();
    let consumer_settings = ConsumerSettings::from_env()?;

    Ok((rabbitmq_config, consumer_settings))
}
