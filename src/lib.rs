//! RabbitMQ queue consumer: resolves broker settings from the environment,
//! declares a durable queue and prints every message body to stdout, with
//! bounded concurrency, reconnect backoff and graceful shutdown.

pub mod config;
pub mod error;
pub mod handler;
pub mod rabbitmq;
pub mod shutdown;
pub mod worker;
