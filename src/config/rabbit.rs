use std::env;
use std::fmt;
use tracing::{debug, info};

pub const DEFAULT_USER: &str = "admin";
pub const DEFAULT_PASSWORD: &str = "admin";
pub const DEFAULT_HOST: &str = "rabbitmq";
pub const DEFAULT_PORT: &str = "5672";
pub const DEFAULT_QUEUE: &str = "default";
pub const DEFAULT_SCHEME: &str = "amqp";

/// Broker connection parameters, resolved once at startup.
#[derive(Clone, PartialEq, Eq)]
pub struct RabbitMQConfig {
    pub scheme: String,
    pub user: String,
    pub password: String,
    pub host: String,
    pub port: String,
    pub queue_name: String,
}

impl Default for RabbitMQConfig {
    fn default() -> Self {
        Self {
            scheme: DEFAULT_SCHEME.to_string(),
            user: DEFAULT_USER.to_string(),
            password: DEFAULT_PASSWORD.to_string(),
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT.to_string(),
            queue_name: DEFAULT_QUEUE.to_string(),
        }
    }
}

impl RabbitMQConfig {
    /// Load RabbitMQ configuration from environment variables, providing sensible defaults
    pub fn from_env() -> Self {
        info!("Loading RabbitMQ configuration from environment");
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Resolve every field through `lookup`, falling back to the default when the
    /// variable is absent. A present but empty variable still wins over the default.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let resolve = |key: &str, default: &str| {
            debug!("Getting {} from env", key);
            lookup(key).unwrap_or_else(|| default.to_string())
        };

        Self {
            scheme: resolve("RABBITMQ_SCHEME", DEFAULT_SCHEME),
            user: resolve("RABBITMQ_USER", DEFAULT_USER),
            password: resolve("RABBITMQ_PASS", DEFAULT_PASSWORD),
            host: resolve("RABBITMQ_HOST", DEFAULT_HOST),
            port: resolve("RABBITMQ_PORT", DEFAULT_PORT),
            queue_name: resolve("RABBITMQ_QUEUE", DEFAULT_QUEUE),
        }
    }

    /// Connection URI handed to the broker client.
    pub fn amqp_url(&self) -> String {
        format!(
            "{}://{}:{}@{}:{}/",
            self.scheme, self.user, self.password, self.host, self.port
        )
    }

    /// Same as [`amqp_url`](Self::amqp_url) with the password masked, for logs.
    pub fn redacted_url(&self) -> String {
        format!(
            "{}://{}:***@{}:{}/",
            self.scheme, self.user, self.host, self.port
        )
    }
}

// Keep the password out of `{:?}` output, the config gets logged at startup.
impl fmt::Debug for RabbitMQConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RabbitMQConfig")
            .field("url", &self.redacted_url())
            .field("queue_name", &self.queue_name)
            .finish()
    }
}
