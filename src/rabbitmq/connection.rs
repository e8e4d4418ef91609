use lapin::{Channel, Connection, ConnectionProperties};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::config::rabbit::RabbitMQConfig;
use crate::error::{Error, Result};
use crate::rabbitmq::backoff::Backoff;
use crate::shutdown::ShutdownSignal;

/// Upper bound for each teardown step (`basic.cancel`, channel close,
/// connection close) against a broker that stopped answering.
pub const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Await `fut` for at most `limit`. Returns `false` and logs when it ran out.
pub(crate) async fn bounded<F>(what: &str, limit: Duration, fut: F) -> bool
where
    F: Future<Output = ()>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(()) => true,
        Err(_) => {
            warn!("⏱️ {} did not finish within {:?}, giving up", what, limit);
            false
        }
    }
}

/// An open connection and the single channel used on it.
pub struct Session {
    connection: Connection,
    channel: Channel,
}

impl Session {
    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    pub fn is_connected(&self) -> bool {
        self.connection.status().connected()
    }

    /// Gracefully close channel then connection, each step bounded by
    /// [`CLOSE_TIMEOUT`]. Failures are logged only, the broker may already
    /// have torn them down.
    pub async fn close(self) {
        if self.channel.status().connected() {
            bounded("Channel close", CLOSE_TIMEOUT, async {
                if let Err(e) = self.channel.close(200, "Normal shutdown").await {
                    warn!("Failed to close channel: {}", e);
                }
            })
            .await;
        }

        if self.connection.status().connected() {
            bounded("Connection close", CLOSE_TIMEOUT, async {
                match self.connection.close(200, "Normal shutdown").await {
                    Ok(()) => info!("✅ RabbitMQ connection closed gracefully"),
                    Err(e) => warn!("Failed to close connection: {}", e),
                }
            })
            .await;
        }
    }
}

/// Owns how to reach the broker. Hands out sessions, never the raw connection.
pub struct ConnectionManager {
    config: RabbitMQConfig,
}

impl ConnectionManager {
    pub fn new(config: RabbitMQConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RabbitMQConfig {
        &self.config
    }

    fn connection_error(&self, source: lapin::Error) -> Error {
        Error::Connection {
            url: self.config.redacted_url(),
            source,
        }
    }

    /// One dial and one channel open, no retries.
    pub async fn open(&self) -> Result<Session> {
        info!("🐰 Connecting to RabbitMQ: {}", self.config.redacted_url());

        let connection = Connection::connect(&self.config.amqp_url(), ConnectionProperties::default())
            .await
            .map_err(|e| self.connection_error(e))?;

        info!("✅ Connected to RabbitMQ: {}", self.config.redacted_url());

        let channel = match connection.create_channel().await {
            Ok(channel) => channel,
            Err(e) => {
                if let Err(close_err) = connection.close(200, "Channel open failed").await {
                    debug!("Closing half-open connection failed: {}", close_err);
                }
                return Err(self.connection_error(e));
            }
        };

        info!("✅ Created RabbitMQ channel");

        Ok(Session {
            connection,
            channel,
        })
    }

    /// [`open`](Self::open), retried with `backoff` until it succeeds, retries
    /// run out, or shutdown is requested while waiting.
    pub async fn open_with_retry(
        &self,
        backoff: &Backoff,
        shutdown: &mut ShutdownSignal,
    ) -> Result<Session> {
        retry(backoff, shutdown, || self.open()).await
    }

    /// Open a session, run `f` with its channel, then close the session
    /// whether `f` returned `Ok` or `Err`.
    ///
    /// If `f` panics or this future is dropped before `f` finishes, the
    /// session is dropped without the close handshake: lapin tears the socket
    /// down and the broker cleans up the channel and consumer on its side.
    pub async fn scoped<F, Fut, T>(
        &self,
        backoff: &Backoff,
        shutdown: &mut ShutdownSignal,
        f: F,
    ) -> Result<T>
    where
        F: FnOnce(Channel) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let session = self.open_with_retry(backoff, shutdown).await?;
        let result = f(session.channel().clone()).await;
        session.close().await;
        result
    }
}

/// Generic retry loop behind [`ConnectionManager::open_with_retry`].
pub(crate) async fn retry<T, F, Fut>(
    backoff: &Backoff,
    shutdown: &mut ShutdownSignal,
    mut attempt_fn: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0u32;
    loop {
        let err = match attempt_fn().await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        attempt += 1;
        if !err.is_retryable() || !backoff.allows(attempt) || shutdown.is_triggered() {
            error!("❌ {}", err);
            return Err(err);
        }

        let delay = backoff.delay(attempt);
        warn!(
            "🔄 {} (retry {}/{} in {:?})",
            err, attempt, backoff.max_retries, delay
        );

        tokio::select! {
            biased;
            _ = shutdown.wait() => {
                info!("Shutdown requested while waiting to reconnect");
                return Err(err);
            }
            _ = tokio::time::sleep(delay) => {}
        }
    }
}
