use lapin::{BasicProperties, Channel, options::BasicPublishOptions};
use tracing::debug;

use crate::config::rabbit::RabbitMQConfig;
use crate::error::{Error, Result};
use crate::rabbitmq::connection::{ConnectionManager, Session};
use crate::rabbitmq::queue;

/// Publishes raw bodies to the configured queue through the default exchange.
pub struct RabbitMQProducer {
    queue_name: String,
    session: Session,
}

impl RabbitMQProducer {
    /// Connect and declare the queue with the same options the consumer uses.
    pub async fn connect(config: RabbitMQConfig) -> Result<Self> {
        let queue_name = config.queue_name.clone();
        let session = ConnectionManager::new(config).open().await?;
        if let Err(e) = queue::declare(session.channel(), &queue_name).await {
            session.close().await;
            return Err(e);
        }

        Ok(Self {
            queue_name,
            session,
        })
    }

    /// Publish one persistent message to the queue.
    pub async fn publish(&self, body: &[u8]) -> Result<()> {
        self.session
            .channel()
            .basic_publish(
                "",
                &self.queue_name,
                BasicPublishOptions::default(),
                body,
                BasicProperties::default()
                    .with_content_type("text/plain".into())
                    .with_delivery_mode(2), // Persistent message
            )
            .await
            .map_err(|source| Error::Publish {
                queue: self.queue_name.clone(),
                source,
            })?;

        debug!("📤 Published {} bytes to {}", body.len(), self.queue_name);
        Ok(())
    }

    pub fn channel(&self) -> &Channel {
        self.session.channel()
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_connected()
    }

    pub async fn close(self) {
        self.session.close().await;
    }
}
