use lapin::{Channel, options::QueueDeclareOptions, types::FieldTable};
use tracing::debug;

use crate::error::{Error, Result};

/// Broker-side view of a declared queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueInfo {
    pub name: String,
    pub message_count: u32,
    pub consumer_count: u32,
}

/// Durable, kept when unused, shared between connections.
pub fn queue_options() -> QueueDeclareOptions {
    QueueDeclareOptions {
        durable: true,
        auto_delete: false,
        exclusive: false,
        ..Default::default()
    }
}

/// Make sure `queue_name` exists with [`queue_options`]. Declaring an existing
/// queue with the same options is a no-op on the broker; declaring one with
/// different options is rejected and surfaces as [`Error::Declaration`].
pub async fn declare(channel: &Channel, queue_name: &str) -> Result<QueueInfo> {
    let queue = channel
        .queue_declare(queue_name, queue_options(), FieldTable::default())
        .await
        .map_err(|source| Error::Declaration {
            queue: queue_name.to_string(),
            source,
        })?;

    let info = QueueInfo {
        name: queue.name().as_str().to_string(),
        message_count: queue.message_count(),
        consumer_count: queue.consumer_count(),
    };

    debug!("✅ Declared queue: {:?}", info);
    Ok(info)
}
