use futures::future::BoxFuture;
use lapin::{
    acker::Acker,
    message::Delivery,
    options::{BasicAckOptions, BasicRejectOptions},
};
use std::fmt;
use std::sync::Arc;

/// Settles a single delivery with the broker.
pub trait Acknowledger: Send + Sync {
    fn ack(&self) -> BoxFuture<'_, lapin::Result<()>>;
    fn reject(&self, requeue: bool) -> BoxFuture<'_, lapin::Result<()>>;
}

impl Acknowledger for Acker {
    fn ack(&self) -> BoxFuture<'_, lapin::Result<()>> {
        Box::pin(async move {
            Acker::ack(self, BasicAckOptions::default()).await?;
            Ok(())
        })
    }

    fn reject(&self, requeue: bool) -> BoxFuture<'_, lapin::Result<()>> {
        Box::pin(async move {
            Acker::reject(self, BasicRejectOptions { requeue }).await?;
            Ok(())
        })
    }
}

/// A message pulled off the queue.
///
/// `acker` is only present when the consumer runs in manual-ack mode. In
/// auto-ack mode the broker already considers the message delivered.
pub struct Message {
    pub body: Vec<u8>,
    pub delivery_tag: u64,
    pub redelivered: bool,
    acker: Option<Arc<dyn Acknowledger>>,
}

impl Message {
    pub fn new(body: impl Into<Vec<u8>>, delivery_tag: u64) -> Self {
        Self {
            body: body.into(),
            delivery_tag,
            redelivered: false,
            acker: None,
        }
    }

    pub fn with_acker(mut self, acker: Arc<dyn Acknowledger>) -> Self {
        self.acker = Some(acker);
        self
    }

    pub fn from_delivery(delivery: Delivery, manual_ack: bool) -> Self {
        let Delivery {
            delivery_tag,
            redelivered,
            data,
            acker,
            ..
        } = delivery;

        let message = Self {
            body: data,
            delivery_tag,
            redelivered,
            acker: None,
        };

        if manual_ack {
            message.with_acker(Arc::new(acker))
        } else {
            message
        }
    }

    pub fn acker(&self) -> Option<&Arc<dyn Acknowledger>> {
        self.acker.as_ref()
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("delivery_tag", &self.delivery_tag)
            .field("redelivered", &self.redelivered)
            .field("len", &self.body.len())
            .field("manual_ack", &self.acker.is_some())
            .finish()
    }
}
