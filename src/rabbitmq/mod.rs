pub mod backoff;
pub mod connection;
pub mod consumer;
pub mod message;
pub mod producer;
pub mod queue;

pub use connection::{ConnectionManager, Session};
pub use consumer::{ExitReason, MessagePump, PumpExit, PumpState};
pub use message::Message;
pub use producer::RabbitMQProducer;
