use thiserror::Error;

use crate::config::error::ErrorConfig;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ErrorConfig),

    #[error("connection to {url} failed: {source}")]
    Connection {
        url: String,
        #[source]
        source: lapin::Error,
    },

    #[error("channel to {url} closed by broker")]
    ChannelClosed { url: String },

    #[error("failed to declare queue {queue}: {source}")]
    Declaration {
        queue: String,
        #[source]
        source: lapin::Error,
    },

    #[error("failed to subscribe to queue {queue}: {source}")]
    Consume {
        queue: String,
        #[source]
        source: lapin::Error,
    },

    #[error("failed to publish to queue {queue}: {source}")]
    Publish {
        queue: String,
        #[source]
        source: lapin::Error,
    },

    #[error("delivery error: {0}")]
    Delivery(String),
}

impl Error {
    /// Failures worth another connection attempt. A rejected declaration is
    /// not: the queue contract stays unsatisfiable on a fresh connection.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Connection { .. } | Error::ChannelClosed { .. } | Error::Consume { .. }
        )
    }
}
