use futures::future::BoxFuture;
use std::io::{self, Write};
use std::sync::Mutex;
use thiserror::Error;

use crate::rabbitmq::Message;

#[derive(Error, Debug)]
pub enum HandlerError {
    /// The message can never be processed. Always dropped, never requeued.
    #[error("malformed message: {0}")]
    Malformed(String),

    #[error("handler failed: {0}")]
    Failed(String),
}

/// Work done for each delivered message.
pub trait MessageHandler: Send + Sync + 'static {
    fn handle<'a>(&'a self, message: &'a Message) -> BoxFuture<'a, Result<(), HandlerError>>;
}

/// Writes each message body as one line of text.
pub struct PrintHandler<W> {
    out: Mutex<W>,
}

impl PrintHandler<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write + Send + 'static> PrintHandler<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    fn print(&self, body: &[u8]) -> Result<(), HandlerError> {
        let text = std::str::from_utf8(body)
            .map_err(|e| HandlerError::Malformed(format!("body is not valid UTF-8: {}", e)))?;

        let mut out = self
            .out
            .lock()
            .map_err(|_| HandlerError::Failed("output lock poisoned".to_string()))?;
        writeln!(out, "{}", text)
            .and_then(|_| out.flush())
            .map_err(|e| HandlerError::Failed(format!("failed to write message: {}", e)))
    }
}

impl<W: Write + Send + 'static> MessageHandler for PrintHandler<W> {
    fn handle<'a>(&'a self, message: &'a Message) -> BoxFuture<'a, Result<(), HandlerError>> {
        Box::pin(async move { self.print(&message.body) })
    }
}
