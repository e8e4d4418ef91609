use thiserror::Error;
use tracing::subscriber::SetGlobalDefaultError;
use tracing_log::log::SetLoggerError;

pub type Result<T> = std::result::Result<T, ErrorConfig>;

#[derive(Error, Debug)]
pub enum ErrorConfig {
    #[error(transparent)]
    TracingLog(#[from] SetLoggerError),

    #[error(transparent)]
    TracingSubscriber(#[from] SetGlobalDefaultError),

    #[error("invalid value {value:?} for {variable}: {reason}")]
    InvalidValue {
        variable: &'static str,
        value: String,
        reason: String,
    },
}

impl ErrorConfig {
    pub(crate) fn invalid(variable: &'static str, value: &str, reason: impl ToString) -> Self {
        Self::InvalidValue {
            variable,
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }
}
