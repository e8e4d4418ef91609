use std::env;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::error::{ErrorConfig, Result};
use crate::rabbitmq::backoff::Backoff;

/// When a delivery is acknowledged to the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AckMode {
    /// Broker considers the message delivered as soon as it is sent (at-most-once).
    /// A crash between receipt and handling loses the message.
    #[default]
    Auto,
    /// Ack after the handler succeeds, reject on failure (at-least-once).
    Manual,
}

impl FromStr for AckMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "manual" => Ok(Self::Manual),
            other => Err(format!("expected `auto` or `manual`, got `{}`", other)),
        }
    }
}

/// Tuning for the message pump and the reconnect loop.
#[derive(Debug, Clone)]
pub struct ConsumerSettings {
    pub concurrency: usize,
    pub ack_mode: AckMode,
    pub requeue_on_failure: bool,
    /// basic.qos prefetch count, 0 leaves the channel unlimited.
    pub prefetch: u16,
    pub shutdown_grace: Duration,
    pub consumer_tag: String,
    pub reconnect: Backoff,
}

impl Default for ConsumerSettings {
    fn default() -> Self {
        Self {
            concurrency: 1,
            ack_mode: AckMode::Auto,
            requeue_on_failure: false,
            prefetch: 0,
            shutdown_grace: Duration::from_secs(10),
            consumer_tag: default_consumer_tag(),
            reconnect: Backoff::default(),
        }
    }
}

fn default_consumer_tag() -> String {
    format!("rabbit_consumer-{}", uuid::Uuid::new_v4())
}

fn parse<T>(variable: &'static str, raw: Option<String>) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: ToString,
{
    match raw {
        None => Ok(None),
        Some(value) => {
            debug!("Parsing {} from env", variable);
            value
                .trim()
                .parse::<T>()
                .map(Some)
                .map_err(|e| ErrorConfig::invalid(variable, &value, e))
        }
    }
}

impl ConsumerSettings {
    pub fn from_env() -> Result<Self> {
        info!("Loading consumer settings from environment");
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut settings = Self::default();

        if let Some(concurrency) = parse::<usize>("CONSUMER_CONCURRENCY", lookup("CONSUMER_CONCURRENCY"))? {
            if concurrency == 0 {
                return Err(ErrorConfig::invalid(
                    "CONSUMER_CONCURRENCY",
                    "0",
                    "must be at least 1",
                ));
            }
            settings.concurrency = concurrency;
        }

        if let Some(mode) = parse::<AckMode>("CONSUMER_ACK_MODE", lookup("CONSUMER_ACK_MODE"))? {
            settings.ack_mode = mode;
        }

        if let Some(requeue) = parse::<bool>(
            "CONSUMER_REQUEUE_ON_FAILURE",
            lookup("CONSUMER_REQUEUE_ON_FAILURE"),
        )? {
            settings.requeue_on_failure = requeue;
        }

        if let Some(prefetch) = parse::<u16>("CONSUMER_PREFETCH", lookup("CONSUMER_PREFETCH"))? {
            settings.prefetch = prefetch;
        }

        if let Some(secs) = parse::<u64>(
            "CONSUMER_SHUTDOWN_GRACE_SECS",
            lookup("CONSUMER_SHUTDOWN_GRACE_SECS"),
        )? {
            settings.shutdown_grace = Duration::from_secs(secs);
        }

        if let Some(tag) = lookup("CONSUMER_TAG").filter(|tag| !tag.is_empty()) {
            settings.consumer_tag = tag;
        }

        if let Some(retries) = parse::<u32>(
            "RABBITMQ_RECONNECT_RETRIES",
            lookup("RABBITMQ_RECONNECT_RETRIES"),
        )? {
            settings.reconnect.max_retries = retries;
        }

        if let Some(secs) = parse::<u64>(
            "RABBITMQ_RECONNECT_MAX_DELAY_SECS",
            lookup("RABBITMQ_RECONNECT_MAX_DELAY_SECS"),
        )? {
            settings.reconnect.max_delay = Duration::from_secs(secs);
        }

        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_match_single_auto_ack_consumer() {
        let settings = ConsumerSettings::from_lookup(|_| None).unwrap();

        assert_eq!(settings.concurrency, 1);
        assert_eq!(settings.ack_mode, AckMode::Auto);
        assert!(!settings.requeue_on_failure);
        assert_eq!(settings.prefetch, 0);
        assert_eq!(settings.shutdown_grace, Duration::from_secs(10));
        assert_eq!(settings.reconnect.max_retries, 0);
        assert!(settings.consumer_tag.starts_with("rabbit_consumer-"));
    }

    #[test]
    fn test_overrides() {
        let settings = ConsumerSettings::from_lookup(lookup_from(&[
            ("CONSUMER_CONCURRENCY", "4"),
            ("CONSUMER_ACK_MODE", "Manual"),
            ("CONSUMER_REQUEUE_ON_FAILURE", "true"),
            ("CONSUMER_PREFETCH", "16"),
            ("CONSUMER_SHUTDOWN_GRACE_SECS", "3"),
            ("CONSUMER_TAG", "printer"),
            ("RABBITMQ_RECONNECT_RETRIES", "5"),
            ("RABBITMQ_RECONNECT_MAX_DELAY_SECS", "60"),
        ]))
        .unwrap();

        assert_eq!(settings.concurrency, 4);
        assert_eq!(settings.ack_mode, AckMode::Manual);
        assert!(settings.requeue_on_failure);
        assert_eq!(settings.prefetch, 16);
        assert_eq!(settings.shutdown_grace, Duration::from_secs(3));
        assert_eq!(settings.consumer_tag, "printer");
        assert_eq!(settings.reconnect.max_retries, 5);
        assert_eq!(settings.reconnect.max_delay, Duration::from_secs(60));
    }

    #[test]
    fn test_invalid_number_names_the_variable() {
        let err = ConsumerSettings::from_lookup(lookup_from(&[("CONSUMER_CONCURRENCY", "many")]))
            .unwrap_err();

        match err {
            ErrorConfig::InvalidValue {
                variable, value, ..
            } => {
                assert_eq!(variable, "CONSUMER_CONCURRENCY");
                assert_eq!(value, "many");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_largest_max_delay_yields_usable_backoff() {
        let settings = ConsumerSettings::from_lookup(lookup_from(&[
            ("RABBITMQ_RECONNECT_MAX_DELAY_SECS", "18446744073709551615"),
        ]))
        .unwrap();

        assert_eq!(settings.reconnect.max_delay, Duration::from_secs(u64::MAX));
        assert!(settings.reconnect.delay(u32::MAX) <= settings.reconnect.max_delay);
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        assert!(
            ConsumerSettings::from_lookup(lookup_from(&[("CONSUMER_CONCURRENCY", "0")])).is_err()
        );
    }

    #[test]
    fn test_unknown_ack_mode_rejected() {
        assert!(
            ConsumerSettings::from_lookup(lookup_from(&[("CONSUMER_ACK_MODE", "sometimes")]))
                .is_err()
        );
    }

    #[test]
    fn test_ack_mode_parse() {
        assert_eq!(" auto ".parse::<AckMode>(), Ok(AckMode::Auto));
        assert_eq!("MANUAL".parse::<AckMode>(), Ok(AckMode::Manual));
    }
}
