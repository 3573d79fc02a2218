use crate::{env_optional, env_parse_or, env_required, ConfigError, FromEnv};
use std::time::Duration;

/// Broker connection settings shared by listeners and senders.
#[derive(Clone, Debug)]
pub struct AmqpConfig {
    pub uri: String,
    /// Fixed delay between connection attempts.
    pub retry_delay: Duration,
    /// Delay before a sender closes its per-call connection.
    pub close_grace: Duration,
}

impl AmqpConfig {
    pub fn new(uri: impl AsRef<str>) -> Self {
        Self {
            uri: normalize_uri(uri.as_ref()),
            retry_delay: Duration::from_secs(1),
            close_grace: Duration::from_millis(500),
        }
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn with_close_grace(mut self, grace: Duration) -> Self {
        self.close_grace = grace;
        self
    }
}

impl FromEnv for AmqpConfig {
    /// Requires RABBIT_MQ_URI (or the older RABBIT_MQ_HOST) to be set
    fn from_env() -> Result<Self, ConfigError> {
        let uri = match env_optional("RABBIT_MQ_URI") {
            Some(uri) => uri,
            None => env_required("RABBIT_MQ_HOST")
                .map_err(|_| ConfigError::MissingEnvVar("RABBIT_MQ_URI".to_string()))?,
        };

        Ok(Self::new(uri)
            .with_retry_delay(Duration::from_millis(env_parse_or(
                "RABBIT_MQ_RETRY_DELAY_MS",
                1000u64,
            )?))
            .with_close_grace(Duration::from_millis(env_parse_or(
                "RABBIT_MQ_CLOSE_GRACE_MS",
                500u64,
            )?)))
    }
}

/// Accept a bare `host[:port]` the way older deployments configured the broker.
pub fn normalize_uri(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.starts_with("amqp://") || trimmed.starts_with("amqps://") {
        trimmed.to_string()
    } else {
        format!("amqp://{}", trimmed)
    }
}
