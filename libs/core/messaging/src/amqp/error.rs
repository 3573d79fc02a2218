use thiserror::Error;

/// Broker-level failures, as opposed to job failures.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("failed to connect to broker: {0}")]
    Connect(#[source] lapin::Error),

    #[error("channel error: {0}")]
    Channel(#[source] lapin::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("publish failed: {0}")]
    Publish(String),

    #[error("consumer stream closed")]
    Closed,
}

impl BrokerError {
    /// Connection-level failures are retried by listeners; everything else is returned.
    pub fn is_connection_error(&self) -> bool {
        matches!(self, BrokerError::Connect(_))
    }
}
