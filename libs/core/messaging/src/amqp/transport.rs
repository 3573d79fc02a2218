//! Publication targets and the transports that reach them.

use crate::amqp::connection::{close_quietly, connect, open_channel};
use crate::amqp::error::BrokerError;
use async_trait::async_trait;
use core_config::AmqpConfig;
use lapin::options::{BasicPublishOptions, ExchangeDeclareOptions, QueueDeclareOptions};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, ExchangeKind};
use std::fmt;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

const PERSISTENT: u8 = 2;

/// Where a message is published.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PublishTarget {
    /// Durable queue through the default exchange, persistent delivery
    Queue(String),
    /// Durable topic exchange with a routing key, persistent delivery
    Topic {
        exchange: String,
        routing_key: String,
    },
    /// Non-durable fanout exchange
    Fanout(String),
}

impl PublishTarget {
    pub fn topic(exchange: impl Into<String>, routing_key: impl Into<String>) -> Self {
        Self::Topic {
            exchange: exchange.into(),
            routing_key: routing_key.into(),
        }
    }
}

impl fmt::Display for PublishTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PublishTarget::Queue(queue) => write!(f, "queue:{}", queue),
            PublishTarget::Topic {
                exchange,
                routing_key,
            } => write!(f, "topic:{}/{}", exchange, routing_key),
            PublishTarget::Fanout(exchange) => write!(f, "fanout:{}", exchange),
        }
    }
}

/// Publishes raw payloads to a target.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn publish(&self, target: &PublishTarget, payload: &[u8]) -> Result<(), BrokerError>;
}

/// Opens a fresh connection for every publish and closes it after a grace delay.
#[derive(Debug, Clone)]
pub struct AmqpTransport {
    uri: String,
    close_grace: Duration,
    connection_name: String,
}

impl AmqpTransport {
    pub fn new(config: &AmqpConfig) -> Self {
        Self {
            uri: config.uri.clone(),
            close_grace: config.close_grace,
            connection_name: "sender".to_string(),
        }
    }

    pub fn with_connection_name(mut self, name: impl Into<String>) -> Self {
        self.connection_name = name.into();
        self
    }

    async fn publish_on(
        &self,
        channel: &Channel,
        target: &PublishTarget,
        payload: &[u8],
    ) -> Result<(), BrokerError> {
        let json = BasicProperties::default().with_content_type("application/json".into());

        let (exchange, routing_key, properties) = match target {
            PublishTarget::Queue(queue) => {
                channel
                    .queue_declare(
                        queue,
                        QueueDeclareOptions {
                            durable: true,
                            ..Default::default()
                        },
                        FieldTable::default(),
                    )
                    .await
                    .map_err(BrokerError::Channel)?;
                ("", queue.as_str(), json.with_delivery_mode(PERSISTENT))
            }
            PublishTarget::Topic {
                exchange,
                routing_key,
            } => {
                channel
                    .exchange_declare(
                        exchange,
                        ExchangeKind::Topic,
                        ExchangeDeclareOptions {
                            durable: true,
                            ..Default::default()
                        },
                        FieldTable::default(),
                    )
                    .await
                    .map_err(BrokerError::Channel)?;
                (
                    exchange.as_str(),
                    routing_key.as_str(),
                    json.with_delivery_mode(PERSISTENT),
                )
            }
            PublishTarget::Fanout(exchange) => {
                channel
                    .exchange_declare(
                        exchange,
                        ExchangeKind::Fanout,
                        ExchangeDeclareOptions {
                            durable: false,
                            ..Default::default()
                        },
                        FieldTable::default(),
                    )
                    .await
                    .map_err(BrokerError::Channel)?;
                (exchange.as_str(), "", json)
            }
        };

        channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions::default(),
                payload,
                properties,
            )
            .await
            .map_err(BrokerError::Channel)?
            .await
            .map_err(BrokerError::Channel)?;

        Ok(())
    }
}

#[async_trait]
impl Transport for AmqpTransport {
    async fn publish(&self, target: &PublishTarget, payload: &[u8]) -> Result<(), BrokerError> {
        let connection = connect(&self.uri, &self.connection_name).await?;

        let result = match open_channel(&connection).await {
            Ok(channel) => self.publish_on(&channel, target, payload).await,
            Err(e) => Err(e),
        };

        // let the frames flush before tearing the connection down
        tokio::time::sleep(self.close_grace).await;
        close_quietly(&connection, "publish complete").await;

        if result.is_ok() {
            debug!(target = %target, bytes = payload.len(), "Message published");
        }
        result
    }
}

/// Records publications in memory (for testing).
#[derive(Debug, Default)]
pub struct MemoryTransport {
    published: Mutex<Vec<(PublishTarget, Vec<u8>)>>,
    fail: bool,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every publish fails, as if the broker were unreachable.
    pub fn failing() -> Self {
        Self {
            published: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub async fn published(&self) -> Vec<(PublishTarget, Vec<u8>)> {
        self.published.lock().await.clone()
    }

    /// Payloads sent to `target`, decoded as JSON.
    pub async fn json_sent_to(&self, target: &PublishTarget) -> Vec<serde_json::Value> {
        self.published
            .lock()
            .await
            .iter()
            .filter(|(t, _)| t == target)
            .filter_map(|(_, payload)| serde_json::from_slice(payload).ok())
            .collect()
    }

    pub async fn count(&self) -> usize {
        self.published.lock().await.len()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn publish(&self, target: &PublishTarget, payload: &[u8]) -> Result<(), BrokerError> {
        if self.fail {
            return Err(BrokerError::Publish(format!("{} unreachable", target)));
        }
        self.published
            .lock()
            .await
            .push((target.clone(), payload.to_vec()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_target_display() {
        assert_eq!(PublishTarget::Queue("jobs".into()).to_string(), "queue:jobs");
        assert_eq!(
            PublishTarget::topic("status", "bcf.converter.succeeded").to_string(),
            "topic:status/bcf.converter.succeeded"
        );
        assert_eq!(PublishTarget::Fanout("events".into()).to_string(), "fanout:events");
    }

    #[tokio::test]
    async fn test_memory_transport_records_by_target() {
        let transport = MemoryTransport::new();
        let queue = PublishTarget::Queue("jobs".into());
        let fanout = PublishTarget::Fanout("events".into());

        transport.publish(&queue, br#"{"id":"1"}"#).await.unwrap();
        transport.publish(&fanout, br#"{"id":"2"}"#).await.unwrap();

        assert_eq!(transport.count().await, 2);
        let sent = transport.json_sent_to(&queue).await;
        assert_eq!(sent, vec![serde_json::json!({"id": "1"})]);
    }

    #[tokio::test]
    async fn test_failing_memory_transport() {
        let transport = MemoryTransport::failing();
        let err = transport
            .publish(&PublishTarget::Queue("jobs".into()), b"{}")
            .await
            .unwrap_err();

        assert!(err.to_string().contains("queue:jobs"));
        assert_eq!(transport.count().await, 0);
    }

    #[tokio::test]
    async fn test_amqp_transport_reports_connect_failure() {
        let transport = AmqpTransport::new(
            &AmqpConfig::new("amqp://127.0.0.1:1").with_close_grace(Duration::ZERO),
        );
        let err = transport
            .publish(&PublishTarget::Queue("jobs".into()), b"{}")
            .await
            .unwrap_err();

        assert!(err.is_connection_error());
    }
}
