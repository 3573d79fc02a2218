//! RabbitMQ backend.
//!
//! # Topology
//!
//! | Component         | Declares                              | Consumes / publishes                  |
//! |-------------------|---------------------------------------|---------------------------------------|
//! | `QueueListener`   | durable queue                         | manual ack, prefetch 1                |
//! | `FanoutListener`  | non-durable fanout + exclusive queue  | auto-ack                              |
//! | `QueueSender`     | durable queue / durable topic exchange| persistent messages, context stamped  |
//! | `TopicBroadcaster`| non-durable fanout exchange           | context and `service` stamped         |
//!
//! Listeners reconnect forever with a fixed delay. Senders open one
//! connection per publish and close it after a short grace period.

pub mod broadcaster;
pub mod connection;
pub mod delivery;
pub mod error;
pub mod fanout;
pub mod health;
pub mod listener;
pub mod metrics;
pub mod sender;
pub mod transport;

pub use broadcaster::TopicBroadcaster;
pub use connection::{connect, connect_with_retry, redact_uri, retry_forever};
pub use delivery::{InboundDelivery, Settlement};
pub use error::BrokerError;
pub use fanout::FanoutListener;
pub use health::{HealthServer, HealthState, HealthStatus};
pub use listener::{ListenerConfig, QueueListener, PREFETCH};
pub use metrics::{init_metrics, ListenerMetrics};
pub use sender::QueueSender;
pub use transport::{AmqpTransport, MemoryTransport, PublishTarget, Transport};
