//! Inbound deliveries and their settlement.

use crate::amqp::error::BrokerError;
use crate::ProcessingError;
use async_trait::async_trait;
use lapin::options::{BasicAckOptions, BasicNackOptions};

/// A message taken from a queue that must be settled exactly once.
///
/// Settling consumes the delivery, so a second ack or reject does not compile.
#[async_trait]
pub trait InboundDelivery: Send + Sized + 'static {
    fn payload(&self) -> &[u8];

    fn delivery_tag(&self) -> u64;

    fn redelivered(&self) -> bool;

    /// Positive acknowledgment; the broker drops the message.
    async fn acknowledge(self) -> Result<(), BrokerError>;

    /// Negative acknowledgment without requeue.
    async fn discard(self) -> Result<(), BrokerError>;
}

#[async_trait]
impl InboundDelivery for lapin::message::Delivery {
    fn payload(&self) -> &[u8] {
        &self.data
    }

    fn delivery_tag(&self) -> u64 {
        self.delivery_tag
    }

    fn redelivered(&self) -> bool {
        self.redelivered
    }

    async fn acknowledge(self) -> Result<(), BrokerError> {
        self.acker
            .ack(BasicAckOptions::default())
            .await
            .map_err(BrokerError::Channel)
    }

    async fn discard(self) -> Result<(), BrokerError> {
        self.acker
            .nack(BasicNackOptions {
                multiple: false,
                requeue: false,
            })
            .await
            .map_err(BrokerError::Channel)
    }
}

/// Outcome applied to a delivery once its job has finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    Ack,
    Discard,
}

impl Settlement {
    pub fn for_result<T>(result: &Result<T, ProcessingError>) -> Self {
        match result {
            Ok(_) => Settlement::Ack,
            Err(_) => Settlement::Discard,
        }
    }

    pub async fn apply<D: InboundDelivery>(self, delivery: D) -> Result<(), BrokerError> {
        match self {
            Settlement::Ack => delivery.acknowledge().await,
            Settlement::Discard => delivery.discard().await,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Settlement::Ack => "ack",
            Settlement::Discard => "discard",
        }
    }
}
