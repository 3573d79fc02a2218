//! Fan-out publisher that tags messages with the emitting service.

use crate::amqp::error::BrokerError;
use crate::amqp::metrics::{message_dropped, message_published};
use crate::amqp::transport::{PublishTarget, Transport};
use crate::Job;
use serde_json::Value;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::{debug, warn};

/// Publishes jobs to a non-durable fanout exchange.
///
/// Like [`QueueSender`](crate::amqp::QueueSender) it overwrites the context;
/// it also adds a top-level `service` field naming the sender.
pub struct TopicBroadcaster<J: Job> {
    transport: Arc<dyn Transport>,
    exchange: String,
    service: String,
    context: J::Context,
    _marker: PhantomData<J>,
}

impl<J: Job> TopicBroadcaster<J> {
    pub fn new(
        transport: Arc<dyn Transport>,
        exchange: impl Into<String>,
        service: impl Into<String>,
        context: J::Context,
    ) -> Self {
        Self {
            transport,
            exchange: exchange.into(),
            service: service.into(),
            context,
            _marker: PhantomData,
        }
    }

    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    /// Broadcast a job. Failures are logged and dropped.
    pub async fn send(&self, message: J) -> bool {
        let target = PublishTarget::Fanout(self.exchange.clone());
        let job_id = message.job_id();

        match self.try_send(&target, message).await {
            Ok(()) => {
                message_published(&target.to_string());
                debug!(job_id = %job_id, exchange = %self.exchange, "Broadcast sent");
                true
            }
            Err(e) => {
                message_dropped(&target.to_string());
                warn!(job_id = %job_id, exchange = %self.exchange, error = %e, "Broadcast failed, message dropped");
                false
            }
        }
    }

    async fn try_send(&self, target: &PublishTarget, message: J) -> Result<(), BrokerError> {
        let message = message.with_context(self.context.clone());
        let mut value = serde_json::to_value(&message)?;
        if let Value::Object(fields) = &mut value {
            fields.insert("service".to_string(), Value::String(self.service.clone()));
        }
        let payload = serde_json::to_vec(&value)?;
        self.transport.publish(target, &payload).await
    }
}
