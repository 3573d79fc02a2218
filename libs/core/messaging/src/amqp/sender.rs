//! Context-stamping publisher for jobs.

use crate::amqp::error::BrokerError;
use crate::amqp::metrics::{message_dropped, message_published};
use crate::amqp::transport::{PublishTarget, Transport};
use crate::Job;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::{debug, warn};

/// Publishes jobs to a durable queue or a durable topic exchange.
///
/// Every message is stamped with the sender's own context before it is
/// serialized, overwriting whatever the caller set. Publish failures are
/// logged and the message is dropped; nothing is propagated.
pub struct QueueSender<J: Job> {
    transport: Arc<dyn Transport>,
    queue: String,
    context: J::Context,
    _marker: PhantomData<J>,
}

impl<J: Job> QueueSender<J> {
    pub fn new(transport: Arc<dyn Transport>, queue: impl Into<String>, context: J::Context) -> Self {
        Self {
            transport,
            queue: queue.into(),
            context,
            _marker: PhantomData,
        }
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn context(&self) -> &J::Context {
        &self.context
    }

    /// Publish to the sender's queue. Returns whether the broker accepted it.
    pub async fn send(&self, message: J) -> bool {
        let target = PublishTarget::Queue(self.queue.clone());
        self.deliver(&target, message).await
    }

    /// Publish to a topic exchange under `routing_key`.
    pub async fn send_to(&self, topic: &str, routing_key: &str, message: J) -> bool {
        let target = PublishTarget::topic(topic, routing_key);
        self.deliver(&target, message).await
    }

    async fn deliver(&self, target: &PublishTarget, message: J) -> bool {
        let job_id = message.job_id();
        match self.try_deliver(target, message).await {
            Ok(()) => {
                message_published(&target.to_string());
                debug!(job_id = %job_id, target = %target, "Job published");
                true
            }
            Err(e) => {
                message_dropped(&target.to_string());
                warn!(job_id = %job_id, target = %target, error = %e, "Publish failed, message dropped");
                false
            }
        }
    }

    async fn try_deliver(&self, target: &PublishTarget, message: J) -> Result<(), BrokerError> {
        let message = message.with_context(self.context.clone());
        let payload = serde_json::to_vec(&message)?;
        self.transport.publish(target, &payload).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amqp::transport::MemoryTransport;
    use crate::job::tests::{TestContext, TestJob};

    fn context(tenant: &str) -> TestContext {
        TestContext {
            tenant: Some(tenant.to_string()),
        }
    }

    #[tokio::test]
    async fn test_send_stamps_sender_context() {
        let transport = Arc::new(MemoryTransport::new());
        let sender = QueueSender::<TestJob>::new(transport.clone(), "jobs", context("acme"));

        let job = TestJob::new("job-1", "a").with_context(context("caller"));
        assert!(sender.send(job).await);

        let sent = transport
            .json_sent_to(&PublishTarget::Queue("jobs".into()))
            .await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0]["id"], "job-1");
        assert_eq!(sent[0]["context"]["tenant"], "acme");
    }

    #[tokio::test]
    async fn test_send_to_uses_topic_and_routing_key() {
        let transport = Arc::new(MemoryTransport::new());
        let sender = QueueSender::<TestJob>::new(transport.clone(), "jobs", context("acme"));

        assert!(
            sender
                .send_to("status", "bcf.converter.succeeded", TestJob::new("job-1", "a"))
                .await
        );

        let published = transport.published().await;
        assert_eq!(published.len(), 1);
        assert_eq!(
            published[0].0,
            PublishTarget::topic("status", "bcf.converter.succeeded")
        );
    }

    #[tokio::test]
    async fn test_send_failure_is_swallowed() {
        let transport = Arc::new(MemoryTransport::failing());
        let sender = QueueSender::<TestJob>::new(transport.clone(), "jobs", context("acme"));

        assert!(!sender.send(TestJob::new("job-1", "a")).await);
        assert_eq!(transport.count().await, 0);
    }
}
