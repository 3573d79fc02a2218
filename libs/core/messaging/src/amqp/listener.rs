//! Durable work-queue consumer.

use crate::amqp::connection::{
    close_quietly, connect_with_retry, open_channel, shutdown_requested, stream_ended, supervise,
    SessionEnd, Supervision,
};
use crate::amqp::delivery::{InboundDelivery, Settlement};
use crate::amqp::error::BrokerError;
use crate::amqp::health::HealthState;
use crate::amqp::metrics::ListenerMetrics;
use crate::{Job, ProcessingError, Processor};
use core_config::AmqpConfig;
use futures::StreamExt;
use lapin::options::{BasicConsumeOptions, BasicQosOptions, QueueDeclareOptions};
use lapin::types::FieldTable;
use lapin::Connection;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Unacked deliveries a listener may hold. One keeps jobs serial and in
/// queue order.
pub const PREFETCH: u16 = 1;

/// Settings for a [`QueueListener`].
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    pub uri: String,
    pub queue: String,
    pub retry_delay: Duration,
    /// Prefix for consumer tags and the connection name
    pub service: String,
}

impl ListenerConfig {
    pub fn new(amqp: &AmqpConfig, queue: impl Into<String>) -> Self {
        Self {
            uri: amqp.uri.clone(),
            queue: queue.into(),
            retry_delay: amqp.retry_delay,
            service: "worker".to_string(),
        }
    }

    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.service = service.into();
        self
    }

    /// `<service>-<uuid>`, unique per subscribe.
    pub fn consumer_tag(&self) -> String {
        format!("{}-{}", self.service, uuid::Uuid::new_v4())
    }
}

/// Consumes a durable queue, one job at a time, settling each delivery
/// from the processor's result.
pub struct QueueListener<J: Job, P: Processor<J>> {
    config: ListenerConfig,
    processor: Arc<P>,
    metrics: ListenerMetrics,
    health: Option<HealthState>,
    _marker: PhantomData<J>,
}

impl<J: Job, P: Processor<J> + 'static> QueueListener<J, P> {
    pub fn new(config: ListenerConfig, processor: P) -> Self {
        let metrics = ListenerMetrics::new(&config.queue, processor.name());
        Self {
            config,
            processor: Arc::new(processor),
            metrics,
            health: None,
            _marker: PhantomData,
        }
    }

    /// Report connection state to the health endpoints.
    pub fn with_health(mut self, health: HealthState) -> Self {
        self.health = Some(health);
        self
    }

    pub fn config(&self) -> &ListenerConfig {
        &self.config
    }

    /// Subscribe and process deliveries until shutdown.
    ///
    /// Connection failures are retried forever with a fixed delay; a lost
    /// connection re-runs the whole subscribe sequence. Channel-level
    /// errors on a live connection are returned.
    pub async fn subscribe(&self, shutdown_rx: watch::Receiver<bool>) -> Result<(), BrokerError> {
        info!(
            queue = %self.config.queue,
            prefetch = PREFETCH,
            processor = self.processor.name(),
            "Starting queue listener"
        );

        self.refresh_processor_health().await;

        let settings = Supervision {
            uri: &self.config.uri,
            retry_delay: self.config.retry_delay,
            health: self.health.as_ref(),
        };

        let result = supervise(
            settings,
            shutdown_rx,
            move || self.metrics.reconnected(),
            move || {
                connect_with_retry(
                    &self.config.uri,
                    &self.config.service,
                    self.config.retry_delay,
                )
            },
            move |connection, rx| self.consume(connection, rx),
        )
        .await;

        match &result {
            Ok(()) => info!(queue = %self.config.queue, "Queue listener stopped"),
            Err(e) => error!(queue = %self.config.queue, error = %e, "Queue listener failed"),
        }
        result
    }

    async fn consume(
        &self,
        connection: Connection,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> Result<SessionEnd, BrokerError> {
        let channel = open_channel(&connection).await?;

        channel
            .queue_declare(
                &self.config.queue,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(BrokerError::Channel)?;

        channel
            .basic_qos(PREFETCH, BasicQosOptions::default())
            .await
            .map_err(BrokerError::Channel)?;

        let consumer_tag = self.config.consumer_tag();
        let mut consumer = channel
            .basic_consume(
                &self.config.queue,
                &consumer_tag,
                BasicConsumeOptions {
                    no_ack: false,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(BrokerError::Channel)?;

        info!(
            queue = %self.config.queue,
            consumer_tag = %consumer_tag,
            "Waiting for messages"
        );

        let end = loop {
            tokio::select! {
                biased;

                _ = shutdown_requested(&mut shutdown_rx) => {
                    info!("Shutdown signal received, stopping listener");
                    break Ok(SessionEnd::Shutdown);
                }

                next = consumer.next() => match next {
                    // Shutdown is not polled while a job runs, so a taken
                    // delivery is always settled.
                    Some(Ok(delivery)) => {
                        self.handle_delivery(delivery).await;
                    }
                    Some(Err(e)) => {
                        break stream_ended(connection.status().connected(), Some(e));
                    }
                    None => break stream_ended(connection.status().connected(), None),
                }
            }
        };

        if matches!(end, Ok(SessionEnd::Shutdown)) {
            if let Err(e) = channel.close(200, "listener shutting down").await {
                debug!(error = %e, "Error while closing channel");
            }
        }
        close_quietly(&connection, "listener stopped").await;

        end
    }

    /// Decode, process and settle one delivery.
    ///
    /// The job runs in its own task; awaiting its handle is the completion
    /// point. A panic counts as a failure.
    pub async fn handle_delivery<D: InboundDelivery>(&self, delivery: D) -> Settlement {
        self.metrics.delivery_received();
        let delivery_tag = delivery.delivery_tag();

        if delivery.redelivered() {
            debug!(delivery_tag = delivery_tag, "Processing redelivered message");
        }

        let job: J = match serde_json::from_slice(delivery.payload()) {
            Ok(job) => job,
            Err(e) => {
                let error = ProcessingError::from(e);
                error!(
                    delivery_tag = delivery_tag,
                    error = %error,
                    "Rejecting message that is not a valid job"
                );
                self.metrics.job_rejected(error.category().as_str());
                self.settle(delivery, Settlement::Discard).await;
                return Settlement::Discard;
            }
        };

        let job_id = job.job_id();
        debug!(job_id = %job_id, job_type = job.job_type(), "Processing job");

        let start = Instant::now();
        let processor = self.processor.clone();
        let handle = tokio::spawn(async move { processor.process(job).await });

        let result = match handle.await {
            Ok(result) => result,
            Err(join_error) => {
                error!(job_id = %job_id, error = %join_error, "Task panicked");
                Err(ProcessingError::Panicked(join_error.to_string()))
            }
        };
        let duration = start.elapsed();

        let settlement = Settlement::for_result(&result);
        match &result {
            Ok(output) => {
                self.metrics.job_acked(duration);
                info!(
                    job_id = %job_id,
                    duration_ms = duration.as_millis() as u64,
                    output = ?output,
                    "Job processed successfully"
                );
            }
            Err(e) => {
                self.metrics.job_rejected(e.category().as_str());
                warn!(
                    job_id = %job_id,
                    error = %e,
                    category = %e.category(),
                    duration_ms = duration.as_millis() as u64,
                    "Job failed, rejecting without requeue"
                );
            }
        }

        self.settle(delivery, settlement).await;
        self.refresh_processor_health().await;
        settlement
    }

    /// Ask the processor whether it can still take work and publish the
    /// answer to the liveness probe.
    async fn refresh_processor_health(&self) {
        let Some(health) = &self.health else {
            return;
        };

        let healthy = match self.processor.health_check().await {
            Ok(true) => true,
            Ok(false) => {
                warn!(processor = self.processor.name(), "Processor reports unhealthy");
                false
            }
            Err(e) => {
                warn!(
                    processor = self.processor.name(),
                    error = %e,
                    "Processor health check failed"
                );
                health.set_error(Some(e.to_string())).await;
                false
            }
        };
        health.set_processor_healthy(healthy).await;
    }

    async fn settle<D: InboundDelivery>(&self, delivery: D, settlement: Settlement) {
        let delivery_tag = delivery.delivery_tag();
        // A failed settle leaves the message unacked; the broker redelivers
        // it once the channel is gone.
        if let Err(e) = settlement.apply(delivery).await {
            error!(
                delivery_tag = delivery_tag,
                settlement = settlement.as_str(),
                error = %e,
                "Failed to settle delivery"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amqp::delivery::tests::RecordingDelivery;
    use crate::job::tests::TestJob;
    use crate::{FailingProcessor, NoOpProcessor};
    use async_trait::async_trait;
    use std::sync::Mutex;

    fn config() -> ListenerConfig {
        ListenerConfig::new(&AmqpConfig::new("amqp://localhost:5672"), "jobs")
            .with_service("test-worker")
    }

    fn payload(job: &TestJob) -> Vec<u8> {
        serde_json::to_vec(job).unwrap()
    }

    /// Records every job it sees.
    #[derive(Default)]
    struct CollectingProcessor {
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Processor<TestJob> for CollectingProcessor {
        type Output = usize;

        async fn process(&self, job: TestJob) -> Result<usize, ProcessingError> {
            let mut seen = self.seen.lock().unwrap();
            seen.push(job.id);
            Ok(seen.len())
        }

        fn name(&self) -> &'static str {
            "collecting_processor"
        }
    }

    #[test]
    fn test_listener_config_from_amqp_config() {
        let amqp = AmqpConfig::new("rabbit").with_retry_delay(Duration::from_millis(250));
        let config = ListenerConfig::new(&amqp, "conversions").with_service("bcf-converter");

        assert_eq!(config.uri, "amqp://rabbit");
        assert_eq!(config.queue, "conversions");
        assert_eq!(config.retry_delay, Duration::from_millis(250));
        assert_eq!(config.service, "bcf-converter");
        // one unacked delivery at a time keeps jobs in queue order
        assert_eq!(PREFETCH, 1);
    }

    #[test]
    fn test_consumer_tag_is_unique_per_call() {
        let config = config();
        let first = config.consumer_tag();
        let second = config.consumer_tag();

        assert!(first.starts_with("test-worker-"));
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn test_successful_job_is_acked() {
        let listener = QueueListener::<TestJob, _>::new(config(), CollectingProcessor::default());
        let (delivery, settled) = RecordingDelivery::new(payload(&TestJob::new("job-1", "a")));

        let settlement = listener.handle_delivery(delivery).await;

        assert_eq!(settlement, Settlement::Ack);
        assert_eq!(*settled.lock().unwrap(), vec![Settlement::Ack]);
        assert_eq!(*listener.processor.seen.lock().unwrap(), vec!["job-1"]);
    }

    #[tokio::test]
    async fn test_failed_job_is_discarded() {
        let listener =
            QueueListener::<TestJob, _>::new(config(), FailingProcessor::new("converter failed"));
        let (delivery, settled) = RecordingDelivery::new(payload(&TestJob::new("job-1", "a")));

        let settlement = listener.handle_delivery(delivery).await;

        assert_eq!(settlement, Settlement::Discard);
        assert_eq!(*settled.lock().unwrap(), vec![Settlement::Discard]);
    }

    #[tokio::test]
    async fn test_panicking_job_is_discarded() {
        let listener =
            QueueListener::<TestJob, _>::new(config(), FailingProcessor::panicking("boom"));
        let (delivery, settled) = RecordingDelivery::new(payload(&TestJob::new("job-1", "a")));

        let settlement = listener.handle_delivery(delivery).await;

        assert_eq!(settlement, Settlement::Discard);
        assert_eq!(*settled.lock().unwrap(), vec![Settlement::Discard]);
    }

    #[tokio::test]
    async fn test_malformed_payload_is_discarded_without_processing() {
        let listener = QueueListener::<TestJob, _>::new(config(), CollectingProcessor::default());
        let (delivery, settled) = RecordingDelivery::new(b"{\"id\": 42".to_vec());

        let settlement = listener.handle_delivery(delivery).await;

        assert_eq!(settlement, Settlement::Discard);
        assert_eq!(*settled.lock().unwrap(), vec![Settlement::Discard]);
        assert!(listener.processor.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_each_delivery_settled_exactly_once() {
        let listener = QueueListener::<TestJob, _>::new(config(), NoOpProcessor);

        for i in 0..3 {
            let job = TestJob::new(&format!("job-{i}"), "a");
            let (delivery, settled) = RecordingDelivery::new(payload(&job));
            listener.handle_delivery(delivery).await;
            assert_eq!(settled.lock().unwrap().len(), 1);
        }
    }

    /// Healthy until it has processed `budget` jobs.
    struct WearingProcessor {
        budget: usize,
        processed: Mutex<usize>,
    }

    #[async_trait]
    impl Processor<TestJob> for WearingProcessor {
        type Output = ();

        async fn process(&self, _job: TestJob) -> Result<(), ProcessingError> {
            *self.processed.lock().unwrap() += 1;
            Ok(())
        }

        fn name(&self) -> &'static str {
            "wearing_processor"
        }

        async fn health_check(&self) -> Result<bool, ProcessingError> {
            if *self.processed.lock().unwrap() < self.budget {
                Ok(true)
            } else {
                Err(ProcessingError::failed("scratch space exhausted"))
            }
        }
    }

    #[tokio::test]
    async fn test_processor_health_feeds_liveness() {
        let health = HealthState::new();
        let listener = QueueListener::<TestJob, _>::new(
            config(),
            WearingProcessor {
                budget: 2,
                processed: Mutex::new(0),
            },
        )
        .with_health(health.clone());

        let (delivery, _) = RecordingDelivery::new(payload(&TestJob::new("job-1", "a")));
        listener.handle_delivery(delivery).await;
        assert!(health.is_alive().await);

        let (delivery, _) = RecordingDelivery::new(payload(&TestJob::new("job-2", "a")));
        listener.handle_delivery(delivery).await;

        assert!(!health.is_alive().await);
        let status = health.status().await;
        assert!(!status.processor_healthy);
        assert!(status.last_error.unwrap().contains("scratch space exhausted"));
    }

    #[tokio::test]
    async fn test_subscribe_returns_on_shutdown_before_connect() {
        let listener = QueueListener::<TestJob, _>::new(
            ListenerConfig {
                uri: "amqp://127.0.0.1:1".to_string(),
                retry_delay: Duration::from_millis(10),
                ..config()
            },
            NoOpProcessor,
        );
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(async move { listener.subscribe(rx).await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(true).unwrap();

        let result = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("listener should stop")
            .unwrap();
        assert!(result.is_ok());
    }
}
