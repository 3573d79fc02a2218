//! Broadcast consumer for status observation.

use crate::amqp::connection::{
    close_quietly, connect_with_retry, open_channel, shutdown_requested, stream_ended, supervise,
    SessionEnd, Supervision,
};
use crate::amqp::error::BrokerError;
use crate::amqp::metrics::ListenerMetrics;
use crate::{Job, ProcessingError, Processor};
use core_config::AmqpConfig;
use futures::StreamExt;
use lapin::options::{
    BasicConsumeOptions, ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{Connection, ExchangeKind};
use std::marker::PhantomData;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Subscribes to a fanout exchange through a private, auto-deleted queue.
///
/// Messages are auto-acknowledged: a lost broadcast is acceptable, so the
/// processor result is only logged.
pub struct FanoutListener<J: Job, P: Processor<J>> {
    uri: String,
    exchange: String,
    retry_delay: Duration,
    service: String,
    processor: P,
    metrics: ListenerMetrics,
    _marker: PhantomData<J>,
}

impl<J: Job, P: Processor<J>> FanoutListener<J, P> {
    pub fn new(amqp: &AmqpConfig, exchange: impl Into<String>, processor: P) -> Self {
        let exchange = exchange.into();
        let metrics = ListenerMetrics::new(&exchange, processor.name());
        Self {
            uri: amqp.uri.clone(),
            exchange,
            retry_delay: amqp.retry_delay,
            service: "observer".to_string(),
            processor,
            metrics,
            _marker: PhantomData,
        }
    }

    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.service = service.into();
        self
    }

    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    /// Subscribe and handle broadcasts until shutdown, reconnecting forever.
    pub async fn subscribe(&self, shutdown_rx: watch::Receiver<bool>) -> Result<(), BrokerError> {
        info!(exchange = %self.exchange, "Starting fanout listener");

        let settings = Supervision {
            uri: &self.uri,
            retry_delay: self.retry_delay,
            health: None,
        };

        supervise(
            settings,
            shutdown_rx,
            move || self.metrics.reconnected(),
            move || connect_with_retry(&self.uri, &self.service, self.retry_delay),
            move |connection, rx| self.consume(connection, rx),
        )
        .await
    }

    async fn consume(
        &self,
        connection: Connection,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> Result<SessionEnd, BrokerError> {
        let channel = open_channel(&connection).await?;

        channel
            .exchange_declare(
                &self.exchange,
                ExchangeKind::Fanout,
                ExchangeDeclareOptions {
                    durable: false,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(BrokerError::Channel)?;

        let queue = channel
            .queue_declare(
                "",
                QueueDeclareOptions {
                    exclusive: true,
                    auto_delete: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(BrokerError::Channel)?;

        channel
            .queue_bind(
                queue.name().as_str(),
                &self.exchange,
                "",
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(BrokerError::Channel)?;

        let consumer_tag = format!("{}-{}", self.service, uuid::Uuid::new_v4());
        let mut consumer = channel
            .basic_consume(
                queue.name().as_str(),
                &consumer_tag,
                BasicConsumeOptions {
                    no_ack: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(BrokerError::Channel)?;

        info!(
            exchange = %self.exchange,
            queue = %queue.name().as_str(),
            "Waiting for broadcasts"
        );

        let end = loop {
            tokio::select! {
                biased;

                _ = shutdown_requested(&mut shutdown_rx) => break Ok(SessionEnd::Shutdown),

                next = consumer.next() => match next {
                    Some(Ok(delivery)) => {
                        let _ = self.handle_payload(&delivery.data).await;
                    }
                    Some(Err(e)) => {
                        break stream_ended(connection.status().connected(), Some(e));
                    }
                    None => break stream_ended(connection.status().connected(), None),
                }
            }
        };

        close_quietly(&connection, "fanout listener stopped").await;
        end
    }

    /// Decode and process one broadcast; failures are logged and dropped.
    pub async fn handle_payload(&self, payload: &[u8]) -> Result<P::Output, ProcessingError> {
        self.metrics.delivery_received();

        let result = match serde_json::from_slice::<J>(payload) {
            Ok(job) => self.processor.process(job).await,
            Err(e) => Err(ProcessingError::from(e)),
        };

        match &result {
            Ok(output) => debug!(exchange = %self.exchange, output = ?output, "Broadcast handled"),
            Err(e) => {
                self.metrics.job_rejected(e.category().as_str());
                warn!(exchange = %self.exchange, error = %e, "Dropping broadcast");
            }
        }
        result
    }
}
