//! Prometheus metrics for listeners and senders.

use metrics::{counter, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Metrics for a queue or fanout listener.
#[derive(Clone)]
pub struct ListenerMetrics {
    queue: String,
    processor_name: String,
}

impl ListenerMetrics {
    pub fn new(queue: &str, processor_name: &str) -> Self {
        Self {
            queue: queue.to_string(),
            processor_name: processor_name.to_string(),
        }
    }

    /// Record a delivery taken from the broker.
    pub fn delivery_received(&self) {
        counter!(
            "amqp_listener_deliveries_total",
            "queue" => self.queue.clone(),
            "processor" => self.processor_name.clone()
        )
        .increment(1);
    }

    /// Record a job acknowledged after success.
    pub fn job_acked(&self, duration: Duration) {
        counter!(
            "amqp_listener_acked_total",
            "queue" => self.queue.clone(),
            "processor" => self.processor_name.clone()
        )
        .increment(1);

        histogram!(
            "amqp_listener_job_duration_seconds",
            "queue" => self.queue.clone(),
            "processor" => self.processor_name.clone()
        )
        .record(duration.as_secs_f64());
    }

    /// Record a rejected delivery.
    pub fn job_rejected(&self, error_category: &str) {
        counter!(
            "amqp_listener_rejected_total",
            "queue" => self.queue.clone(),
            "processor" => self.processor_name.clone(),
            "category" => error_category.to_string()
        )
        .increment(1);
    }

    /// Record a full resubscribe after connection loss.
    pub fn reconnected(&self) {
        counter!(
            "amqp_listener_reconnects_total",
            "queue" => self.queue.clone()
        )
        .increment(1);
    }
}

/// Record a message handed to the broker.
pub fn message_published(target: &str) {
    counter!("amqp_sender_published_total", "target" => target.to_string()).increment(1);
}

/// Record a message that could not be published and was dropped.
pub fn message_dropped(target: &str) {
    counter!("amqp_sender_dropped_total", "target" => target.to_string()).increment(1);
}

/// Install the Prometheus recorder and return the render handle.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new().install_recorder()
}
