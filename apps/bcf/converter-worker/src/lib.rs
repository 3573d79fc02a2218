//! BCF Converter Worker Service
//!
//! A background worker that converts BCF archives referenced by RabbitMQ
//! job messages into JSON artifacts.
//!
//! ## Architecture
//!
//! ```text
//! RabbitMQ queue (RABBIT_MQ_QUEUE_BCF_CONVERTER)
//!   ↓ (manual ack, prefetch 1)
//! QueueListener<JobMessage, ConversionWorker>
//!   ↓ (download from S3 when the input is remote)
//! sh convert.sh <input> <output>
//!   ↓
//! Status topic (<routing key>.succeeded | .failed)
//!   ├─ optional fanout broadcast
//!   └─ optional downstream queue
//! ```
//!
//! ## Features
//!
//! - Reconnects to the broker forever with a fixed delay
//! - Malformed and failed jobs are discarded, never redelivered
//! - Graceful shutdown on SIGINT / SIGTERM
//! - Health check and Prometheus endpoints for Kubernetes probes

pub mod config;
pub mod monitor;

use config::{MonitorConfig, WorkerConfig};
use core_config::{Environment, FromEnv};
use domain_conversion::{ConversionWorker, JobMessage, S3ObjectStore};
use eyre::{Result, WrapErr};
use messaging::amqp::{
    init_metrics, AmqpTransport, FanoutListener, HealthServer, ListenerConfig, QueueListener,
    Transport,
};
use monitor::StatusLogger;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};

/// Run the converter worker
///
/// 1. Sets up color-eyre and structured logging
/// 2. Loads broker, storage and worker configuration
/// 3. Starts the health server
/// 4. Consumes the work queue until a shutdown signal arrives
///
/// # Errors
///
/// Returns an error if configuration is invalid, the metrics recorder
/// cannot be installed, or the listener hits a non-recoverable broker error.
pub async fn run() -> Result<()> {
    core_config::tracing::install_color_eyre();
    let environment = Environment::from_env();
    core_config::tracing::init_tracing(&environment);

    let metrics_handle = init_metrics().wrap_err("Failed to install Prometheus recorder")?;

    info!(
        name = env!("CARGO_PKG_NAME"),
        version = env!("CARGO_PKG_VERSION"),
        "Starting BCF converter worker"
    );

    let config = WorkerConfig::from_env().wrap_err("Failed to load worker configuration")?;
    let settings = &config.settings;
    info!(
        queue = %config.queue,
        status_topic = %settings.status_topic,
        status_routing_key = %settings.status_routing_key,
        downstream_queue = ?settings.downstream_queue,
        status_broadcast = ?settings.status_broadcast,
        converter = %config.converter.program(),
        policy = ?config.converter.policy(),
        "Worker configuration loaded"
    );

    let store = S3ObjectStore::from_config(&config.storage).await;
    let transport: Arc<dyn Transport> = Arc::new(
        AmqpTransport::new(&config.amqp)
            .with_connection_name(format!("{}-sender", settings.service_name)),
    );
    let worker = ConversionWorker::new(
        config.settings.clone(),
        store,
        config.converter.clone(),
        transport,
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown signal received, stopping listener");
        let _ = shutdown_tx.send(true);
    });

    let health_server = HealthServer::new(config.health_port).with_metrics(metrics_handle);
    let health_state = health_server.state();
    tokio::spawn(async move {
        if let Err(e) = health_server.run().await {
            error!(error = %e, "Health server failed");
        }
    });

    let listener = QueueListener::<JobMessage, _>::new(
        ListenerConfig::new(&config.amqp, &config.queue).with_service(&config.settings.service_name),
        worker,
    )
    .with_health(health_state);

    listener
        .subscribe(shutdown_rx)
        .await
        .wrap_err("Queue listener stopped")?;

    info!("BCF converter worker shut down gracefully");
    Ok(())
}

/// Run the status monitor
///
/// Subscribes to the status broadcast exchange and logs every job status
/// the converter workers publish.
pub async fn run_status_monitor() -> Result<()> {
    core_config::tracing::install_color_eyre();
    let environment = Environment::from_env();
    core_config::tracing::init_tracing(&environment);

    let config = MonitorConfig::from_env().wrap_err("Failed to load monitor configuration")?;
    info!(exchange = %config.exchange, "Starting BCF status monitor");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    let listener = FanoutListener::<JobMessage, _>::new(&config.amqp, &config.exchange, StatusLogger)
        .with_service(&config.service_name);

    listener
        .subscribe(shutdown_rx)
        .await
        .wrap_err("Status listener stopped")?;

    info!("BCF status monitor shut down gracefully");
    Ok(())
}

/// Wait for SIGINT (Ctrl+C) or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
