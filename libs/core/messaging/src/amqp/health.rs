//! Health endpoints for K8s probes.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::RwLock;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Health status of the worker.
#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub status: String,
    pub broker_connected: bool,
    pub processor_healthy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Shared health state.
#[derive(Clone)]
pub struct HealthState {
    inner: Arc<RwLock<HealthStateInner>>,
}

struct HealthStateInner {
    broker_connected: bool,
    processor_healthy: bool,
    last_error: Option<String>,
}

impl HealthState {
    /// Starts disconnected; the listener flips it once subscribed.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(HealthStateInner {
                broker_connected: false,
                processor_healthy: true,
                last_error: None,
            })),
        }
    }

    pub async fn set_broker_connected(&self, connected: bool) {
        let mut inner = self.inner.write().await;
        inner.broker_connected = connected;
    }

    pub async fn set_processor_healthy(&self, healthy: bool) {
        let mut inner = self.inner.write().await;
        inner.processor_healthy = healthy;
    }

    pub async fn set_error(&self, error: Option<String>) {
        let mut inner = self.inner.write().await;
        inner.last_error = error;
    }

    /// Liveness only looks at the processor.
    ///
    /// A broker outage is retried in-process and must not restart the pod.
    pub async fn is_alive(&self) -> bool {
        let inner = self.inner.read().await;
        inner.processor_healthy
    }

    /// Check if ready to take work (for readiness).
    pub async fn is_ready(&self) -> bool {
        let inner = self.inner.read().await;
        inner.broker_connected && inner.processor_healthy
    }

    pub async fn status(&self) -> HealthStatus {
        let inner = self.inner.read().await;
        let status = if inner.broker_connected && inner.processor_healthy {
            "healthy".to_string()
        } else {
            format!(
                "unhealthy: {}",
                inner.last_error.as_deref().unwrap_or("broker not connected")
            )
        };

        HealthStatus {
            status,
            broker_connected: inner.broker_connected,
            processor_healthy: inner.processor_healthy,
            last_error: inner.last_error.clone(),
        }
    }
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

/// Health server for K8s probes.
pub struct HealthServer {
    port: u16,
    state: HealthState,
    metrics_handle: Option<PrometheusHandle>,
}

impl HealthServer {
    pub fn new(port: u16) -> Self {
        Self {
            port,
            state: HealthState::new(),
            metrics_handle: None,
        }
    }

    /// Set the metrics handle for /metrics endpoint.
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics_handle = Some(handle);
        self
    }

    /// Get the health state for updates.
    pub fn state(&self) -> HealthState {
        self.state.clone()
    }

    pub fn router(&self) -> Router {
        let state = self.state.clone();
        let metrics_handle = self.metrics_handle.clone();

        let mut router = Router::new()
            .route("/health", get(health_handler))
            .route("/healthz", get(health_handler))
            .route("/ready", get(ready_handler))
            .route("/readyz", get(ready_handler))
            .with_state(state);

        if let Some(handle) = metrics_handle {
            router = router.route(
                "/metrics",
                get(move || {
                    let handle = handle.clone();
                    async move { handle.render() }
                }),
            );
        }

        router.layer(TraceLayer::new_for_http())
    }

    pub async fn run(self) -> Result<(), std::io::Error> {
        let router = self.router();
        let addr = format!("0.0.0.0:{}", self.port);

        info!(addr = %addr, "Starting health server");

        let listener = tokio::net::TcpListener::bind(&addr).await?;
        axum::serve(listener, router).await?;

        Ok(())
    }
}

/// Liveness probe handler.
async fn health_handler(State(state): State<HealthState>) -> impl IntoResponse {
    let status = state.status().await;
    if state.is_alive().await {
        (StatusCode::OK, Json(status))
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(status))
    }
}

/// Readiness probe handler.
async fn ready_handler(State(state): State<HealthState>) -> impl IntoResponse {
    let status = state.status().await;
    if state.is_ready().await {
        (StatusCode::OK, Json(status))
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(status))
    }
}
