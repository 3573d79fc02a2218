//! Connection establishment and the reconnect loop shared by listeners.

use crate::amqp::error::BrokerError;
use crate::amqp::health::HealthState;
use lapin::{Channel, Connection, ConnectionProperties};
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Retry an async operation with a fixed delay until it succeeds.
///
/// There is no attempt limit: a worker with no broker has nothing else to do.
pub async fn retry_forever<F, Fut, T, E>(what: &str, delay: Duration, mut operation: F) -> T
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let mut attempt: u64 = 0;

    loop {
        attempt += 1;
        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    info!(target_name = %what, attempts = attempt, "Connected after retries");
                }
                return value;
            }
            Err(e) => {
                warn!(
                    target_name = %what,
                    attempt = attempt,
                    error = %e,
                    retry_in_ms = delay.as_millis() as u64,
                    "Connection attempt failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Open a single connection without retrying.
pub async fn connect(uri: &str, connection_name: &str) -> Result<Connection, BrokerError> {
    let properties =
        ConnectionProperties::default().with_connection_name(connection_name.to_string().into());

    Connection::connect(uri, properties)
        .await
        .map_err(BrokerError::Connect)
}

/// Connect, retrying every `delay` until the broker accepts.
pub async fn connect_with_retry(uri: &str, connection_name: &str, delay: Duration) -> Connection {
    let redacted = redact_uri(uri);
    retry_forever(&redacted, delay, || connect(uri, connection_name)).await
}

pub(crate) async fn open_channel(connection: &Connection) -> Result<Channel, BrokerError> {
    connection
        .create_channel()
        .await
        .map_err(BrokerError::Channel)
}

pub(crate) async fn close_quietly(connection: &Connection, reason: &str) {
    if !connection.status().connected() {
        return;
    }
    if let Err(e) = connection.close(200, reason).await {
        debug!(error = %e, "Error while closing broker connection");
    }
}

/// Strip credentials from an AMQP URI before it reaches the logs.
pub fn redact_uri(uri: &str) -> String {
    let Some(scheme_end) = uri.find("://") else {
        return uri.to_string();
    };
    let authority_start = scheme_end + 3;
    let rest = &uri[authority_start..];
    let authority_end = rest.find('/').unwrap_or(rest.len());

    match rest[..authority_end].rfind('@') {
        Some(at) => format!("{}***{}", &uri[..authority_start], &rest[at..]),
        None => uri.to_string(),
    }
}

/// Resolves once shutdown has been signalled.
///
/// A dropped sender never resolves: the worker keeps running.
pub(crate) async fn shutdown_requested(shutdown_rx: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown_rx.borrow_and_update() {
            return;
        }
        if shutdown_rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// How a consume session ended without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SessionEnd {
    Shutdown,
    ConnectionLost,
}

/// Decide what a finished consumer stream means.
///
/// A stream that ends while the connection is down is a lost connection
/// and gets a full resubscribe; with the connection still up it is a
/// channel-level failure.
pub(crate) fn stream_ended(
    still_connected: bool,
    error: Option<lapin::Error>,
) -> Result<SessionEnd, BrokerError> {
    if still_connected {
        Err(error.map(BrokerError::Channel).unwrap_or(BrokerError::Closed))
    } else {
        if let Some(e) = error {
            warn!(error = %e, "Consumer stream failed after connection loss");
        }
        Ok(SessionEnd::ConnectionLost)
    }
}

/// Settings for [`supervise`].
pub(crate) struct Supervision<'a> {
    /// Only used for logging, redacted
    pub uri: &'a str,
    pub retry_delay: Duration,
    pub health: Option<&'a HealthState>,
}

/// Run `session` on a fresh connection until shutdown, re-running the
/// whole subscribe sequence whenever the connection drops.
///
/// `connect` must only resolve once connected; listeners pass
/// [`connect_with_retry`].
pub(crate) async fn supervise<C, Connect, ConnectFut, F, Fut>(
    settings: Supervision<'_>,
    mut shutdown_rx: watch::Receiver<bool>,
    mut on_reconnect: impl FnMut(),
    mut connect: Connect,
    mut session: F,
) -> Result<(), BrokerError>
where
    Connect: FnMut() -> ConnectFut,
    ConnectFut: Future<Output = C>,
    F: FnMut(C, watch::Receiver<bool>) -> Fut,
    Fut: Future<Output = Result<SessionEnd, BrokerError>>,
{
    loop {
        if *shutdown_rx.borrow() {
            return Ok(());
        }

        let connection = tokio::select! {
            connection = connect() => connection,
            _ = shutdown_requested(&mut shutdown_rx) => return Ok(()),
        };

        if let Some(health) = settings.health {
            health.set_broker_connected(true).await;
            health.set_error(None).await;
        }

        let outcome = session(connection, shutdown_rx.clone()).await;

        match outcome {
            Ok(SessionEnd::Shutdown) => return Ok(()),
            Ok(SessionEnd::ConnectionLost) => {
                warn!(
                    broker = %redact_uri(settings.uri),
                    retry_in_ms = settings.retry_delay.as_millis() as u64,
                    "Broker connection lost, resubscribing"
                );
                if let Some(health) = settings.health {
                    health.set_broker_connected(false).await;
                    health
                        .set_error(Some("broker connection lost".to_string()))
                        .await;
                }
                on_reconnect();

                tokio::select! {
                    _ = tokio::time::sleep(settings.retry_delay) => {}
                    _ = shutdown_requested(&mut shutdown_rx) => return Ok(()),
                }
            }
            Err(e) => {
                if let Some(health) = settings.health {
                    health.set_broker_connected(false).await;
                    health.set_error(Some(e.to_string())).await;
                }
                return Err(e);
            }
        }
    }
}
