//! Broker-backed tests. They need Docker: `cargo test -p messaging -- --ignored`.

use async_trait::async_trait;
use core_config::AmqpConfig;
use lapin::options::{BasicGetOptions, QueueDeclareOptions};
use lapin::types::FieldTable;
use messaging::amqp::{
    AmqpTransport, FanoutListener, ListenerConfig, QueueListener, QueueSender, TopicBroadcaster,
    Transport,
};
use messaging::{Job, ProcessingError, Processor};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use test_utils::assertions::{assert_some, assert_str_field};
use test_utils::{TestDataBuilder, TestRabbitMq};
use tokio::sync::{mpsc, watch};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Scope {
    project: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Ping {
    id: String,
    #[serde(default)]
    context: Scope,
    fail: bool,
}

impl Job for Ping {
    type Context = Scope;

    fn job_id(&self) -> String {
        self.id.clone()
    }

    fn context(&self) -> &Scope {
        &self.context
    }

    fn set_context(&mut self, context: Scope) {
        self.context = context;
    }
}

/// Forwards every job it sees and fails the ones flagged `fail`.
struct Forwarding {
    tx: mpsc::UnboundedSender<Ping>,
}

#[async_trait]
impl Processor<Ping> for Forwarding {
    type Output = ();

    async fn process(&self, job: Ping) -> Result<(), ProcessingError> {
        let fail = job.fail;
        let _ = self.tx.send(job);
        if fail {
            Err(ProcessingError::failed("flagged"))
        } else {
            Ok(())
        }
    }

    fn name(&self) -> &'static str {
        "forwarding"
    }
}

fn amqp(rabbit: &TestRabbitMq) -> AmqpConfig {
    AmqpConfig::new(rabbit.uri())
        .with_retry_delay(Duration::from_millis(200))
        .with_close_grace(Duration::from_millis(50))
}

fn ping(id: &str, fail: bool) -> Ping {
    Ping {
        id: id.to_string(),
        context: Scope::default(),
        fail,
    }
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_sender_to_listener_acks_and_discards() {
    let rabbit = TestRabbitMq::new().await;
    let builder = TestDataBuilder::from_test_name("test_sender_to_listener_acks_and_discards");
    let queue = builder.queue("jobs");
    let config = amqp(&rabbit);

    let transport: Arc<dyn Transport> = Arc::new(AmqpTransport::new(&config));
    let sender = QueueSender::<Ping>::new(
        transport,
        queue.clone(),
        Scope {
            project: Some(builder.project_id()),
        },
    );
    assert!(sender.send(ping("ok-1", false)).await);
    assert!(sender.send(ping("bad-1", true)).await);

    let (tx, mut rx) = mpsc::unbounded_channel();
    let listener = QueueListener::new(
        ListenerConfig::new(&config, queue.clone()).with_service("it"),
        Forwarding { tx },
    );
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(async move { listener.subscribe(shutdown_rx).await });

    let first = tokio::time::timeout(Duration::from_secs(10), rx.recv())
        .await
        .expect("first job")
        .expect("channel open");
    let second = tokio::time::timeout(Duration::from_secs(10), rx.recv())
        .await
        .expect("second job")
        .expect("channel open");

    // prefetch 1 keeps queue order
    assert_str_field(&first.id, "ok-1", "first delivery");
    assert_str_field(&second.id, "bad-1", "second delivery");
    assert_eq!(
        assert_some(first.context.project.clone(), "stamped context"),
        builder.project_id()
    );

    // let the second settle before shutting down
    tokio::time::sleep(Duration::from_millis(300)).await;
    shutdown_tx.send(true).unwrap();
    handle.await.unwrap().unwrap();

    // neither the acked nor the rejected job is left on the queue
    let connection = rabbit.connection().await;
    let channel = connection.create_channel().await.unwrap();
    let state = channel
        .queue_declare(
            &queue,
            QueueDeclareOptions {
                durable: true,
                passive: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await
        .unwrap();
    assert_eq!(state.message_count(), 0);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_send_to_topic_routes_by_key() {
    let rabbit = TestRabbitMq::new().await;
    let builder = TestDataBuilder::from_test_name("test_send_to_topic_routes_by_key");
    let exchange = builder.name("status", "topic");
    let queue = builder.queue("succeeded");
    let config = amqp(&rabbit);

    let connection = rabbit.connection().await;
    let channel = connection.create_channel().await.unwrap();
    channel
        .exchange_declare(
            &exchange,
            lapin::ExchangeKind::Topic,
            lapin::options::ExchangeDeclareOptions {
                durable: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await
        .unwrap();
    channel
        .queue_declare(&queue, QueueDeclareOptions::default(), FieldTable::default())
        .await
        .unwrap();
    channel
        .queue_bind(
            &queue,
            &exchange,
            "bcf.*.succeeded",
            lapin::options::QueueBindOptions::default(),
            FieldTable::default(),
        )
        .await
        .unwrap();

    let sender = QueueSender::<Ping>::new(
        Arc::new(AmqpTransport::new(&config)),
        "unused",
        Scope::default(),
    );
    assert!(
        sender
            .send_to(&exchange, "bcf.converter.succeeded", ping("t-1", false))
            .await
    );
    assert!(
        sender
            .send_to(&exchange, "bcf.converter.failed", ping("t-2", true))
            .await
    );

    let message = channel
        .basic_get(&queue, BasicGetOptions { no_ack: true })
        .await
        .unwrap()
        .expect("routed message");
    let received: Ping = serde_json::from_slice(&message.delivery.data).unwrap();
    assert_eq!(received.id, "t-1");

    let nothing_else = channel
        .basic_get(&queue, BasicGetOptions { no_ack: true })
        .await
        .unwrap();
    assert!(nothing_else.is_none());
}

/// Collects broadcasts for the fanout test.
struct Collect {
    tx: mpsc::UnboundedSender<Ping>,
}

#[async_trait]
impl Processor<Ping> for Collect {
    type Output = ();

    async fn process(&self, job: Ping) -> Result<(), ProcessingError> {
        let _ = self.tx.send(job);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "collect"
    }
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_broadcast_reaches_fanout_listener() {
    let rabbit = TestRabbitMq::new().await;
    let builder = TestDataBuilder::from_test_name("test_broadcast_reaches_fanout_listener");
    let exchange = builder.name("events", "fanout");
    let config = amqp(&rabbit);

    let (tx, mut rx) = mpsc::unbounded_channel();
    let listener = FanoutListener::new(&config, exchange.clone(), Collect { tx });
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(async move { listener.subscribe(shutdown_rx).await });

    // the private queue only exists once the listener is bound
    tokio::time::sleep(Duration::from_secs(1)).await;

    let broadcaster = TopicBroadcaster::<Ping>::new(
        Arc::new(AmqpTransport::new(&config)),
        exchange,
        "it-service",
        Scope::default(),
    );
    assert!(broadcaster.send(ping("b-1", false)).await);

    let received = tokio::time::timeout(Duration::from_secs(10), rx.recv())
        .await
        .expect("broadcast")
        .expect("channel open");
    assert_eq!(received.id, "b-1");

    shutdown_tx.send(true).unwrap();
    handle.await.unwrap().unwrap();
}
