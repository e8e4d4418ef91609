//! End-to-end tests. All but the unreachable-broker case need a live
//! RabbitMQ broker and are ignored by default. Run them with a broker
//! reachable through the usual variables, e.g.
//! `RABBITMQ_HOST=localhost cargo test -- --ignored`.

use lapin::options::{QueueDeleteOptions, QueueDeclareOptions};
use lapin::types::FieldTable;
use rabbit_worker::config::consumer::ConsumerSettings;
use rabbit_worker::config::rabbit::RabbitMQConfig;
use rabbit_worker::error::Error;
use rabbit_worker::handler::PrintHandler;
use rabbit_worker::rabbitmq::{ConnectionManager, RabbitMQProducer, queue};
use rabbit_worker::shutdown::ShutdownCoordinator;
use rabbit_worker::worker;
use serial_test::serial;
use std::io::{self, Write};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Clone, Default)]
struct SharedOutput(Arc<Mutex<Vec<u8>>>);

impl SharedOutput {
    fn lines(&self) -> Vec<String> {
        String::from_utf8(self.0.lock().unwrap().clone())
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }
}

impl Write for SharedOutput {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn config_for(queue_name: &str) -> RabbitMQConfig {
    RabbitMQConfig {
        queue_name: queue_name.to_string(),
        ..RabbitMQConfig::from_env()
    }
}

fn unique(prefix: &str) -> String {
    format!("{}-{}", prefix, uuid::Uuid::new_v4())
}

async fn publish_all(queue_name: &str, bodies: &[&str]) {
    let producer = RabbitMQProducer::connect(config_for(queue_name))
        .await
        .expect("producer connects");
    for body in bodies {
        producer.publish(body.as_bytes()).await.expect("publish");
    }
    producer.close().await;
}

async fn delete_queue(queue_name: &str) {
    let session = ConnectionManager::new(config_for(queue_name))
        .open()
        .await
        .expect("connect for cleanup");
    let _ = session
        .channel()
        .queue_delete(queue_name, QueueDeleteOptions::default())
        .await;
    session.close().await;
}

async fn wait_for_lines(output: &SharedOutput, count: usize) -> Vec<String> {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let lines = output.lines();
            if lines.len() >= count {
                return lines;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await
    .expect("messages arrive in time")
}

#[tokio::test]
#[ignore = "requires a running RabbitMQ broker"]
async fn prints_prepublished_messages_in_order_and_keeps_running() {
    let queue_name = unique("default");
    publish_all(&queue_name, &["a", "b", "c"]).await;

    let output = SharedOutput::default();
    let coordinator = ShutdownCoordinator::new();
    let handle = tokio::spawn(worker::run(
        config_for(&queue_name),
        ConsumerSettings::default(),
        Arc::new(PrintHandler::new(output.clone())),
        coordinator.clone(),
    ));

    assert_eq!(wait_for_lines(&output, 3).await, vec!["a", "b", "c"]);

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(!handle.is_finished(), "consumer must stay alive until terminated");

    coordinator.trigger();
    coordinator.wait().await;
    handle.await.unwrap().expect("graceful shutdown");

    delete_queue(&queue_name).await;
}

#[tokio::test]
#[ignore = "requires a running RabbitMQ broker"]
async fn only_sees_messages_from_its_own_queue() {
    let jobs = unique("jobs");
    let other = unique("default");
    publish_all(&other, &["not-for-jobs"]).await;
    publish_all(&jobs, &["x"]).await;

    let output = SharedOutput::default();
    let coordinator = ShutdownCoordinator::new();
    let handle = tokio::spawn(worker::run(
        config_for(&jobs),
        ConsumerSettings::default(),
        Arc::new(PrintHandler::new(output.clone())),
        coordinator.clone(),
    ));

    assert_eq!(wait_for_lines(&output, 1).await, vec!["x"]);
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(output.lines(), vec!["x"]);

    coordinator.trigger();
    handle.await.unwrap().expect("graceful shutdown");

    delete_queue(&jobs).await;
    delete_queue(&other).await;
}

#[tokio::test]
#[serial]
#[ignore = "requires a running RabbitMQ broker"]
async fn queue_is_selected_through_rabbitmq_queue_variable() {
    delete_queue("jobs").await;
    delete_queue("default").await;
    publish_all("default", &["not-for-jobs"]).await;
    publish_all("jobs", &["x"]).await;

    let config = temp_env::with_var("RABBITMQ_QUEUE", Some("jobs"), RabbitMQConfig::from_env);
    assert_eq!(config.queue_name, "jobs");

    let output = SharedOutput::default();
    let coordinator = ShutdownCoordinator::new();
    let handle = tokio::spawn(worker::run(
        config,
        ConsumerSettings::default(),
        Arc::new(PrintHandler::new(output.clone())),
        coordinator.clone(),
    ));

    assert_eq!(wait_for_lines(&output, 1).await, vec!["x"]);
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(output.lines(), vec!["x"]);

    coordinator.trigger();
    handle.await.unwrap().expect("graceful shutdown");

    delete_queue("jobs").await;
    delete_queue("default").await;
}

#[tokio::test]
#[ignore = "requires a running RabbitMQ broker"]
async fn publish_on_a_closed_channel_is_a_publish_error() {
    let queue_name = unique("publish");
    let producer = RabbitMQProducer::connect(config_for(&queue_name))
        .await
        .expect("producer connects");
    producer
        .channel()
        .close(200, "closing before publish")
        .await
        .unwrap();

    let result = producer.publish(b"late").await;
    match result {
        Err(Error::Publish { queue, .. }) => assert_eq!(queue, queue_name),
        other => panic!("expected a publish error, got {:?}", other),
    }

    producer.close().await;
    delete_queue(&queue_name).await;
}

#[tokio::test]
#[ignore = "requires a running RabbitMQ broker"]
async fn scoped_closes_the_session_when_the_body_fails() {
    let queue_name = unique("scoped");
    let manager = ConnectionManager::new(config_for(&queue_name));
    let mut signal = ShutdownCoordinator::new().signal();
    let used = Mutex::new(None);

    let result: Result<(), Error> = manager
        .scoped(&Default::default(), &mut signal, |channel| {
            *used.lock().unwrap() = Some(channel);
            async { Err(Error::Delivery("body failed".to_string())) }
        })
        .await;

    assert!(matches!(result, Err(Error::Delivery(_))));
    let channel = used.lock().unwrap().take().expect("body ran");
    assert!(!channel.status().connected());
}

#[tokio::test]
#[ignore = "requires a running RabbitMQ broker"]
async fn declaring_twice_is_idempotent() {
    let queue_name = unique("idempotent");
    let session = ConnectionManager::new(config_for(&queue_name))
        .open()
        .await
        .expect("connect");

    let first = queue::declare(session.channel(), &queue_name).await.unwrap();
    let second = queue::declare(session.channel(), &queue_name).await.unwrap();
    assert_eq!(first.name, queue_name);
    assert_eq!(first.name, second.name);

    session.close().await;
    delete_queue(&queue_name).await;
}

#[tokio::test]
#[ignore = "requires a running RabbitMQ broker"]
async fn mismatched_existing_queue_is_a_declaration_error() {
    let queue_name = unique("transient");
    let manager = ConnectionManager::new(config_for(&queue_name));

    let session = manager.open().await.expect("connect");
    session
        .channel()
        .queue_declare(
            &queue_name,
            QueueDeclareOptions {
                durable: false,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await
        .unwrap();

    let result = queue::declare(session.channel(), &queue_name).await;
    assert!(matches!(result, Err(Error::Declaration { .. })));
    session.close().await;

    delete_queue(&queue_name).await;
}

#[tokio::test]
async fn unreachable_broker_is_a_connection_error() {
    let config = RabbitMQConfig {
        host: "127.0.0.1".to_string(),
        port: "1".to_string(),
        ..RabbitMQConfig::default()
    };

    let coordinator = ShutdownCoordinator::new();
    let result = worker::run(
        config,
        ConsumerSettings::default(),
        Arc::new(PrintHandler::new(SharedOutput::default())),
        coordinator.clone(),
    )
    .await;

    assert!(matches!(result, Err(Error::Connection { .. })));
    // run() releases waiters even when it fails
    coordinator.wait().await;
}
