use async_trait::async_trait;
use faultline_core::error::{FaultError, FaultResult};
use faultline_core::lifecycle::{
    BrokerMessage, BrokerReader, BrokerWriter, ChannelBroker, Collaborators, InfraContainer, Resource,
    ResourceFactory,
};
use faultline_core::telemetry::{MemoryTelemetry, TelemetrySink};
use faultline_core::FaultlineConfig;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// Hands out one pre-built telemetry sink.
struct SharedSink(Arc<MemoryTelemetry>);

#[async_trait]
impl ResourceFactory<dyn TelemetrySink> for SharedSink {
    async fn open(&self, _config: &FaultlineConfig) -> FaultResult<Arc<dyn TelemetrySink>> {
        Ok(self.0.clone())
    }
}

type ReleaseLog = Arc<Mutex<Vec<&'static str>>>;

/// Broker client that records when it is released.
struct RecordingClient {
    name: &'static str,
    log: ReleaseLog,
}

#[async_trait]
impl Resource for RecordingClient {
    fn name(&self) -> &str {
        self.name
    }

    async fn close(&self) -> FaultResult<()> {
        self.log.lock().push(self.name);
        Ok(())
    }
}

#[async_trait]
impl BrokerWriter for RecordingClient {
    async fn send(&self, _message: BrokerMessage) -> FaultResult<()> {
        Ok(())
    }
}

#[async_trait]
impl BrokerReader for RecordingClient {
    async fn receive(&self) -> FaultResult<Option<BrokerMessage>> {
        Ok(None)
    }

    async fn commit(&self, _message: &BrokerMessage) -> FaultResult<()> {
        Ok(())
    }
}

struct RecordingBroker {
    log: ReleaseLog,
    fail_reader: bool,
}

#[async_trait]
impl ResourceFactory<dyn BrokerWriter> for RecordingBroker {
    async fn open(&self, _config: &FaultlineConfig) -> FaultResult<Arc<dyn BrokerWriter>> {
        Ok(Arc::new(RecordingClient {
            name: "broker-writer",
            log: self.log.clone(),
        }))
    }
}

#[async_trait]
impl ResourceFactory<dyn BrokerReader> for RecordingBroker {
    async fn open(&self, _config: &FaultlineConfig) -> FaultResult<Arc<dyn BrokerReader>> {
        if self.fail_reader {
            return Err(FaultError::resource("broker-reader", "group coordinator unavailable"));
        }
        Ok(Arc::new(RecordingClient {
            name: "broker-reader",
            log: self.log.clone(),
        }))
    }
}

/// Telemetry, both servers on ephemeral ports and the broker; no database.
fn local_config() -> FaultlineConfig {
    let mut config = FaultlineConfig::default();
    config.app.name = "orders".to_string();
    config.database.enabled = false;
    config.rpc.enabled = true;
    config.rpc.host = "127.0.0.1".to_string();
    config.rpc.port = 0;
    config.http.enabled = true;
    config.http.host = "127.0.0.1".to_string();
    config.http.port = 0;
    config.broker.enabled = true;
    config.broker.brokers = vec!["local".to_string()];
    config.broker.topic = "orders".to_string();
    config.lifecycle.acquire_timeout = Duration::from_secs(5);
    config
}

fn collaborators(sink: &Arc<MemoryTelemetry>, broker: RecordingBroker) -> Collaborators {
    let broker = Arc::new(broker);
    Collaborators::default()
        .with_telemetry(Arc::new(SharedSink(sink.clone())))
        .with_brokers(broker.clone(), broker)
}

#[tokio::test]
async fn test_build_acquires_in_order_and_releases_in_reverse() {
    let sink = Arc::new(MemoryTelemetry::new());
    let log = ReleaseLog::default();
    let broker = RecordingBroker {
        log: log.clone(),
        fail_reader: false,
    };

    let (container, teardown) = InfraContainer::build(local_config(), collaborators(&sink, broker))
        .await
        .unwrap();

    assert_eq!(
        teardown.pending(),
        vec!["memory-telemetry", "rpc-server", "http-server", "broker-writer", "broker-reader"]
    );
    assert!(container.database().is_none());
    assert_ne!(container.http_server().unwrap().local_addr().port(), 0);
    assert_eq!(container.identity().name, "orders");

    teardown.run().await;
    assert_eq!(*log.lock(), vec!["broker-reader", "broker-writer"]);
    assert!(sink.was_flushed());
    assert!(teardown.is_empty());
    assert!(teardown.has_run());
}

#[tokio::test]
async fn test_failed_step_returns_teardown_for_earlier_steps() {
    let sink = Arc::new(MemoryTelemetry::new());
    let log = ReleaseLog::default();
    let broker = RecordingBroker {
        log: log.clone(),
        fail_reader: true,
    };

    let partial = InfraContainer::build(local_config(), collaborators(&sink, broker))
        .await
        .unwrap_err();

    assert!(partial.error.to_string().contains("group coordinator unavailable"));
    assert_eq!(
        partial.teardown.pending(),
        vec!["memory-telemetry", "rpc-server", "http-server", "broker-writer"]
    );

    partial.teardown.run().await;
    assert_eq!(*log.lock(), vec!["broker-writer"]);
    assert!(sink.was_flushed());
}

#[tokio::test]
async fn test_enabled_broker_without_client_is_rejected() {
    let sink = Arc::new(MemoryTelemetry::new());
    let mut config = local_config();
    config.rpc.enabled = false;
    config.http.enabled = false;

    let collaborators = Collaborators::default().with_telemetry(Arc::new(SharedSink(sink.clone())));
    let partial = InfraContainer::build(config, collaborators).await.unwrap_err();

    assert!(matches!(partial.error, FaultError::Configuration { .. }));
    assert_eq!(partial.teardown.pending(), vec!["memory-telemetry"]);
}

#[tokio::test]
async fn test_concurrent_teardown_runs_once() {
    let sink = Arc::new(MemoryTelemetry::new());
    let log = ReleaseLog::default();
    let broker = RecordingBroker {
        log: log.clone(),
        fail_reader: false,
    };
    let (_container, teardown) = InfraContainer::build(local_config(), collaborators(&sink, broker))
        .await
        .unwrap();

    let runs: Vec<_> = (0..4)
        .map(|_| {
            let teardown = teardown.clone();
            tokio::spawn(async move { teardown.run().await })
        })
        .collect();
    for run in runs {
        run.await.unwrap();
    }
    teardown.run().await;

    assert_eq!(*log.lock(), vec!["broker-reader", "broker-writer"]);
}

#[tokio::test]
async fn test_channel_broker_delivers_between_container_clients() {
    let sink = Arc::new(MemoryTelemetry::new());
    let mut config = local_config();
    config.rpc.enabled = false;
    config.http.enabled = false;

    let channel = Arc::new(ChannelBroker::new(8));
    let collaborators = Collaborators::default()
        .with_telemetry(Arc::new(SharedSink(sink.clone())))
        .with_brokers(channel.clone(), channel);
    let (container, teardown) = InfraContainer::build(config, collaborators).await.unwrap();

    let writer = container.broker_writer().unwrap();
    let reader = container.broker_reader().unwrap();
    writer.send(BrokerMessage::new("orders", "[17]")).await.unwrap();
    let received = reader.receive().await.unwrap().unwrap();
    assert_eq!(received.payload.as_ref(), b"[17]");

    teardown.run().await;
    assert!(reader.receive().await.unwrap().is_none());
}
