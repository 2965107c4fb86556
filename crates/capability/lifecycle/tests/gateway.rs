use async_trait::async_trait;
use domain::{ProtocolTag, ReadingStatus, RoomDescriptor, SemanticType, SensorDescriptor, Topology};
use gw_lifecycle::{Gateway, GatewaySettings, Lifecycle};
use gw_protocol::{ProtocolError, SensorReader};
use gw_publish::{PublishError, TelemetryPublisher};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

type Events = Arc<Mutex<Vec<&'static str>>>;

struct FakeReader {
    events: Events,
    reads: AtomicUsize,
    delay: Duration,
}

#[async_trait]
impl SensorReader for FakeReader {
    async fn read(&self, _sensor: &SensorDescriptor) -> Result<f64, ProtocolError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.events.lock().unwrap().push("read_done");
        Ok(21.5)
    }

    async fn close(&self) {
        self.events.lock().unwrap().push("reader_closed");
    }
}

struct FakePublisher {
    events: Events,
    publishes: AtomicUsize,
}

#[async_trait]
impl TelemetryPublisher for FakePublisher {
    async fn publish(&self, _room_id: &str, _payload: Vec<u8>) -> Result<(), PublishError> {
        self.publishes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) {
        self.events.lock().unwrap().push("publisher_disconnected");
    }
}

fn topology() -> Topology {
    let sensors = vec![
        SensorDescriptor {
            id: "temp-01".to_string(),
            semantic_type: SemanticType::Temperature,
            protocol: ProtocolTag::Modbus,
            address: "sim:5020".to_string(),
            object_id: None,
            register: Some(500),
            unit: "C".to_string(),
            poll_interval_ms: 500,
        },
        SensorDescriptor {
            id: "hum-01".to_string(),
            semantic_type: SemanticType::Humidity,
            protocol: ProtocolTag::Bacnet,
            address: "10.0.0.5".to_string(),
            object_id: Some(3),
            register: None,
            unit: "%".to_string(),
            poll_interval_ms: 1000,
        },
    ];
    let rooms = vec![RoomDescriptor {
        id: "01".to_string(),
        name: "Lab".to_string(),
        floor: 1,
        zone: "north".to_string(),
        sensors: vec!["temp-01".to_string(), "hum-01".to_string()],
    }];
    Topology::new(rooms, sensors).unwrap()
}

fn fakes(delay: Duration) -> (Events, Arc<FakeReader>, Arc<FakePublisher>) {
    let events: Events = Arc::new(Mutex::new(Vec::new()));
    let reader = Arc::new(FakeReader {
        events: events.clone(),
        reads: AtomicUsize::new(0),
        delay,
    });
    let publisher = Arc::new(FakePublisher {
        events: events.clone(),
        publishes: AtomicUsize::new(0),
    });
    (events, reader, publisher)
}

#[tokio::test(start_paused = true)]
async fn lifecycle_waits_for_every_unit() {
    let lifecycle = Lifecycle::new();
    let exited = Arc::new(AtomicUsize::new(0));
    for delay_ms in [0u64, 200, 700] {
        let token = lifecycle.shutdown_token();
        let exited = exited.clone();
        lifecycle.spawn(async move {
            token.cancelled().await;
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            exited.fetch_add(1, Ordering::SeqCst);
        });
    }
    assert_eq!(lifecycle.running(), 3);

    lifecycle.shutdown().await;
    assert!(lifecycle.is_shutting_down());
    assert_eq!(exited.load(Ordering::SeqCst), 3);
    assert_eq!(lifecycle.running(), 0);
}

#[tokio::test(start_paused = true)]
async fn gateway_polls_and_publishes_until_stopped() {
    let (events, reader, publisher) = fakes(Duration::ZERO);
    let gateway = Gateway::start(
        &topology(),
        reader.clone(),
        publisher.clone(),
        GatewaySettings::default(),
    );
    assert_eq!(gateway.running_tasks(), 3);

    tokio::time::sleep(Duration::from_millis(1200)).await;
    assert!(reader.reads.load(Ordering::SeqCst) >= 3);
    // 节奏为最小轮询周期 500ms
    assert_eq!(publisher.publishes.load(Ordering::SeqCst), 2);
    assert_eq!(gateway.store().len(), 2);

    assert!(gateway.stop().await);
    let reads = reader.reads.load(Ordering::SeqCst);
    let publishes = publisher.publishes.load(Ordering::SeqCst);
    assert_eq!(gateway.running_tasks(), 0);

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(reader.reads.load(Ordering::SeqCst), reads);
    assert_eq!(publisher.publishes.load(Ordering::SeqCst), publishes);

    let events = events.lock().unwrap().clone();
    assert_eq!(
        &events[events.len() - 2..],
        &["reader_closed", "publisher_disconnected"]
    );
}

#[tokio::test(start_paused = true)]
async fn stop_waits_for_reads_in_flight_and_is_idempotent() {
    let (events, reader, publisher) = fakes(Duration::from_millis(800));
    let gateway = Gateway::start(
        &topology(),
        reader.clone(),
        publisher.clone(),
        GatewaySettings {
            publish_interval: Some(Duration::from_secs(60)),
            stale_factor: 0,
        },
    );

    // 500ms 时 temp-01 开始读取，读取持续 800ms
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert!(events.lock().unwrap().is_empty());

    assert!(gateway.stop().await);
    assert_eq!(
        events.lock().unwrap().clone(),
        vec!["read_done", "reader_closed", "publisher_disconnected"]
    );
    assert_eq!(gateway.store().len(), 1);

    assert!(!gateway.stop().await);
    assert_eq!(events.lock().unwrap().len(), 3);
    assert_eq!(publisher.publishes.load(Ordering::SeqCst), 0);
}

/// 保存每次发布的 JSON 载荷。
#[derive(Default)]
struct CapturingPublisher {
    payloads: Mutex<Vec<serde_json::Value>>,
}

#[async_trait]
impl TelemetryPublisher for CapturingPublisher {
    async fn publish(&self, _room_id: &str, payload: Vec<u8>) -> Result<(), PublishError> {
        let payload = serde_json::from_slice(&payload)
            .map_err(|err| PublishError::Publish(err.to_string()))?;
        self.payloads.lock().unwrap().push(payload);
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn failing_reader_never_reaches_telemetry() {
    struct FailingReader;

    #[async_trait]
    impl SensorReader for FailingReader {
        async fn read(&self, _sensor: &SensorDescriptor) -> Result<f64, ProtocolError> {
            Err(ProtocolError::Connection("refused".to_string()))
        }
    }

    let publisher = Arc::new(CapturingPublisher::default());
    let gateway = Gateway::start(
        &topology(),
        Arc::new(FailingReader),
        publisher.clone(),
        GatewaySettings::default(),
    );

    tokio::time::sleep(Duration::from_millis(2600)).await;
    let temp = gateway.store().get("temp-01").unwrap().expect("reading");
    assert_eq!(temp.status, ReadingStatus::Error);
    assert_eq!(temp.value, 0.0);
    assert!(gateway.stop().await);

    let payloads = publisher.payloads.lock().unwrap().clone();
    assert_eq!(payloads.len(), 5);
    for payload in &payloads {
        assert_eq!(payload["temperature"], 0.0);
        assert_eq!(payload["humidity"], 0.0);
    }
}

#[tokio::test]
async fn stop_without_traffic() {
    let closed = Arc::new(AtomicBool::new(false));

    struct ClosingReader(Arc<AtomicBool>);

    #[async_trait]
    impl SensorReader for ClosingReader {
        async fn read(&self, _sensor: &SensorDescriptor) -> Result<f64, ProtocolError> {
            Err(ProtocolError::NotInitialized("modbus"))
        }

        async fn close(&self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    let gateway = Gateway::start(
        &topology(),
        Arc::new(ClosingReader(closed.clone())),
        Arc::new(gw_publish::NoopPublisher),
        GatewaySettings::default(),
    );
    assert!(gateway.stop().await);
    assert!(closed.load(Ordering::SeqCst));
}
