//! 房间聚合：按固定节奏把每个房间的最新读数折叠成一条 `RoomTelemetry` 并发布。

use crate::error::PublishError;
use crate::publisher::TelemetryPublisher;
use chrono::{DateTime, Utc};
use domain::{ReadingStatus, RoomDescriptor, RoomTelemetry, Topology};
use gw_storage::{ReadingStore, StorageError};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// 聚合任务配置。
#[derive(Debug, Clone, Copy)]
pub struct AggregatorConfig {
    /// 发布节奏
    pub interval: Duration,
    /// 读数年龄超过 `stale_factor × 轮询周期` 视为过期；0 表示不判定
    pub stale_factor: u32,
}

/// 单个聚合周期的统计。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub published: usize,
    pub failed: usize,
}

pub struct RoomAggregator {
    rooms: Vec<RoomDescriptor>,
    poll_periods: HashMap<String, Duration>,
    store: Arc<ReadingStore>,
    publisher: Arc<dyn TelemetryPublisher>,
    config: AggregatorConfig,
}

impl RoomAggregator {
    pub fn new(
        topology: &Topology,
        store: Arc<ReadingStore>,
        publisher: Arc<dyn TelemetryPublisher>,
        config: AggregatorConfig,
    ) -> Self {
        let poll_periods = topology
            .sensors()
            .iter()
            .map(|sensor| (sensor.id.clone(), sensor.poll_interval()))
            .collect();
        Self {
            rooms: topology.rooms().to_vec(),
            poll_periods,
            store,
            publisher,
            config,
        }
    }

    /// 聚合循环，直到 `shutdown` 被取消。
    pub async fn run(self, shutdown: CancellationToken) {
        let period = self.config.interval;
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            target: "gw.publish",
            rooms = self.rooms.len(),
            interval_ms = period.as_millis() as u64,
            stale_factor = self.config.stale_factor,
            "aggregator_started"
        );

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }
            let summary = self.publish_tick(&shutdown).await;
            debug!(
                target: "gw.publish",
                published = summary.published,
                failed = summary.failed,
                "aggregation_tick"
            );
        }

        info!(target: "gw.publish", "aggregator_stopped");
    }

    /// 依次聚合并发布所有房间；每个房间之前检查停机信号。
    pub async fn publish_tick(&self, shutdown: &CancellationToken) -> TickSummary {
        let mut summary = TickSummary::default();
        for room in &self.rooms {
            if shutdown.is_cancelled() {
                break;
            }
            let telemetry = match self.aggregate(room, Utc::now()) {
                Ok(telemetry) => telemetry,
                Err(err) => {
                    warn!(target: "gw.publish", room_id = %room.id, error = %err, "room_aggregate_failed");
                    summary.failed += 1;
                    continue;
                }
            };
            let payload = match serde_json::to_vec(&telemetry) {
                Ok(payload) => payload,
                Err(err) => {
                    gw_telemetry::record_serialize_failure();
                    warn!(target: "gw.publish", room_id = %room.id, error = %err, "room_telemetry_serialize_failed");
                    summary.failed += 1;
                    continue;
                }
            };
            let Some(result) = self.send(&room.id, payload, shutdown).await else {
                break;
            };
            match result {
                Ok(()) => {
                    gw_telemetry::record_telemetry_published();
                    debug!(target: "gw.publish", room_id = %room.id, "room_telemetry_published");
                    summary.published += 1;
                }
                Err(err) => {
                    gw_telemetry::record_publish_failure();
                    warn!(target: "gw.publish", room_id = %room.id, error = %err, "room_telemetry_publish_failed");
                    summary.failed += 1;
                }
            }
        }
        summary
    }

    /// 停机后不再发起新的发布，返回 `None`。
    async fn send(
        &self,
        room_id: &str,
        payload: Vec<u8>,
        shutdown: &CancellationToken,
    ) -> Option<Result<(), PublishError>> {
        if shutdown.is_cancelled() {
            return None;
        }
        Some(self.publisher.publish(room_id, payload).await)
    }

    /// 折叠一个房间的读数；缺失、失败或过期的读数保持字段默认值。
    pub fn aggregate(
        &self,
        room: &RoomDescriptor,
        now: DateTime<Utc>,
    ) -> Result<RoomTelemetry, StorageError> {
        let readings = self.store.readings_for(&room.sensors)?;
        let mut telemetry = RoomTelemetry::new(room.id.clone(), now);
        for reading in readings {
            let status = reading.status_at(now, self.max_age(&reading.sensor_id));
            if status == ReadingStatus::Ok {
                telemetry.apply(reading.semantic_type, reading.value);
                continue;
            }
            if status == ReadingStatus::Stale {
                gw_telemetry::record_reading_stale();
            }
            debug!(
                target: "gw.publish",
                sensor_id = %reading.sensor_id,
                semantic_type = reading.semantic_type.as_str(),
                status = status.as_str(),
                "reading_skipped"
            );
        }
        Ok(telemetry)
    }

    fn max_age(&self, sensor_id: &str) -> Option<Duration> {
        if self.config.stale_factor == 0 {
            return None;
        }
        self.poll_periods
            .get(sensor_id)
            .map(|period| *period * self.config.stale_factor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use domain::{ProtocolTag, SemanticType, SensorDescriptor};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingPublisher {
        publishes: AtomicUsize,
    }

    #[async_trait]
    impl TelemetryPublisher for CountingPublisher {
        async fn publish(&self, _room_id: &str, _payload: Vec<u8>) -> Result<(), PublishError> {
            self.publishes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn aggregator(publisher: Arc<CountingPublisher>) -> RoomAggregator {
        let sensor = SensorDescriptor {
            id: "temp-01".to_string(),
            semantic_type: SemanticType::Temperature,
            protocol: ProtocolTag::Modbus,
            address: "sim:5020".to_string(),
            object_id: None,
            register: Some(500),
            unit: "C".to_string(),
            poll_interval_ms: 500,
        };
        let room = RoomDescriptor {
            id: "01".to_string(),
            name: "Lab".to_string(),
            floor: 1,
            zone: "north".to_string(),
            sensors: vec!["temp-01".to_string()],
        };
        let topology = Topology::new(vec![room], vec![sensor]).unwrap();
        RoomAggregator::new(
            &topology,
            Arc::new(ReadingStore::new()),
            publisher,
            AggregatorConfig {
                interval: Duration::from_millis(500),
                stale_factor: 3,
            },
        )
    }

    #[tokio::test]
    async fn send_after_cancel_does_not_publish() {
        let publisher = Arc::new(CountingPublisher::default());
        let aggregator = aggregator(publisher.clone());
        let shutdown = CancellationToken::new();

        let sent = aggregator.send("01", b"{}".to_vec(), &shutdown).await;
        assert!(matches!(sent, Some(Ok(()))));

        shutdown.cancel();
        assert!(aggregator.send("01", b"{}".to_vec(), &shutdown).await.is_none());
        assert_eq!(publisher.publishes.load(Ordering::SeqCst), 1);
    }
}
