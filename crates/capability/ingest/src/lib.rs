//! # 传感器轮询模块
//!
//! 每个传感器一个 [`SensorPoller`]，按自身周期读取并把结果写入 [`ReadingStore`]。
//!
//! ```text
//! interval tick ─► SensorReader::read ─┬─ Ok(v)                 ─► upsert(status=ok)
//!                                      ├─ UnsupportedProtocol   ─► warn，跳过本次
//!                                      └─ Err(e)                ─► record_failure(status=error)
//! ```
//!
//! 读取错误不会越过轮询任务；停机信号只在 select 点被观察，进行中的读取会完成。

use chrono::Utc;
use domain::{ReadingStatus, SensorDescriptor, SensorReading, Topology};
use gw_protocol::{ProtocolError, SensorReader};
use gw_storage::ReadingStore;
use std::sync::Arc;
use std::time::Instant as StdInstant;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// 单次轮询的结果。
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    Ok(f64),
    Failed,
    /// 协议未识别或适配器未启用，未写入存储
    Skipped,
}

/// 单个传感器的轮询任务。
pub struct SensorPoller {
    sensor: SensorDescriptor,
    room_id: String,
    reader: Arc<dyn SensorReader>,
    store: Arc<ReadingStore>,
}

impl SensorPoller {
    pub fn new(
        sensor: SensorDescriptor,
        room_id: impl Into<String>,
        reader: Arc<dyn SensorReader>,
        store: Arc<ReadingStore>,
    ) -> Self {
        Self {
            sensor,
            room_id: room_id.into(),
            reader,
            store,
        }
    }

    pub fn sensor_id(&self) -> &str {
        &self.sensor.id
    }

    /// 轮询循环，直到 `shutdown` 被取消。
    pub async fn run(self, shutdown: CancellationToken) {
        let period = self.sensor.poll_interval();
        let mut ticker = interval_at(Instant::now() + period, period);
        // 读取慢于周期时不补发积压的 tick
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            target: "gw.poller",
            sensor_id = %self.sensor.id,
            protocol = %self.sensor.protocol,
            semantic_type = self.sensor.semantic_type.as_str(),
            period_ms = period.as_millis() as u64,
            "poller_started"
        );

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }
            if shutdown.is_cancelled() {
                break;
            }
            self.poll_once().await;
        }

        info!(target: "gw.poller", sensor_id = %self.sensor.id, "poller_stopped");
    }

    /// 执行一次读取并写入存储。
    pub async fn poll_once(&self) -> PollOutcome {
        let started = StdInstant::now();
        let result = self.reader.read(&self.sensor).await;
        let latency_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(value) => {
                gw_telemetry::record_read_ok();
                gw_telemetry::record_read_latency_ms(latency_ms);
                debug!(
                    target: "gw.poller",
                    sensor_id = %self.sensor.id,
                    value,
                    latency_ms,
                    "sensor_read_ok"
                );
                if let Err(err) = self.store.upsert(self.reading(value, ReadingStatus::Ok)) {
                    warn!(target: "gw.poller", sensor_id = %self.sensor.id, error = %err, "store_write_failed");
                }
                PollOutcome::Ok(value)
            }
            Err(ProtocolError::UnsupportedProtocol(tag)) => {
                gw_telemetry::record_tick_skipped();
                warn!(
                    target: "gw.poller",
                    sensor_id = %self.sensor.id,
                    protocol = %tag,
                    "unsupported_protocol"
                );
                PollOutcome::Skipped
            }
            Err(err) => {
                gw_telemetry::record_read_failed();
                gw_telemetry::record_read_latency_ms(latency_ms);
                warn!(
                    target: "gw.poller",
                    sensor_id = %self.sensor.id,
                    address = %self.sensor.address,
                    error = %err,
                    "sensor_read_failed"
                );
                if let Err(err) = self
                    .store
                    .record_failure(self.reading(0.0, ReadingStatus::Error))
                {
                    warn!(target: "gw.poller", sensor_id = %self.sensor.id, error = %err, "store_write_failed");
                }
                PollOutcome::Failed
            }
        }
    }

    fn reading(&self, value: f64, status: ReadingStatus) -> SensorReading {
        SensorReading {
            sensor_id: self.sensor.id.clone(),
            room_id: self.room_id.clone(),
            semantic_type: self.sensor.semantic_type,
            value,
            unit: self.sensor.unit.clone(),
            timestamp: Utc::now(),
            status,
        }
    }
}

/// 为拓扑中的每个传感器构造一个轮询任务（按文件顺序）。
pub fn pollers_for(
    topology: &Topology,
    reader: Arc<dyn SensorReader>,
    store: Arc<ReadingStore>,
) -> Vec<SensorPoller> {
    topology
        .sensors()
        .iter()
        .filter_map(|sensor| {
            let room_id = topology.room_of(&sensor.id)?;
            Some(SensorPoller::new(
                sensor.clone(),
                room_id,
                reader.clone(),
                store.clone(),
            ))
        })
        .collect()
}
