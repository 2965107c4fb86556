use crate::topology::SemanticType;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 读数状态。
///
/// `Stale` 不会被写入存储，仅在聚合时按读数年龄判定。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadingStatus {
    Ok,
    Error,
    Stale,
}

impl ReadingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Error => "error",
            Self::Stale => "stale",
        }
    }
}

/// 单个传感器的最新读数。
///
/// 失败读数只有 `status` 与 `timestamp` 可信，`value` 沿用上一次的值。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    pub sensor_id: String,
    pub room_id: String,
    #[serde(rename = "type")]
    pub semantic_type: SemanticType,
    pub value: f64,
    pub unit: String,
    pub timestamp: DateTime<Utc>,
    pub status: ReadingStatus,
}

impl SensorReading {
    /// 按读数年龄判定有效状态；`max_age` 为 `None` 时不做过期判定。
    pub fn status_at(&self, now: DateTime<Utc>, max_age: Option<Duration>) -> ReadingStatus {
        if self.status != ReadingStatus::Ok {
            return self.status;
        }
        let Some(max_age) = max_age else {
            return ReadingStatus::Ok;
        };
        let age = now
            .signed_duration_since(self.timestamp)
            .to_std()
            .unwrap_or_default();
        if age > max_age {
            ReadingStatus::Stale
        } else {
            ReadingStatus::Ok
        }
    }
}

/// 房间遥测：每个聚合周期为每个房间构造一次，仅发布不持久化。
///
/// 字段名即总线 JSON 的字段名。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomTelemetry {
    pub room_id: String,
    pub temperature: f64,
    pub humidity: f64,
    pub co2_ppm: f64,
    pub light_lux: f64,
    pub occupancy_count: i32,
    pub motion_detected: bool,
    pub energy_kwh: f64,
    pub air_quality_index: f64,
    /// RFC3339（秒精度，UTC）。
    pub timestamp: String,
}

impl RoomTelemetry {
    /// 运动传感器判定阈值。
    pub const MOTION_THRESHOLD: f64 = 0.5;

    /// 构造全部字段为默认值的遥测。
    pub fn new(room_id: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            room_id: room_id.into(),
            temperature: 0.0,
            humidity: 0.0,
            co2_ppm: 0.0,
            light_lux: 0.0,
            occupancy_count: 0,
            motion_detected: false,
            energy_kwh: 0.0,
            air_quality_index: 0.0,
            timestamp: at.to_rfc3339_opts(SecondsFormat::Secs, true),
        }
    }

    /// 将一个读数值映射到对应字段（固定的 类型 → 字段 表）。
    pub fn apply(&mut self, semantic_type: SemanticType, value: f64) {
        match semantic_type {
            SemanticType::Temperature => self.temperature = value,
            SemanticType::Humidity => self.humidity = value,
            SemanticType::Co2 => self.co2_ppm = value,
            SemanticType::AirQuality => self.air_quality_index = value,
            SemanticType::Light => self.light_lux = value,
            SemanticType::Energy => self.energy_kwh = value,
            SemanticType::Motion => self.motion_detected = value >= Self::MOTION_THRESHOLD,
            // 截断取整（`as` 对越界值饱和）
            SemanticType::Occupancy => self.occupancy_count = value as i32,
        }
    }
}
