//! 静态拓扑：房间、传感器及其协议参数。
//!
//! 启动时加载一次，之后只读。

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::time::Duration;

/// 未声明轮询周期时使用的默认周期。
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1000);

/// 传感器语义类型（封闭枚举）。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SemanticType {
    Temperature,
    Humidity,
    Co2,
    AirQuality,
    Light,
    Energy,
    Motion,
    Occupancy,
}

impl SemanticType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Temperature => "temperature",
            Self::Humidity => "humidity",
            Self::Co2 => "co2",
            Self::AirQuality => "air_quality",
            Self::Light => "light",
            Self::Energy => "energy",
            Self::Motion => "motion",
            Self::Occupancy => "occupancy",
        }
    }
}

/// 协议标签。
///
/// 未识别的标签保留为 `Other`，由拓扑校验拒绝。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ProtocolTag {
    Bacnet,
    Modbus,
    Other(String),
}

impl ProtocolTag {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Bacnet => "bacnet",
            Self::Modbus => "modbus",
            Self::Other(tag) => tag.as_str(),
        }
    }
}

impl From<String> for ProtocolTag {
    fn from(value: String) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "bacnet" => Self::Bacnet,
            "modbus" => Self::Modbus,
            _ => Self::Other(value),
        }
    }
}

impl From<ProtocolTag> for String {
    fn from(value: ProtocolTag) -> Self {
        match value {
            ProtocolTag::Other(tag) => tag,
            other => other.as_str().to_string(),
        }
    }
}

impl std::fmt::Display for ProtocolTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 传感器描述。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorDescriptor {
    pub id: String,
    #[serde(rename = "type")]
    pub semantic_type: SemanticType,
    pub protocol: ProtocolTag,
    /// 设备地址（`host` 或 `host:port`）。
    #[serde(default)]
    pub address: String,
    /// BACnet 对象实例号（analog-value）。
    #[serde(default)]
    pub object_id: Option<u32>,
    /// Modbus 保持寄存器地址。
    #[serde(default)]
    pub register: Option<u32>,
    #[serde(default)]
    pub unit: String,
    /// 轮询周期（毫秒），0 表示未声明。
    #[serde(default)]
    pub poll_interval_ms: u64,
}

impl SensorDescriptor {
    /// 声明的轮询周期。
    pub fn declared_poll_interval(&self) -> Option<Duration> {
        (self.poll_interval_ms > 0).then(|| Duration::from_millis(self.poll_interval_ms))
    }

    /// 实际使用的轮询周期（未声明时取默认值）。
    pub fn poll_interval(&self) -> Duration {
        self.declared_poll_interval()
            .unwrap_or(DEFAULT_POLL_INTERVAL)
    }
}

/// 房间描述。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomDescriptor {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub floor: i32,
    #[serde(default)]
    pub zone: String,
    #[serde(default)]
    pub sensors: Vec<String>,
}

/// 拓扑校验错误（配置错误，启动期致命）。
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TopologyError {
    #[error("duplicate room id: {0}")]
    DuplicateRoom(String),
    #[error("duplicate sensor id: {0}")]
    DuplicateSensor(String),
    #[error("sensor {sensor} listed by rooms {first} and {second}")]
    SensorInTwoRooms {
        sensor: String,
        first: String,
        second: String,
    },
    #[error("room {room} lists unknown sensor {sensor}")]
    UnknownSensor { room: String, sensor: String },
    #[error("sensor {0} is not assigned to any room")]
    UnassignedSensor(String),
    #[error("sensor {sensor} has unknown protocol: {protocol}")]
    UnknownProtocol { sensor: String, protocol: String },
    #[error("bacnet sensor {0} has no object_id")]
    MissingObjectId(String),
    #[error("modbus sensor {0} has no register")]
    MissingRegister(String),
    #[error("modbus sensor {sensor} register out of range: {register}")]
    RegisterOutOfRange { sensor: String, register: u32 },
}

/// 校验后的拓扑，附带 传感器 → 房间 反向索引。
#[derive(Debug, Clone)]
pub struct Topology {
    rooms: Vec<RoomDescriptor>,
    sensors: Vec<SensorDescriptor>,
    sensor_index: HashMap<String, usize>,
    sensor_to_room: HashMap<String, String>,
}

impl Topology {
    /// 构建并校验拓扑，保留文件中的顺序。
    pub fn new(
        rooms: Vec<RoomDescriptor>,
        sensors: Vec<SensorDescriptor>,
    ) -> Result<Self, TopologyError> {
        let mut sensor_index = HashMap::with_capacity(sensors.len());
        for (index, sensor) in sensors.iter().enumerate() {
            if sensor_index.insert(sensor.id.clone(), index).is_some() {
                return Err(TopologyError::DuplicateSensor(sensor.id.clone()));
            }
            validate_sensor(sensor)?;
        }

        let mut room_ids = HashSet::with_capacity(rooms.len());
        let mut sensor_to_room: HashMap<String, String> = HashMap::new();
        for room in &rooms {
            if !room_ids.insert(room.id.as_str()) {
                return Err(TopologyError::DuplicateRoom(room.id.clone()));
            }
            for sensor_id in &room.sensors {
                if !sensor_index.contains_key(sensor_id) {
                    return Err(TopologyError::UnknownSensor {
                        room: room.id.clone(),
                        sensor: sensor_id.clone(),
                    });
                }
                if let Some(first) = sensor_to_room.insert(sensor_id.clone(), room.id.clone()) {
                    return Err(TopologyError::SensorInTwoRooms {
                        sensor: sensor_id.clone(),
                        first,
                        second: room.id.clone(),
                    });
                }
            }
        }

        if let Some(orphan) = sensors
            .iter()
            .find(|sensor| !sensor_to_room.contains_key(&sensor.id))
        {
            return Err(TopologyError::UnassignedSensor(orphan.id.clone()));
        }

        Ok(Self {
            rooms,
            sensors,
            sensor_index,
            sensor_to_room,
        })
    }

    pub fn rooms(&self) -> &[RoomDescriptor] {
        &self.rooms
    }

    pub fn sensors(&self) -> &[SensorDescriptor] {
        &self.sensors
    }

    pub fn sensor(&self, sensor_id: &str) -> Option<&SensorDescriptor> {
        self.sensor_index
            .get(sensor_id)
            .map(|index| &self.sensors[*index])
    }

    /// 查询传感器所属房间。
    pub fn room_of(&self, sensor_id: &str) -> Option<&str> {
        self.sensor_to_room.get(sensor_id).map(String::as_str)
    }

    /// 聚合周期：全部传感器中最小的已声明轮询周期，无声明时取 `fallback`。
    pub fn telemetry_interval(&self, fallback: Duration) -> Duration {
        self.sensors
            .iter()
            .filter_map(SensorDescriptor::declared_poll_interval)
            .min()
            .unwrap_or(fallback)
    }
}

fn validate_sensor(sensor: &SensorDescriptor) -> Result<(), TopologyError> {
    match &sensor.protocol {
        ProtocolTag::Bacnet => {
            if sensor.object_id.is_none() {
                return Err(TopologyError::MissingObjectId(sensor.id.clone()));
            }
        }
        ProtocolTag::Modbus => {
            let Some(register) = sensor.register else {
                return Err(TopologyError::MissingRegister(sensor.id.clone()));
            };
            if register > u32::from(u16::MAX) {
                return Err(TopologyError::RegisterOutOfRange {
                    sensor: sensor.id.clone(),
                    register,
                });
            }
        }
        ProtocolTag::Other(protocol) => {
            return Err(TopologyError::UnknownProtocol {
                sensor: sensor.id.clone(),
                protocol: protocol.clone(),
            });
        }
    }
    Ok(())
}
