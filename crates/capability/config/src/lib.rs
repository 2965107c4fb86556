//! 网关运行配置加载。
//!
//! - 进程参数：环境变量（`GATEWAY_*`）
//! - 拓扑：`rooms.yaml` / `sensors.yaml`

mod topology;

pub use topology::{RoomsFile, SensorsFile, load_topology, parse_topology};

use std::env;
use std::time::Duration;

/// 配置加载错误。
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {0}: {1}")]
    Invalid(String, String),
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Yaml {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("invalid topology: {0}")]
    Topology(#[from] domain::TopologyError),
}

/// 网关运行配置。
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub sensors_config: String,
    pub rooms_config: String,
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_username: Option<String>,
    pub mqtt_password: Option<String>,
    pub mqtt_client_id: String,
    pub mqtt_topic_prefix: String,
    pub mqtt_connect_timeout_ms: u64,
    pub bacnet_enabled: bool,
    pub bacnet_bind: String,
    pub bacnet_timeout_ms: u64,
    pub modbus_enabled: bool,
    pub modbus_address: String,
    pub modbus_unit_id: u8,
    pub modbus_timeout_ms: u64,
    pub publish_interval_ms: Option<u64>,
    pub stale_factor: u32,
}

impl AppConfig {
    /// 从环境变量读取配置。
    pub fn from_env() -> Result<Self, ConfigError> {
        let sensors_config = env::var("GATEWAY_SENSORS_CONFIG")
            .unwrap_or_else(|_| "/app/config/sensors.yaml".to_string());
        let rooms_config = env::var("GATEWAY_ROOMS_CONFIG")
            .unwrap_or_else(|_| "/app/config/rooms.yaml".to_string());
        let mqtt_host = env::var("GATEWAY_MQTT_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let mqtt_port = read_u16_with_default("GATEWAY_MQTT_PORT", 1883)?;
        let mqtt_username = read_optional("GATEWAY_MQTT_USERNAME");
        let mqtt_password = read_optional("GATEWAY_MQTT_PASSWORD");
        let mqtt_client_id =
            env::var("GATEWAY_MQTT_CLIENT_ID").unwrap_or_else(|_| "room-gateway".to_string());
        let mqtt_topic_prefix =
            env::var("GATEWAY_MQTT_TOPIC_PREFIX").unwrap_or_else(|_| "telemetry".to_string());
        let mqtt_connect_timeout_ms =
            read_u64_with_default("GATEWAY_MQTT_CONNECT_TIMEOUT_MS", 5000)?;
        let bacnet_enabled = read_bool_with_default("GATEWAY_BACNET_ENABLED", true);
        let bacnet_bind =
            env::var("GATEWAY_BACNET_BIND").unwrap_or_else(|_| "0.0.0.0:0".to_string());
        let bacnet_timeout_ms = read_u64_with_default("GATEWAY_BACNET_TIMEOUT_MS", 3000)?;
        let modbus_enabled = read_bool_with_default("GATEWAY_MODBUS_ENABLED", true);
        let modbus_address =
            env::var("GATEWAY_MODBUS_ADDRESS").unwrap_or_else(|_| "127.0.0.1:5020".to_string());
        let modbus_unit_id = read_u8_with_default("GATEWAY_MODBUS_UNIT_ID", 1)?;
        let modbus_timeout_ms = read_u64_with_default("GATEWAY_MODBUS_TIMEOUT_MS", 2000)?;
        let publish_interval_ms =
            read_optional_u64("GATEWAY_PUBLISH_INTERVAL_MS")?.filter(|value| *value > 0);
        let stale_factor = read_u32_with_default("GATEWAY_STALE_FACTOR", 3)?;

        Ok(Self {
            sensors_config,
            rooms_config,
            mqtt_host,
            mqtt_port,
            mqtt_username,
            mqtt_password,
            mqtt_client_id,
            mqtt_topic_prefix,
            mqtt_connect_timeout_ms,
            bacnet_enabled,
            bacnet_bind,
            bacnet_timeout_ms,
            modbus_enabled,
            modbus_address,
            modbus_unit_id,
            modbus_timeout_ms,
            publish_interval_ms,
            stale_factor,
        })
    }

    /// 显式配置的发布周期。
    pub fn publish_interval(&self) -> Option<Duration> {
        self.publish_interval_ms.map(Duration::from_millis)
    }
}

fn read_u16_with_default(key: &str, default: u16) -> Result<u16, ConfigError> {
    let value = match env::var(key) {
        Ok(value) => value,
        Err(_) => return Ok(default),
    };
    value
        .parse::<u16>()
        .map_err(|_| ConfigError::Invalid(key.to_string(), value))
}

fn read_u8_with_default(key: &str, default: u8) -> Result<u8, ConfigError> {
    let value = match env::var(key) {
        Ok(value) => value,
        Err(_) => return Ok(default),
    };
    value
        .parse::<u8>()
        .map_err(|_| ConfigError::Invalid(key.to_string(), value))
}

fn read_u32_with_default(key: &str, default: u32) -> Result<u32, ConfigError> {
    let value = match env::var(key) {
        Ok(value) => value,
        Err(_) => return Ok(default),
    };
    value
        .parse::<u32>()
        .map_err(|_| ConfigError::Invalid(key.to_string(), value))
}

fn read_u64_with_default(key: &str, default: u64) -> Result<u64, ConfigError> {
    let value = match env::var(key) {
        Ok(value) => value,
        Err(_) => return Ok(default),
    };
    value
        .parse::<u64>()
        .map_err(|_| ConfigError::Invalid(key.to_string(), value))
}

fn read_optional(key: &str) -> Option<String> {
    match env::var(key) {
        Ok(value) if !value.is_empty() => Some(value),
        _ => None,
    }
}

fn read_optional_u64(key: &str) -> Result<Option<u64>, ConfigError> {
    match env::var(key) {
        Ok(value) if value.is_empty() => Ok(None),
        Ok(value) => value
            .parse::<u64>()
            .map(Some)
            .map_err(|_| ConfigError::Invalid(key.to_string(), value)),
        Err(_) => Ok(None),
    }
}

fn read_bool_with_default(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(value) => matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "on"),
        Err(_) => default,
    }
}
