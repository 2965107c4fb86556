//! 拓扑文件加载。

use crate::ConfigError;
use domain::{RoomDescriptor, SensorDescriptor, Topology};
use serde::Deserialize;
use std::path::Path;
use tracing::info;

/// `rooms.yaml` 顶层结构。
#[derive(Debug, Clone, Deserialize)]
pub struct RoomsFile {
    pub rooms: Vec<RoomDescriptor>,
}

/// `sensors.yaml` 顶层结构。
#[derive(Debug, Clone, Deserialize)]
pub struct SensorsFile {
    pub sensors: Vec<SensorDescriptor>,
}

/// 从两个 YAML 文件加载并校验拓扑。
pub fn load_topology(
    sensors_path: impl AsRef<Path>,
    rooms_path: impl AsRef<Path>,
) -> Result<Topology, ConfigError> {
    let rooms_path = rooms_path.as_ref();
    let sensors_path = sensors_path.as_ref();
    let rooms_yaml = read_file(rooms_path)?;
    let sensors_yaml = read_file(sensors_path)?;

    let rooms: RoomsFile = serde_yaml::from_str(&rooms_yaml).map_err(|source| ConfigError::Yaml {
        path: rooms_path.display().to_string(),
        source,
    })?;
    let sensors: SensorsFile =
        serde_yaml::from_str(&sensors_yaml).map_err(|source| ConfigError::Yaml {
            path: sensors_path.display().to_string(),
            source,
        })?;

    let topology = Topology::new(rooms.rooms, sensors.sensors)?;
    info!(
        target: "gw.config",
        sensors = topology.sensors().len(),
        rooms = topology.rooms().len(),
        "topology_loaded"
    );
    Ok(topology)
}

/// 从 YAML 文本解析拓扑（不经过文件系统）。
pub fn parse_topology(sensors_yaml: &str, rooms_yaml: &str) -> Result<Topology, ConfigError> {
    let rooms: RoomsFile = serde_yaml::from_str(rooms_yaml).map_err(|source| ConfigError::Yaml {
        path: "<rooms>".to_string(),
        source,
    })?;
    let sensors: SensorsFile =
        serde_yaml::from_str(sensors_yaml).map_err(|source| ConfigError::Yaml {
            path: "<sensors>".to_string(),
            source,
        })?;
    Ok(Topology::new(rooms.rooms, sensors.sensors)?)
}

fn read_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })
}
