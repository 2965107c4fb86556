pub mod data;
pub mod topology;

pub use data::{ReadingStatus, RoomTelemetry, SensorReading};
pub use topology::{
    DEFAULT_POLL_INTERVAL, ProtocolTag, RoomDescriptor, SemanticType, SensorDescriptor, Topology,
    TopologyError,
};
