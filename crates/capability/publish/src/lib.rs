//! # 发布模块
//!
//! - [`RoomAggregator`]：按固定节奏读取读数存储，为每个房间构造 `RoomTelemetry`
//! - [`TelemetryPublisher`]：发布边界，生产环境为 [`MqttPublisher`]（`{prefix}/{room_id}`，QoS 0）
//!
//! 发布失败只记录日志和计数，不影响其他房间和下一个周期。

mod aggregator;
mod error;
mod publisher;

pub use aggregator::{AggregatorConfig, RoomAggregator, TickSummary};
pub use error::PublishError;
pub use publisher::{
    MqttPublisher, MqttPublisherConfig, NoopPublisher, TelemetryPublisher, room_topic,
};
