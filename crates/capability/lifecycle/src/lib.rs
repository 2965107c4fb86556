//! # 生命周期模块
//!
//! ```text
//! Gateway::start
//!   ├── SensorPoller × N ──┐
//!   └── RoomAggregator ────┤  CancellationToken（停机广播）
//!                          │  TaskTracker（等待全部退出）
//! Gateway::stop ───────────┘
//!   cancel → wait → SensorReader::close → TelemetryPublisher::disconnect
//! ```

mod coordinator;
mod gateway;

pub use coordinator::Lifecycle;
pub use gateway::{Gateway, GatewaySettings};
