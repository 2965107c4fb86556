//! # 读数存储模块
//!
//! 网关中唯一被所有并发单元共享的数据：传感器 ID → 最新 [`domain::SensorReading`]。
//!
//! - 写入方：每个传感器的轮询任务（`upsert` / `record_failure`）
//! - 读取方：房间聚合任务（`readings_for`）
//!
//! 使用 `std::sync::RwLock<HashMap>`，所有方法都是同步的，锁不会跨 await 持有。

mod error;
mod readings;

pub use error::StorageError;
pub use readings::ReadingStore;
