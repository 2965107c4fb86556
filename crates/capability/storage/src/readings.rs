//! 最新读数的内存存储
//!
//! 每个传感器一个槽位，写入总是整体替换，读数永不删除。

use crate::error::StorageError;
use domain::{ReadingStatus, SensorReading};
use std::collections::HashMap;
use std::sync::RwLock;

/// 传感器 ID → 最新读数
///
/// 写锁只覆盖一次 map 修改；读取在一次读锁内复制出快照，
/// 调用方不会跨 await 持有锁或内部引用。
#[derive(Default)]
pub struct ReadingStore {
    readings: RwLock<HashMap<String, SensorReading>>,
}

impl ReadingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 写入成功读数，替换旧值。
    pub fn upsert(&self, reading: SensorReading) -> Result<(), StorageError> {
        let mut readings = self
            .readings
            .write()
            .map_err(|_| StorageError::new("lock failed"))?;
        readings.insert(reading.sensor_id.clone(), reading);
        Ok(())
    }

    /// 写入失败读数：状态置为 `error`，值沿用上一次读数（没有则为 0）。
    pub fn record_failure(&self, mut reading: SensorReading) -> Result<(), StorageError> {
        let mut readings = self
            .readings
            .write()
            .map_err(|_| StorageError::new("lock failed"))?;
        reading.status = ReadingStatus::Error;
        reading.value = readings
            .get(&reading.sensor_id)
            .map(|previous| previous.value)
            .unwrap_or(0.0);
        readings.insert(reading.sensor_id.clone(), reading);
        Ok(())
    }

    pub fn get(&self, sensor_id: &str) -> Result<Option<SensorReading>, StorageError> {
        let readings = self
            .readings
            .read()
            .map_err(|_| StorageError::new("lock failed"))?;
        Ok(readings.get(sensor_id).cloned())
    }

    /// 在同一次读锁内取出一组传感器的读数，按给定顺序返回，缺失的跳过。
    pub fn readings_for(&self, sensor_ids: &[String]) -> Result<Vec<SensorReading>, StorageError> {
        let readings = self
            .readings
            .read()
            .map_err(|_| StorageError::new("lock failed"))?;
        Ok(sensor_ids
            .iter()
            .filter_map(|id| readings.get(id).cloned())
            .collect())
    }

    /// 获取读数数量（用于测试）
    pub fn len(&self) -> usize {
        self.readings.read().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
