//! 按协议标签分派读取。

use crate::bacnet::BacnetAdapter;
use crate::error::ProtocolError;
use crate::modbus_tcp::ModbusAdapter;
use async_trait::async_trait;
use domain::{ProtocolTag, SensorDescriptor};
use std::sync::Arc;

/// 传感器读取接口（轮询任务依赖此 trait，测试中用假实现替换）
#[async_trait]
pub trait SensorReader: Send + Sync {
    async fn read(&self, sensor: &SensorDescriptor) -> Result<f64, ProtocolError>;

    /// 释放底层连接（停机时调用一次）
    async fn close(&self) {}
}

/// 协议路由：BACnet / Modbus 适配器可分别禁用
#[derive(Default, Clone)]
pub struct ProtocolRouter {
    bacnet: Option<Arc<BacnetAdapter>>,
    modbus: Option<Arc<ModbusAdapter>>,
}

impl ProtocolRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bacnet(mut self, adapter: BacnetAdapter) -> Self {
        self.bacnet = Some(Arc::new(adapter));
        self
    }

    pub fn with_modbus(mut self, adapter: ModbusAdapter) -> Self {
        self.modbus = Some(Arc::new(adapter));
        self
    }
}

#[async_trait]
impl SensorReader for ProtocolRouter {
    async fn read(&self, sensor: &SensorDescriptor) -> Result<f64, ProtocolError> {
        match (&sensor.protocol, &self.bacnet, &self.modbus) {
            (ProtocolTag::Bacnet, Some(bacnet), _) => bacnet.read(sensor).await,
            (ProtocolTag::Modbus, _, Some(modbus)) => {
                let register = sensor.register.ok_or_else(|| {
                    ProtocolError::InvalidPoint(format!("{}: missing register", sensor.id))
                })?;
                modbus.read(register).await
            }
            (tag, _, _) => Err(ProtocolError::UnsupportedProtocol(tag.to_string())),
        }
    }

    /// 先关 BACnet 套接字，再关 Modbus 连接。
    async fn close(&self) {
        if let Some(bacnet) = &self.bacnet {
            bacnet.close().await;
        }
        if let Some(modbus) = &self.modbus {
            modbus.close().await;
        }
    }
}
