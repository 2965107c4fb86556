//! Modbus TCP 传输与适配器
//!
//! 所有 Modbus 传感器共用一条 TCP 连接，读取在适配器内串行化。
//! 传输层出错后丢弃连接，下一次读取时重新建立。

use crate::error::ProtocolError;
use crate::resolver::DeviceResolver;
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_modbus::prelude::*;
use tracing::{debug, info, warn};

/// 保持寄存器值的固定缩放系数：寄存器值 = round(实际值 × 100)
pub const MODBUS_VALUE_SCALE: f64 = 100.0;

/// Modbus TCP 默认端口
pub const MODBUS_DEFAULT_PORT: u16 = 502;

/// Modbus TCP 配置
#[derive(Debug, Clone)]
pub struct ModbusTcpConfig {
    /// 服务器地址（host 或 host:port）
    pub address: String,
    /// 从站 ID
    pub unit_id: u8,
    /// 连接与单次读取超时（毫秒）
    pub timeout_ms: u64,
}

impl ModbusTcpConfig {
    fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// 寄存器读取通道
#[async_trait]
pub trait ModbusTransport: Send {
    /// 功能码 3：读保持寄存器
    async fn read_holding_registers(
        &mut self,
        register: u16,
        count: u16,
    ) -> Result<Vec<u16>, ProtocolError>;

    async fn disconnect(&mut self);
}

/// 基于 tokio-modbus 的 TCP 传输
pub struct ModbusTcpTransport {
    config: ModbusTcpConfig,
    resolver: DeviceResolver,
    ctx: Option<tokio_modbus::client::Context>,
}

impl ModbusTcpTransport {
    /// 建立连接；启动期调用，失败即返回错误。
    pub async fn connect(config: ModbusTcpConfig) -> Result<Self, ProtocolError> {
        let mut transport = Self {
            config,
            resolver: DeviceResolver::new(MODBUS_DEFAULT_PORT),
            ctx: None,
        };
        transport.ensure_connected().await?;
        Ok(transport)
    }

    async fn ensure_connected(
        &mut self,
    ) -> Result<&mut tokio_modbus::client::Context, ProtocolError> {
        if self.ctx.is_none() {
            let device = self.resolver.resolve(&self.config.address).await?;
            let ctx = timeout(
                self.config.timeout(),
                tcp::connect_slave(device.addr, Slave(self.config.unit_id)),
            )
            .await
            .map_err(|_| ProtocolError::Timeout(format!("connect to {}", device.addr)))?
            .map_err(|e| ProtocolError::Connection(format!("{}: {}", device.addr, e)))?;

            info!(
                target: "gw.protocol",
                addr = %device.addr,
                unit_id = self.config.unit_id,
                "modbus_connected"
            );
            self.ctx = Some(ctx);
        }
        self.ctx
            .as_mut()
            .ok_or(ProtocolError::NotInitialized("modbus"))
    }
}

#[async_trait]
impl ModbusTransport for ModbusTcpTransport {
    async fn read_holding_registers(
        &mut self,
        register: u16,
        count: u16,
    ) -> Result<Vec<u16>, ProtocolError> {
        let read_timeout = self.config.timeout();
        let ctx = self.ensure_connected().await?;

        let result = timeout(read_timeout, ctx.read_holding_registers(register, count)).await;
        match result {
            Ok(Ok(Ok(registers))) => {
                debug!(target: "gw.protocol", register, count, values = ?registers, "read modbus registers");
                Ok(registers)
            }
            // 异常响应：连接仍然可用
            Ok(Ok(Err(exception))) => Err(ProtocolError::Modbus(format!(
                "exception: {:?}",
                exception
            ))),
            Ok(Err(e)) => {
                self.ctx = None;
                warn!(target: "gw.protocol", register, error = %e, "modbus_connection_dropped");
                Err(ProtocolError::Modbus(e.to_string()))
            }
            Err(_) => {
                self.ctx = None;
                Err(ProtocolError::Timeout(format!("read register {}", register)))
            }
        }
    }

    async fn disconnect(&mut self) {
        if let Some(mut ctx) = self.ctx.take() {
            if let Err(e) = ctx.disconnect().await {
                debug!(target: "gw.protocol", error = %e, "modbus_disconnect_failed");
            }
            info!(target: "gw.protocol", "modbus_disconnected");
        }
    }
}

/// Modbus 传感器适配器
pub struct ModbusAdapter {
    transport: Mutex<Option<Box<dyn ModbusTransport>>>,
}

impl ModbusAdapter {
    pub async fn connect(config: ModbusTcpConfig) -> Result<Self, ProtocolError> {
        let transport = ModbusTcpTransport::connect(config).await?;
        Ok(Self::with_transport(Box::new(transport)))
    }

    pub fn with_transport(transport: Box<dyn ModbusTransport>) -> Self {
        Self {
            transport: Mutex::new(Some(transport)),
        }
    }

    /// 读取单个保持寄存器并按固定系数还原为小数。
    pub async fn read(&self, register: u32) -> Result<f64, ProtocolError> {
        let register = u16::try_from(register)
            .map_err(|_| ProtocolError::InvalidPoint(format!("register {} out of range", register)))?;

        let mut guard = self.transport.lock().await;
        let transport = guard
            .as_mut()
            .ok_or(ProtocolError::NotInitialized("modbus"))?;
        let registers = transport.read_holding_registers(register, 1).await?;
        let bytes: Vec<u8> = registers.iter().flat_map(|r| r.to_be_bytes()).collect();
        decode_scaled_u16(&bytes)
    }

    pub async fn close(&self) {
        if let Some(mut transport) = self.transport.lock().await.take() {
            transport.disconnect().await;
        }
    }
}

/// 大端 16 位无符号整数 ÷ 100。
pub fn decode_scaled_u16(bytes: &[u8]) -> Result<f64, ProtocolError> {
    match bytes {
        [hi, lo, ..] => Ok(f64::from(u16::from_be_bytes([*hi, *lo])) / MODBUS_VALUE_SCALE),
        _ => Err(ProtocolError::InsufficientData {
            expected: 2,
            actual: bytes.len(),
        }),
    }
}
