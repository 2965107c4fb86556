//! # 协议适配能力模块
//!
//! 把一个传感器描述读成一个 `f64`：
//! - **BACnet/IP**：UDP 上的 ReadProperty（analog-value / present-value）
//! - **Modbus TCP**：单个保持寄存器，固定 ÷100 还原小数
//!
//! ## 架构设计
//!
//! ```text
//! SensorPoller (ingest)
//!       │ SensorReader::read(descriptor)
//!       ▼
//! ProtocolRouter ── protocol tag ──┐
//!       │                          │
//!       ▼                          ▼
//! BacnetAdapter               ModbusAdapter
//!   ├── DeviceResolver (47808)   └── ModbusTcpTransport
//!   └── BacnetClient (Mutex)           ├── DeviceResolver (502)
//!         └── UdpTransport             └── tokio-modbus Context
//! ```
//!
//! 两个适配器内部各持一把互斥锁，同一协议的读取串行执行。
//! 读取错误统一为 [`ProtocolError`]，由轮询任务记录为 `error` 读数。

mod bacnet;
mod bacnet_codec;
mod error;
mod modbus_tcp;
mod resolver;
mod router;

pub use bacnet::{BacnetAdapter, BacnetClient, BacnetTransport, UdpTransport};
pub use bacnet_codec::{
    BACNET_DEFAULT_PORT, BacnetValue, ObjectId, ReadPropertyAck, ReadPropertyRequest, Response,
    decode_response, encode_read_property,
};
pub use error::ProtocolError;
pub use modbus_tcp::{
    MODBUS_DEFAULT_PORT, MODBUS_VALUE_SCALE, ModbusAdapter, ModbusTcpConfig, ModbusTcpTransport,
    ModbusTransport, decode_scaled_u16,
};
pub use resolver::{DeviceHandle, DeviceResolver, ResolvedDevice};
pub use router::{ProtocolRouter, SensorReader};
