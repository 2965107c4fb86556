//! 协议错误类型定义

/// 协议通信错误
///
/// 在轮询链路中只会被记录为读数状态 `error`，不会向上传播。
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// 连接错误
    #[error("connection error: {0}")]
    Connection(String),

    /// IO 错误
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// 设备地址无法解析
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// 客户端未初始化或已关闭
    #[error("{0} client not initialized")]
    NotInitialized(&'static str),

    /// Modbus 错误（含异常码）
    #[error("modbus error: {0}")]
    Modbus(String),

    /// BACnet 错误（Error / Reject / Abort PDU）
    #[error("bacnet error: {0}")]
    Bacnet(String),

    /// 报文解码错误
    #[error("decode error: {0}")]
    Decode(String),

    /// 返回字节不足
    #[error("insufficient data: expected {expected} bytes, got {actual}")]
    InsufficientData { expected: usize, actual: usize },

    /// 响应中没有属性值
    #[error("no data in response")]
    NoData,

    /// 无法归一化为数值的值类型
    #[error("unsupported value: {0}")]
    UnsupportedValue(String),

    /// 超时错误
    #[error("timeout: {0}")]
    Timeout(String),

    /// 协议标签未识别或对应适配器未启用
    #[error("unsupported protocol: {0}")]
    UnsupportedProtocol(String),

    /// 点位参数非法（对象实例号、寄存器地址）
    #[error("invalid point: {0}")]
    InvalidPoint(String),
}
