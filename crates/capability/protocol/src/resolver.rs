//! 设备地址解析与缓存。
//!
//! 地址先规范化（去空白、补默认端口），再按规范化字符串缓存解析结果。
//! 解析失败不缓存。

use crate::error::ProtocolError;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;
use tracing::debug;

/// 已解析的设备地址。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedDevice {
    /// 规范化后的地址字符串（缓存键）
    pub key: String,
    pub addr: SocketAddr,
}

/// 设备句柄：首次使用时创建，之后在轮询任务间共享。
pub type DeviceHandle = Arc<ResolvedDevice>;

/// 设备地址解析器
pub struct DeviceResolver {
    default_port: u16,
    cache: RwLock<HashMap<String, DeviceHandle>>,
    resolutions: AtomicU64,
}

impl DeviceResolver {
    /// 创建解析器，`default_port` 为协议的默认端口。
    pub fn new(default_port: u16) -> Self {
        Self {
            default_port,
            cache: RwLock::new(HashMap::new()),
            resolutions: AtomicU64::new(0),
        }
    }

    /// 规范化地址：去空白；缺少端口时补默认端口；空地址视为本机。
    pub fn normalize(&self, address: &str) -> String {
        let address = address.trim();
        if address.is_empty() {
            return format!("127.0.0.1:{}", self.default_port);
        }
        if let Some(rest) = address.strip_prefix('[') {
            // [v6] 或 [v6]:port
            return if rest.contains("]:") {
                address.to_string()
            } else {
                format!("{}:{}", address, self.default_port)
            };
        }
        match address.matches(':').count() {
            0 => format!("{}:{}", address, self.default_port),
            1 => address.to_string(),
            // 裸 IPv6
            _ => format!("[{}]:{}", address, self.default_port),
        }
    }

    /// 解析地址，命中缓存时直接返回同一个句柄。
    pub async fn resolve(&self, address: &str) -> Result<DeviceHandle, ProtocolError> {
        let key = self.normalize(address);
        if let Some(handle) = self.cache.read().await.get(&key) {
            return Ok(handle.clone());
        }

        let mut cache = self.cache.write().await;
        // 双重检查：等待写锁期间可能已被其他任务解析
        if let Some(handle) = cache.get(&key) {
            return Ok(handle.clone());
        }

        self.resolutions.fetch_add(1, Ordering::Relaxed);
        let addr = lookup(&key).await?;
        debug!(target: "gw.protocol", address = %key, resolved = %addr, "device_resolved");
        let handle = Arc::new(ResolvedDevice {
            key: key.clone(),
            addr,
        });
        cache.insert(key, handle.clone());
        Ok(handle)
    }

    /// 实际执行解析的次数（含失败）。
    pub fn resolution_count(&self) -> u64 {
        self.resolutions.load(Ordering::Relaxed)
    }

    /// 已缓存的句柄数量。
    pub async fn cached(&self) -> usize {
        self.cache.read().await.len()
    }
}

async fn lookup(key: &str) -> Result<SocketAddr, ProtocolError> {
    if let Ok(addr) = key.parse::<SocketAddr>() {
        return Ok(addr);
    }
    let mut addrs = tokio::net::lookup_host(key)
        .await
        .map_err(|e| ProtocolError::InvalidAddress(format!("{}: {}", key, e)))?;
    addrs
        .next()
        .ok_or_else(|| ProtocolError::InvalidAddress(format!("{}: no address found", key)))
}
