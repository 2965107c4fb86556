//! 日志初始化与网关计数指标。

use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing_subscriber::{EnvFilter, fmt};

/// 指标快照。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub reads_ok: u64,
    pub reads_failed: u64,
    pub ticks_skipped: u64,
    pub read_latency_ms_total: u64,
    pub read_latency_ms_count: u64,
    pub readings_stale: u64,
    pub telemetry_published: u64,
    pub publish_failures: u64,
    pub serialize_failures: u64,
}

/// 网关运行指标。
pub struct GatewayMetrics {
    reads_ok: AtomicU64,
    reads_failed: AtomicU64,
    ticks_skipped: AtomicU64,
    read_latency_ms_total: AtomicU64,
    read_latency_ms_count: AtomicU64,
    readings_stale: AtomicU64,
    telemetry_published: AtomicU64,
    publish_failures: AtomicU64,
    serialize_failures: AtomicU64,
}

impl GatewayMetrics {
    pub fn new() -> Self {
        Self {
            reads_ok: AtomicU64::new(0),
            reads_failed: AtomicU64::new(0),
            ticks_skipped: AtomicU64::new(0),
            read_latency_ms_total: AtomicU64::new(0),
            read_latency_ms_count: AtomicU64::new(0),
            readings_stale: AtomicU64::new(0),
            telemetry_published: AtomicU64::new(0),
            publish_failures: AtomicU64::new(0),
            serialize_failures: AtomicU64::new(0),
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            reads_ok: self.reads_ok.load(Ordering::Relaxed),
            reads_failed: self.reads_failed.load(Ordering::Relaxed),
            ticks_skipped: self.ticks_skipped.load(Ordering::Relaxed),
            read_latency_ms_total: self.read_latency_ms_total.load(Ordering::Relaxed),
            read_latency_ms_count: self.read_latency_ms_count.load(Ordering::Relaxed),
            readings_stale: self.readings_stale.load(Ordering::Relaxed),
            telemetry_published: self.telemetry_published.load(Ordering::Relaxed),
            publish_failures: self.publish_failures.load(Ordering::Relaxed),
            serialize_failures: self.serialize_failures.load(Ordering::Relaxed),
        }
    }
}

impl Default for GatewayMetrics {
    fn default() -> Self {
        Self::new()
    }
}

static METRICS: OnceLock<GatewayMetrics> = OnceLock::new();

/// 获取全局指标实例。
pub fn metrics() -> &'static GatewayMetrics {
    METRICS.get_or_init(GatewayMetrics::new)
}

/// 初始化 tracing（默认 info，可用 RUST_LOG 覆盖）。
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).try_init();
}

/// 记录协议读取成功次数。
pub fn record_read_ok() {
    metrics().reads_ok.fetch_add(1, Ordering::Relaxed);
}

/// 记录协议读取失败次数。
pub fn record_read_failed() {
    metrics().reads_failed.fetch_add(1, Ordering::Relaxed);
}

/// 记录跳过的轮询次数（协议未识别或未启用）。
pub fn record_tick_skipped() {
    metrics().ticks_skipped.fetch_add(1, Ordering::Relaxed);
}

/// 记录单次协议读取耗时（毫秒）。
pub fn record_read_latency_ms(latency_ms: u64) {
    let metrics = metrics();
    metrics
        .read_latency_ms_total
        .fetch_add(latency_ms, Ordering::Relaxed);
    metrics
        .read_latency_ms_count
        .fetch_add(1, Ordering::Relaxed);
}

/// 记录聚合时因过期被排除的读数。
pub fn record_reading_stale() {
    metrics().readings_stale.fetch_add(1, Ordering::Relaxed);
}

/// 记录房间遥测发布成功次数。
pub fn record_telemetry_published() {
    metrics().telemetry_published.fetch_add(1, Ordering::Relaxed);
}

/// 记录房间遥测发布失败次数。
pub fn record_publish_failure() {
    metrics().publish_failures.fetch_add(1, Ordering::Relaxed);
}

/// 记录遥测序列化失败次数。
pub fn record_serialize_failure() {
    metrics().serialize_failures.fetch_add(1, Ordering::Relaxed);
}
