use crate::coordinator::Lifecycle;
use domain::{DEFAULT_POLL_INTERVAL, Topology};
use gw_ingest::pollers_for;
use gw_protocol::SensorReader;
use gw_publish::{AggregatorConfig, RoomAggregator, TelemetryPublisher};
use gw_storage::ReadingStore;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::info;

/// 网关运行参数。
#[derive(Debug, Clone, Copy)]
pub struct GatewaySettings {
    /// 覆盖按拓扑推导的发布节奏
    pub publish_interval: Option<Duration>,
    pub stale_factor: u32,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            publish_interval: None,
            stale_factor: 3,
        }
    }
}

/// 运行中的网关：每个传感器一个轮询任务，外加一个聚合任务。
pub struct Gateway {
    lifecycle: Lifecycle,
    store: Arc<ReadingStore>,
    reader: Arc<dyn SensorReader>,
    publisher: Arc<dyn TelemetryPublisher>,
    stopped: AtomicBool,
}

impl Gateway {
    /// 启动全部并发单元；需在 tokio 运行时内调用。
    pub fn start(
        topology: &Topology,
        reader: Arc<dyn SensorReader>,
        publisher: Arc<dyn TelemetryPublisher>,
        settings: GatewaySettings,
    ) -> Self {
        let lifecycle = Lifecycle::new();
        let store = Arc::new(ReadingStore::new());

        let pollers = pollers_for(topology, reader.clone(), store.clone());
        let poller_count = pollers.len();
        for poller in pollers {
            lifecycle.spawn(poller.run(lifecycle.shutdown_token()));
        }

        let interval = settings
            .publish_interval
            .unwrap_or_else(|| topology.telemetry_interval(DEFAULT_POLL_INTERVAL));
        let aggregator = RoomAggregator::new(
            topology,
            store.clone(),
            publisher.clone(),
            AggregatorConfig {
                interval,
                stale_factor: settings.stale_factor,
            },
        );
        lifecycle.spawn(aggregator.run(lifecycle.shutdown_token()));

        info!(
            target: "gw.lifecycle",
            pollers = poller_count,
            rooms = topology.rooms().len(),
            publish_interval_ms = interval.as_millis() as u64,
            "gateway_started"
        );

        Self {
            lifecycle,
            store,
            reader,
            publisher,
            stopped: AtomicBool::new(false),
        }
    }

    pub fn store(&self) -> &Arc<ReadingStore> {
        &self.store
    }

    pub fn running_tasks(&self) -> usize {
        self.lifecycle.running()
    }

    /// 停机：广播信号 → 等待全部单元退出 → 关闭协议连接 → 断开总线。
    ///
    /// 只有第一次调用生效，返回 `false` 表示已停止过。
    pub async fn stop(&self) -> bool {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return false;
        }
        info!(target: "gw.lifecycle", running = self.lifecycle.running(), "shutdown_started");
        self.lifecycle.shutdown().await;
        self.reader.close().await;
        self.publisher.disconnect().await;
        info!(target: "gw.lifecycle", "shutdown_complete");
        true
    }
}
