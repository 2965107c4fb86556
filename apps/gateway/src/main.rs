//! 楼宇协议网关：轮询 BACnet/Modbus 传感器，按房间发布遥测到 MQTT。

use domain::{ProtocolTag, Topology};
use gw_config::{AppConfig, load_topology};
use gw_lifecycle::{Gateway, GatewaySettings};
use gw_protocol::{
    BacnetAdapter, BacnetClient, ModbusAdapter, ModbusTcpConfig, ProtocolRouter,
};
use gw_publish::{MqttPublisher, MqttPublisherConfig};
use gw_telemetry::init_tracing;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 加载本地 .env（如存在），便于直接 cargo run 启动
    dotenvy::dotenv().ok();
    // 从环境变量加载运行配置
    let config = AppConfig::from_env()?;
    // 初始化结构化日志
    init_tracing();

    // 拓扑文件缺失或非法：启动失败
    let topology = load_topology(&config.sensors_config, &config.rooms_config)?;

    let router = build_router(&config, &topology).await?;

    // 初始总线连接失败：启动失败
    let publisher = MqttPublisher::connect(MqttPublisherConfig {
        host: config.mqtt_host.clone(),
        port: config.mqtt_port,
        username: config.mqtt_username.clone(),
        password: config.mqtt_password.clone(),
        client_id: config.mqtt_client_id.clone(),
        topic_prefix: config.mqtt_topic_prefix.clone(),
        connect_timeout: Duration::from_millis(config.mqtt_connect_timeout_ms),
    })
    .await?;

    let gateway = Gateway::start(
        &topology,
        Arc::new(router),
        Arc::new(publisher),
        GatewaySettings {
            publish_interval: config.publish_interval(),
            stale_factor: config.stale_factor,
        },
    );

    let signal = wait_for_signal().await?;
    info!(target: "gw.lifecycle", signal, "shutdown_signal_received");
    gateway.stop().await;

    let metrics = gw_telemetry::metrics().snapshot();
    info!(
        target: "gw.lifecycle",
        reads_ok = metrics.reads_ok,
        reads_failed = metrics.reads_failed,
        telemetry_published = metrics.telemetry_published,
        publish_failures = metrics.publish_failures,
        "gateway_exited"
    );
    Ok(())
}

/// 按配置构建协议客户端；客户端构建失败即启动失败。
async fn build_router(
    config: &AppConfig,
    topology: &Topology,
) -> Result<ProtocolRouter, Box<dyn std::error::Error>> {
    let mut router = ProtocolRouter::new();

    if config.bacnet_enabled {
        let client = BacnetClient::bind(
            &config.bacnet_bind,
            Duration::from_millis(config.bacnet_timeout_ms),
        )
        .await?;
        router = router.with_bacnet(BacnetAdapter::new(client));
    } else if uses_protocol(topology, &ProtocolTag::Bacnet) {
        warn!(target: "gw.lifecycle", "bacnet disabled; bacnet sensors will be skipped");
    }

    if config.modbus_enabled {
        let adapter = ModbusAdapter::connect(ModbusTcpConfig {
            address: config.modbus_address.clone(),
            unit_id: config.modbus_unit_id,
            timeout_ms: config.modbus_timeout_ms,
        })
        .await?;
        router = router.with_modbus(adapter);
    } else if uses_protocol(topology, &ProtocolTag::Modbus) {
        warn!(target: "gw.lifecycle", "modbus disabled; modbus sensors will be skipped");
    }

    Ok(router)
}

fn uses_protocol(topology: &Topology, protocol: &ProtocolTag) -> bool {
    topology
        .sensors()
        .iter()
        .any(|sensor| &sensor.protocol == protocol)
}

#[cfg(unix)]
async fn wait_for_signal() -> std::io::Result<&'static str> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result.map(|_| "SIGINT"),
        _ = sigterm.recv() => Ok("SIGTERM"),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> std::io::Result<&'static str> {
    tokio::signal::ctrl_c().await?;
    Ok("SIGINT")
}
