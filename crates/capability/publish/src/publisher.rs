use crate::error::PublishError;
use async_trait::async_trait;
use rumqttc::{AsyncClient, ConnectReturnCode, Event, MqttOptions, Outgoing, Packet, QoS};
use std::sync::Mutex;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// 房间遥测发布器抽象。
#[async_trait]
pub trait TelemetryPublisher: Send + Sync {
    /// 发布一个房间的遥测负载（fire-and-forget）。
    async fn publish(&self, room_id: &str, payload: Vec<u8>) -> Result<(), PublishError>;

    /// 断开总线连接（停机时调用一次）。
    async fn disconnect(&self) {}
}

/// 空发布器（用于接线与测试）。
#[derive(Debug, Default)]
pub struct NoopPublisher;

#[async_trait]
impl TelemetryPublisher for NoopPublisher {
    async fn publish(&self, _room_id: &str, _payload: Vec<u8>) -> Result<(), PublishError> {
        Ok(())
    }
}

/// MQTT 发布器配置。
#[derive(Debug, Clone)]
pub struct MqttPublisherConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    /// client id 前缀，实际 id 追加随机后缀
    pub client_id: String,
    pub topic_prefix: String,
    pub connect_timeout: Duration,
}

/// 请求队列容量：一个聚合周期内所有房间的发布不应阻塞。
const REQUEST_CAPACITY: usize = 256;

const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// MQTT 发布器实现（QoS 0，不保留）。
pub struct MqttPublisher {
    client: AsyncClient,
    topic_prefix: String,
    eventloop: Mutex<Option<JoinHandle<()>>>,
}

impl MqttPublisher {
    /// 连接并等待 ConnAck；超时或被拒绝即返回错误。
    pub async fn connect(config: MqttPublisherConfig) -> Result<Self, PublishError> {
        let client_id = format!("{}-{}", config.client_id, uuid::Uuid::new_v4());
        let mut options = MqttOptions::new(client_id.clone(), config.host.clone(), config.port);
        options.set_keep_alive(Duration::from_secs(30));
        if let (Some(username), Some(password)) = (config.username, config.password) {
            options.set_credentials(username, password);
        }
        let (client, mut eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);

        let connack = async {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                        return if ack.code == ConnectReturnCode::Success {
                            Ok(())
                        } else {
                            Err(PublishError::Connect(format!("refused: {:?}", ack.code)))
                        };
                    }
                    Ok(_) => {}
                    Err(err) => return Err(PublishError::Connect(err.to_string())),
                }
            }
        };
        tokio::time::timeout(config.connect_timeout, connack)
            .await
            .map_err(|_| {
                PublishError::Connect(format!(
                    "no connack from {}:{} within {:?}",
                    config.host, config.port, config.connect_timeout
                ))
            })??;

        info!(
            target: "gw.publish",
            host = %config.host,
            port = config.port,
            client_id = %client_id,
            "mqtt_connected"
        );

        let handle = tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Disconnect)) => break,
                    Ok(_) => {}
                    Err(err) => {
                        warn!(target: "gw.publish", "mqtt publish eventloop error: {}", err);
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
            debug!(target: "gw.publish", "mqtt_eventloop_stopped");
        });

        Ok(Self {
            client,
            topic_prefix: config.topic_prefix,
            eventloop: Mutex::new(Some(handle)),
        })
    }

    pub fn topic_for(&self, room_id: &str) -> String {
        room_topic(&self.topic_prefix, room_id)
    }
}

/// `{prefix}/{room_id}`；前缀为空时只用房间 ID。
pub fn room_topic(prefix: &str, room_id: &str) -> String {
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        room_id.to_string()
    } else {
        format!("{}/{}", prefix, room_id)
    }
}

#[async_trait]
impl TelemetryPublisher for MqttPublisher {
    async fn publish(&self, room_id: &str, payload: Vec<u8>) -> Result<(), PublishError> {
        let topic = self.topic_for(room_id);
        debug!(
            target: "gw.publish",
            room_id = %room_id,
            topic = %topic,
            payload_size = payload.len(),
            "room_telemetry_publish"
        );
        // 不等待确认；队列满时直接失败，不阻塞聚合任务
        self.client
            .try_publish(topic, QoS::AtMostOnce, false, payload)
            .map_err(|err| PublishError::Publish(err.to_string()))
    }

    async fn disconnect(&self) {
        let handle = self.eventloop.lock().ok().and_then(|mut slot| slot.take());
        let Some(handle) = handle else {
            return;
        };
        if let Err(err) = self.client.try_disconnect() {
            warn!(target: "gw.publish", error = %err, "mqtt_disconnect_failed");
            handle.abort();
            return;
        }
        let abort = handle.abort_handle();
        if tokio::time::timeout(DISCONNECT_TIMEOUT, handle).await.is_err() {
            abort.abort();
        }
        info!(target: "gw.publish", "mqtt_disconnected");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn room_topic_joins_prefix() {
        assert_eq!(room_topic("telemetry", "01"), "telemetry/01");
        assert_eq!(room_topic("site/a/", "01"), "site/a/01");
        assert_eq!(room_topic("", "01"), "01");
    }

    #[tokio::test]
    async fn noop_publisher_accepts_everything() {
        let publisher = NoopPublisher;
        publisher.publish("01", b"{}".to_vec()).await.expect("publish");
        publisher.disconnect().await;
    }

    #[tokio::test]
    async fn connect_fails_without_broker() {
        let config = MqttPublisherConfig {
            host: "127.0.0.1".to_string(),
            port: 1,
            username: None,
            password: None,
            client_id: "room-gateway-test".to_string(),
            topic_prefix: "telemetry".to_string(),
            connect_timeout: Duration::from_millis(500),
        };
        let err = MqttPublisher::connect(config).await.err().expect("error");
        assert!(matches!(err, PublishError::Connect(_)));
    }
}
