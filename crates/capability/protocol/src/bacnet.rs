//! BACnet/IP 客户端与适配器。
//!
//! 单个 UDP 套接字服务所有 BACnet 设备，请求在客户端内部串行化：
//! 同一时刻最多一个 ReadProperty 在途，应答按 invoke id 匹配。

use crate::bacnet_codec::{
    BACNET_DEFAULT_PORT, MAX_INSTANCE, ObjectId, PROPERTY_PRESENT_VALUE, ReadPropertyRequest,
    Response, decode_response, encode_read_property,
};
use crate::error::ProtocolError;
use crate::resolver::DeviceResolver;
use async_trait::async_trait;
use domain::SensorDescriptor;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::Mutex;
use tokio::time::{Instant, timeout_at};
use tracing::{debug, info};

const MAX_FRAME_LEN: usize = 1500;

/// BACnet 报文收发通道
#[async_trait]
pub trait BacnetTransport: Send {
    async fn send_to(&mut self, frame: &[u8], target: SocketAddr) -> Result<(), ProtocolError>;

    async fn recv_from(&mut self, buf: &mut [u8]) -> Result<(usize, SocketAddr), ProtocolError>;
}

/// 基于 UDP 的 BACnet/IP 传输
pub struct UdpTransport {
    socket: UdpSocket,
}

impl UdpTransport {
    pub async fn bind(addr: &str) -> Result<Self, ProtocolError> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|e| ProtocolError::Connection(format!("bind {}: {}", addr, e)))?;
        Ok(Self { socket })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ProtocolError> {
        Ok(self.socket.local_addr()?)
    }
}

#[async_trait]
impl BacnetTransport for UdpTransport {
    async fn send_to(&mut self, frame: &[u8], target: SocketAddr) -> Result<(), ProtocolError> {
        self.socket.send_to(frame, target).await?;
        Ok(())
    }

    async fn recv_from(&mut self, buf: &mut [u8]) -> Result<(usize, SocketAddr), ProtocolError> {
        Ok(self.socket.recv_from(buf).await?)
    }
}

struct Session {
    transport: Box<dyn BacnetTransport>,
    invoke_id: u8,
}

impl Session {
    fn next_invoke_id(&mut self) -> u8 {
        let id = self.invoke_id;
        self.invoke_id = self.invoke_id.wrapping_add(1);
        id
    }
}

/// BACnet 客户端（ReadProperty）
pub struct BacnetClient {
    session: Mutex<Option<Session>>,
    timeout: Duration,
}

impl BacnetClient {
    /// 绑定本地 UDP 端口。
    pub async fn bind(bind_addr: &str, timeout: Duration) -> Result<Self, ProtocolError> {
        let transport = UdpTransport::bind(bind_addr).await?;
        info!(
            target: "gw.protocol",
            local_addr = %transport.local_addr()?,
            timeout_ms = timeout.as_millis() as u64,
            "bacnet_client_bound"
        );
        Ok(Self::with_transport(Box::new(transport), timeout))
    }

    pub fn with_transport(transport: Box<dyn BacnetTransport>, timeout: Duration) -> Self {
        Self {
            session: Mutex::new(Some(Session {
                transport,
                invoke_id: 0,
            })),
            timeout,
        }
    }

    /// 读取 analog-value 对象的 present-value。
    pub async fn read_present_value(
        &self,
        target: SocketAddr,
        instance: u32,
    ) -> Result<f64, ProtocolError> {
        let mut guard = self.session.lock().await;
        let session = guard.as_mut().ok_or(ProtocolError::NotInitialized("bacnet"))?;

        let invoke_id = session.next_invoke_id();
        let frame = encode_read_property(&ReadPropertyRequest {
            invoke_id,
            object: ObjectId::analog_value(instance),
            property: PROPERTY_PRESENT_VALUE,
        });
        session.transport.send_to(&frame, target).await?;

        let deadline = Instant::now() + self.timeout;
        let mut buf = [0u8; MAX_FRAME_LEN];
        loop {
            let (len, from) = timeout_at(deadline, session.transport.recv_from(&mut buf))
                .await
                .map_err(|_| {
                    ProtocolError::Timeout(format!(
                        "no reply from {} for analog-value {}",
                        target, instance
                    ))
                })??;

            let response = match decode_response(&buf[..len]) {
                Ok(response) => response,
                Err(e) => {
                    debug!(target: "gw.protocol", from = %from, error = %e, "bacnet_frame_dropped");
                    continue;
                }
            };
            if from != target || response.invoke_id() != Some(invoke_id) {
                debug!(
                    target: "gw.protocol",
                    from = %from,
                    expected = invoke_id,
                    received = ?response.invoke_id(),
                    "bacnet_reply_ignored"
                );
                continue;
            }
            return into_value(response);
        }
    }

    /// 释放套接字；之后的读取返回 `NotInitialized`。
    pub async fn close(&self) {
        if self.session.lock().await.take().is_some() {
            info!(target: "gw.protocol", "bacnet_client_closed");
        }
    }
}

fn into_value(response: Response) -> Result<f64, ProtocolError> {
    match response {
        Response::ReadProperty { ack, .. } => ack
            .values
            .first()
            .ok_or(ProtocolError::NoData)?
            .as_f64(),
        Response::Error { class, code, .. } => Err(ProtocolError::Bacnet(format!(
            "error class {} code {}",
            class, code
        ))),
        Response::Reject { reason, .. } => {
            Err(ProtocolError::Bacnet(format!("reject reason {}", reason)))
        }
        Response::Abort { reason, .. } => {
            Err(ProtocolError::Bacnet(format!("abort reason {}", reason)))
        }
        Response::Ignored => Err(ProtocolError::NoData),
    }
}

/// BACnet 传感器适配器：地址解析 + present-value 读取。
pub struct BacnetAdapter {
    client: BacnetClient,
    resolver: DeviceResolver,
}

impl BacnetAdapter {
    pub fn new(client: BacnetClient) -> Self {
        Self {
            client,
            resolver: DeviceResolver::new(BACNET_DEFAULT_PORT),
        }
    }

    pub async fn read(&self, sensor: &SensorDescriptor) -> Result<f64, ProtocolError> {
        let instance = sensor
            .object_id
            .ok_or_else(|| ProtocolError::InvalidPoint(format!("{}: missing object_id", sensor.id)))?;
        if instance > MAX_INSTANCE {
            return Err(ProtocolError::InvalidPoint(format!(
                "{}: object instance {} out of range",
                sensor.id, instance
            )));
        }
        let device = self.resolver.resolve(&sensor.address).await?;
        self.client.read_present_value(device.addr, instance).await
    }

    pub fn resolver(&self) -> &DeviceResolver {
        &self.resolver
    }

    pub async fn close(&self) {
        self.client.close().await;
    }
}


#[cfg(test)]
mod tests {
    use super::fake::FakeTransport;
    use super::*;
    use crate::bacnet_codec::BacnetValue;
    use crate::bacnet_codec::test_frames::{abort, error, read_property_ack};
    use domain::{ProtocolTag, SemanticType};

    const TIMEOUT: Duration = Duration::from_secs(3);

    fn peer() -> SocketAddr {
        "127.0.0.1:47808".parse().unwrap()
    }

    fn sensor(object_id: Option<u32>) -> SensorDescriptor {
        SensorDescriptor {
            id: "temp-01".to_string(),
            semantic_type: SemanticType::Temperature,
            protocol: ProtocolTag::Bacnet,
            address: "127.0.0.1".to_string(),
            object_id,
            register: None,
            unit: "C".to_string(),
            poll_interval_ms: 1000,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_present_value_skips_mismatched_invoke_id() {
        let transport = FakeTransport::new(|invoke_id| {
            vec![
                vec![0x81, 0x0A, 0x00, 0x02],
                read_property_ack(invoke_id.wrapping_add(9), 1, &[BacnetValue::Real(99.0)]),
                read_property_ack(invoke_id, 1, &[BacnetValue::Real(21.5)]),
            ]
        });
        let client = BacnetClient::with_transport(Box::new(transport), TIMEOUT);
        let value = client.read_present_value(peer(), 1).await.unwrap();
        assert_eq!(value, 21.5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invoke_id_advances_per_request() {
        let transport = FakeTransport::new(|invoke_id| {
            vec![read_property_ack(invoke_id, 1, &[BacnetValue::Unsigned(400)])]
        });
        let sent = transport.sent.clone();
        let client = BacnetClient::with_transport(Box::new(transport), TIMEOUT);
        client.read_present_value(peer(), 1).await.unwrap();
        client.read_present_value(peer(), 1).await.unwrap();
        let sent = sent.lock().unwrap();
        assert_eq!(sent[0].0[8], 0);
        assert_eq!(sent[1].0[8], 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_reply_maps_to_bacnet_error() {
        let transport = FakeTransport::new(|invoke_id| vec![error(invoke_id, 2, 31)]);
        let client = BacnetClient::with_transport(Box::new(transport), TIMEOUT);
        let err = client.read_present_value(peer(), 7).await.unwrap_err();
        assert!(matches!(err, ProtocolError::Bacnet(_)));

        let transport = FakeTransport::new(|invoke_id| vec![abort(invoke_id, 4)]);
        let client = BacnetClient::with_transport(Box::new(transport), TIMEOUT);
        let err = client.read_present_value(peer(), 7).await.unwrap_err();
        assert!(matches!(err, ProtocolError::Bacnet(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_and_non_numeric_values() {
        let transport = FakeTransport::new(|invoke_id| vec![read_property_ack(invoke_id, 1, &[])]);
        let client = BacnetClient::with_transport(Box::new(transport), TIMEOUT);
        let err = client.read_present_value(peer(), 1).await.unwrap_err();
        assert!(matches!(err, ProtocolError::NoData));

        let transport = FakeTransport::new(|invoke_id| {
            vec![read_property_ack(
                invoke_id,
                1,
                &[BacnetValue::CharacterString("warm".to_string())],
            )]
        });
        let client = BacnetClient::with_transport(Box::new(transport), TIMEOUT);
        let err = client.read_present_value(peer(), 1).await.unwrap_err();
        assert!(matches!(err, ProtocolError::UnsupportedValue(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_times_out_without_reply() {
        let transport = FakeTransport::new(|_| Vec::new());
        let client = BacnetClient::with_transport(Box::new(transport), TIMEOUT);
        let err = client.read_present_value(peer(), 1).await.unwrap_err();
        assert!(matches!(err, ProtocolError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_closed_client_is_not_initialized() {
        let transport = FakeTransport::new(|_| Vec::new());
        let client = BacnetClient::with_transport(Box::new(transport), TIMEOUT);
        client.close().await;
        let err = client.read_present_value(peer(), 1).await.unwrap_err();
        assert!(matches!(err, ProtocolError::NotInitialized("bacnet")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_adapter_resolves_device_with_default_port() {
        let transport = FakeTransport::new(|invoke_id| {
            vec![read_property_ack(invoke_id, 12, &[BacnetValue::Real(45.0)])]
        });
        let sent = transport.sent.clone();
        let adapter = BacnetAdapter::new(BacnetClient::with_transport(Box::new(transport), TIMEOUT));

        assert_eq!(adapter.read(&sensor(Some(12))).await.unwrap(), 45.0);
        assert_eq!(adapter.read(&sensor(Some(12))).await.unwrap(), 45.0);
        assert_eq!(sent.lock().unwrap()[0].1, peer());
        assert_eq!(adapter.resolver().resolution_count(), 1);
    }

    #[tokio::test]
    async fn test_adapter_rejects_invalid_points() {
        let transport = FakeTransport::new(|_| Vec::new());
        let adapter = BacnetAdapter::new(BacnetClient::with_transport(Box::new(transport), TIMEOUT));
        assert!(matches!(
            adapter.read(&sensor(None)).await,
            Err(ProtocolError::InvalidPoint(_))
        ));
        assert!(matches!(
            adapter.read(&sensor(Some(MAX_INSTANCE + 1))).await,
            Err(ProtocolError::InvalidPoint(_))
        ));
    }
}
