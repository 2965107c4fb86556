//! BACnet/IP 报文编解码（仅 ReadProperty 所需部分）。
//!
//! 帧结构：
//!
//! ```text
//! BVLC (0x81, function, length16) | NPDU (version, control, [DNET/SNET]) | APDU
//! ```

use crate::error::ProtocolError;

/// BACnet/IP 默认 UDP 端口（0xBAC0）
pub const BACNET_DEFAULT_PORT: u16 = 47808;

/// analog-value 对象类型
pub const OBJECT_ANALOG_VALUE: u16 = 2;

/// present-value 属性
pub const PROPERTY_PRESENT_VALUE: u32 = 85;

/// 对象实例号最大值（22 位）
pub const MAX_INSTANCE: u32 = 0x3F_FFFF;

const BVLC_TYPE_BIP: u8 = 0x81;
const BVLC_FORWARDED_NPDU: u8 = 0x04;
const BVLC_ORIGINAL_UNICAST: u8 = 0x0A;
const BVLC_ORIGINAL_BROADCAST: u8 = 0x0B;
const BVLC_HEADER_LEN: usize = 4;

const NPDU_VERSION: u8 = 0x01;
const NPDU_NETWORK_MESSAGE: u8 = 0x80;
const NPDU_DNET_PRESENT: u8 = 0x20;
const NPDU_SNET_PRESENT: u8 = 0x08;
const NPDU_EXPECTING_REPLY: u8 = 0x04;

const PDU_CONFIRMED_REQUEST: u8 = 0x0;
const PDU_COMPLEX_ACK: u8 = 0x3;
const PDU_ERROR: u8 = 0x5;
const PDU_REJECT: u8 = 0x6;
const PDU_ABORT: u8 = 0x7;
const PDU_SEGMENTED: u8 = 0x08;

/// 最大可接收 APDU：1476 字节
const MAX_APDU_1476: u8 = 0x05;

const SERVICE_READ_PROPERTY: u8 = 0x0C;

/// 对象标识（类型 + 实例号）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectId {
    pub object_type: u16,
    pub instance: u32,
}

impl ObjectId {
    pub fn analog_value(instance: u32) -> Self {
        Self {
            object_type: OBJECT_ANALOG_VALUE,
            instance,
        }
    }

    fn to_u32(self) -> u32 {
        (u32::from(self.object_type & 0x03FF) << 22) | (self.instance & MAX_INSTANCE)
    }

    fn from_u32(raw: u32) -> Self {
        Self {
            object_type: (raw >> 22) as u16,
            instance: raw & MAX_INSTANCE,
        }
    }
}

/// 应用层标记值
#[derive(Debug, Clone, PartialEq)]
pub enum BacnetValue {
    Null,
    Boolean(bool),
    Unsigned(u64),
    Signed(i64),
    Real(f32),
    Double(f64),
    CharacterString(String),
    Enumerated(u32),
    /// 未解析的其他应用标记
    Other { tag: u8, len: usize },
}

impl BacnetValue {
    /// 将各种数值宽度统一为 `f64`。
    pub fn as_f64(&self) -> Result<f64, ProtocolError> {
        match self {
            Self::Real(v) => Ok(f64::from(*v)),
            Self::Double(v) => Ok(*v),
            Self::Unsigned(v) => Ok(*v as f64),
            Self::Signed(v) => Ok(*v as f64),
            other => Err(ProtocolError::UnsupportedValue(other.kind().to_string())),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Boolean(_) => "boolean",
            Self::Unsigned(_) => "unsigned",
            Self::Signed(_) => "signed",
            Self::Real(_) => "real",
            Self::Double(_) => "double",
            Self::CharacterString(_) => "character-string",
            Self::Enumerated(_) => "enumerated",
            Self::Other { .. } => "other",
        }
    }
}

/// ReadProperty 请求
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadPropertyRequest {
    pub invoke_id: u8,
    pub object: ObjectId,
    pub property: u32,
}

/// ReadProperty 应答
#[derive(Debug, Clone, PartialEq)]
pub struct ReadPropertyAck {
    pub object: ObjectId,
    pub property: u32,
    pub array_index: Option<u32>,
    pub values: Vec<BacnetValue>,
}

/// 解码后的响应帧
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    ReadProperty { invoke_id: u8, ack: ReadPropertyAck },
    Error { invoke_id: u8, class: u32, code: u32 },
    Reject { invoke_id: u8, reason: u8 },
    Abort { invoke_id: u8, reason: u8 },
    /// 与本客户端请求无关的帧（Who-Is、网络层报文等）
    Ignored,
}

impl Response {
    pub fn invoke_id(&self) -> Option<u8> {
        match self {
            Self::ReadProperty { invoke_id, .. }
            | Self::Error { invoke_id, .. }
            | Self::Reject { invoke_id, .. }
            | Self::Abort { invoke_id, .. } => Some(*invoke_id),
            Self::Ignored => None,
        }
    }
}

/// 编码 ReadProperty 确认请求（数组索引省略，即读取全部）。
pub fn encode_read_property(request: &ReadPropertyRequest) -> Vec<u8> {
    let mut apdu = vec![
        PDU_CONFIRMED_REQUEST << 4,
        MAX_APDU_1476,
        request.invoke_id,
        SERVICE_READ_PROPERTY,
    ];
    encode_context_u32(&mut apdu, 0, request.object.to_u32(), true);
    encode_context_u32(&mut apdu, 1, request.property, false);

    let mut frame = Vec::with_capacity(BVLC_HEADER_LEN + 2 + apdu.len());
    let length = (BVLC_HEADER_LEN + 2 + apdu.len()) as u16;
    frame.push(BVLC_TYPE_BIP);
    frame.push(BVLC_ORIGINAL_UNICAST);
    frame.extend_from_slice(&length.to_be_bytes());
    frame.push(NPDU_VERSION);
    frame.push(NPDU_EXPECTING_REPLY);
    frame.extend_from_slice(&apdu);
    frame
}

/// 上下文标记的无符号整数；`fixed4` 用于对象标识（固定 4 字节）。
fn encode_context_u32(out: &mut Vec<u8>, tag: u8, value: u32, fixed4: bool) {
    let bytes = value.to_be_bytes();
    let skip = if fixed4 {
        0
    } else {
        bytes.iter().take(3).take_while(|b| **b == 0).count()
    };
    let len = (4 - skip) as u8;
    out.push((tag << 4) | 0x08 | len);
    out.extend_from_slice(&bytes[skip..]);
}

/// 解码一个 BACnet/IP 响应帧。
pub fn decode_response(frame: &[u8]) -> Result<Response, ProtocolError> {
    let npdu = strip_bvlc(frame)?;
    let Some(apdu) = strip_npdu(npdu)? else {
        return Ok(Response::Ignored);
    };
    decode_apdu(apdu)
}

fn strip_bvlc(frame: &[u8]) -> Result<&[u8], ProtocolError> {
    if frame.len() < BVLC_HEADER_LEN {
        return Err(ProtocolError::InsufficientData {
            expected: BVLC_HEADER_LEN,
            actual: frame.len(),
        });
    }
    if frame[0] != BVLC_TYPE_BIP {
        return Err(ProtocolError::Decode(format!(
            "not a BACnet/IP frame: 0x{:02x}",
            frame[0]
        )));
    }
    let length = u16::from_be_bytes([frame[2], frame[3]]) as usize;
    if length < BVLC_HEADER_LEN || length > frame.len() {
        return Err(ProtocolError::Decode(format!(
            "bvlc length {} does not match frame of {} bytes",
            length,
            frame.len()
        )));
    }
    let frame = &frame[..length];
    match frame[1] {
        BVLC_ORIGINAL_UNICAST | BVLC_ORIGINAL_BROADCAST => Ok(&frame[BVLC_HEADER_LEN..]),
        // 转发帧在头部后带 6 字节原始 B/IP 地址
        BVLC_FORWARDED_NPDU => frame
            .get(BVLC_HEADER_LEN + 6..)
            .ok_or_else(|| ProtocolError::Decode("truncated forwarded npdu".to_string())),
        _ => Ok(&[]),
    }
}

/// 去掉 NPDU 头；网络层报文返回 `None`。
fn strip_npdu(npdu: &[u8]) -> Result<Option<&[u8]>, ProtocolError> {
    if npdu.is_empty() {
        return Ok(None);
    }
    let mut reader = Reader::new(npdu);
    let version = reader.u8()?;
    if version != NPDU_VERSION {
        return Err(ProtocolError::Decode(format!(
            "unsupported npdu version {}",
            version
        )));
    }
    let control = reader.u8()?;
    if control & NPDU_NETWORK_MESSAGE != 0 {
        return Ok(None);
    }
    if control & NPDU_DNET_PRESENT != 0 {
        reader.take(2)?;
        let dlen = reader.u8()? as usize;
        reader.take(dlen)?;
    }
    if control & NPDU_SNET_PRESENT != 0 {
        reader.take(2)?;
        let slen = reader.u8()? as usize;
        reader.take(slen)?;
    }
    if control & NPDU_DNET_PRESENT != 0 {
        // hop count
        reader.u8()?;
    }
    Ok(Some(reader.rest()))
}

fn decode_apdu(apdu: &[u8]) -> Result<Response, ProtocolError> {
    let mut reader = Reader::new(apdu);
    let first = reader.u8()?;
    match first >> 4 {
        PDU_COMPLEX_ACK => {
            if first & PDU_SEGMENTED != 0 {
                return Err(ProtocolError::Decode(
                    "segmented complex ack not supported".to_string(),
                ));
            }
            let invoke_id = reader.u8()?;
            let service = reader.u8()?;
            if service != SERVICE_READ_PROPERTY {
                return Ok(Response::Ignored);
            }
            let ack = decode_read_property_ack(&mut reader)?;
            Ok(Response::ReadProperty { invoke_id, ack })
        }
        PDU_ERROR => {
            let invoke_id = reader.u8()?;
            let _service = reader.u8()?;
            let class = read_enumerated(&mut reader)?;
            let code = read_enumerated(&mut reader)?;
            Ok(Response::Error {
                invoke_id,
                class,
                code,
            })
        }
        PDU_REJECT => Ok(Response::Reject {
            invoke_id: reader.u8()?,
            reason: reader.u8()?,
        }),
        PDU_ABORT => Ok(Response::Abort {
            invoke_id: reader.u8()?,
            reason: reader.u8()?,
        }),
        _ => Ok(Response::Ignored),
    }
}

fn decode_read_property_ack(reader: &mut Reader<'_>) -> Result<ReadPropertyAck, ProtocolError> {
    let object = match reader.header()? {
        Header::Value {
            number: 0,
            context: true,
            len: 4,
        } => ObjectId::from_u32(reader.unsigned(4)? as u32),
        other => return Err(unexpected("object identifier", other)),
    };
    let property = match reader.header()? {
        Header::Value {
            number: 1,
            context: true,
            len,
        } => reader.unsigned(len)? as u32,
        other => return Err(unexpected("property identifier", other)),
    };

    let mut array_index = None;
    let mut next = reader.header()?;
    if let Header::Value {
        number: 2,
        context: true,
        len,
    } = next
    {
        array_index = Some(reader.unsigned(len)? as u32);
        next = reader.header()?;
    }
    if next != Header::Opening(3) {
        return Err(unexpected("opening tag 3", next));
    }

    let mut values = Vec::new();
    loop {
        match reader.header()? {
            Header::Closing(3) => break,
            Header::Boolean(value) => values.push(BacnetValue::Boolean(value)),
            Header::Value {
                number,
                context: false,
                len,
            } => values.push(read_application_value(reader, number, len)?),
            Header::Value {
                number,
                context: true,
                len,
            } => {
                reader.take(len)?;
                values.push(BacnetValue::Other { tag: number, len });
            }
            other => return Err(unexpected("application value", other)),
        }
    }

    Ok(ReadPropertyAck {
        object,
        property,
        array_index,
        values,
    })
}

fn read_application_value(
    reader: &mut Reader<'_>,
    number: u8,
    len: usize,
) -> Result<BacnetValue, ProtocolError> {
    let value = match number {
        0 => BacnetValue::Null,
        2 => BacnetValue::Unsigned(reader.unsigned(len)?),
        3 => BacnetValue::Signed(reader.signed(len)?),
        4 => {
            let bytes = reader.array::<4>(len)?;
            BacnetValue::Real(f32::from_be_bytes(bytes))
        }
        5 => {
            let bytes = reader.array::<8>(len)?;
            BacnetValue::Double(f64::from_be_bytes(bytes))
        }
        7 => {
            let raw = reader.take(len)?;
            // 首字节为字符集，0 = UTF-8
            let text = raw.get(1..).unwrap_or_default();
            BacnetValue::CharacterString(String::from_utf8_lossy(text).into_owned())
        }
        9 => BacnetValue::Enumerated(reader.unsigned(len)? as u32),
        tag => {
            reader.take(len)?;
            BacnetValue::Other { tag, len }
        }
    };
    Ok(value)
}

fn read_enumerated(reader: &mut Reader<'_>) -> Result<u32, ProtocolError> {
    match reader.header()? {
        Header::Value {
            number: 9,
            context: false,
            len,
        } => Ok(reader.unsigned(len)? as u32),
        other => Err(unexpected("enumerated", other)),
    }
}

fn unexpected(expected: &str, found: Header) -> ProtocolError {
    ProtocolError::Decode(format!("expected {}, found {:?}", expected, found))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Header {
    Value { number: u8, context: bool, len: usize },
    /// 应用标记 Boolean 的值编码在长度位中
    Boolean(bool),
    Opening(u8),
    Closing(u8),
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], ProtocolError> {
        let end = self.pos.checked_add(n).filter(|end| *end <= self.buf.len());
        let Some(end) = end else {
            return Err(ProtocolError::InsufficientData {
                expected: self.pos.saturating_add(n),
                actual: self.buf.len(),
            });
        };
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, ProtocolError> {
        Ok(self.take(1)?[0])
    }

    fn rest(&self) -> &'a [u8] {
        &self.buf[self.pos..]
    }

    fn array<const N: usize>(&mut self, len: usize) -> Result<[u8; N], ProtocolError> {
        if len != N {
            return Err(ProtocolError::Decode(format!(
                "expected {} value bytes, found {}",
                N, len
            )));
        }
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn unsigned(&mut self, len: usize) -> Result<u64, ProtocolError> {
        if len == 0 || len > 8 {
            return Err(ProtocolError::Decode(format!(
                "invalid unsigned length {}",
                len
            )));
        }
        Ok(self
            .take(len)?
            .iter()
            .fold(0u64, |acc, b| (acc << 8) | u64::from(*b)))
    }

    fn signed(&mut self, len: usize) -> Result<i64, ProtocolError> {
        let raw = self.unsigned(len)?;
        let shift = 64 - (len as u32) * 8;
        // 符号扩展
        Ok(((raw << shift) as i64) >> shift)
    }

    fn header(&mut self) -> Result<Header, ProtocolError> {
        let first = self.u8()?;
        let mut number = first >> 4;
        let context = first & 0x08 != 0;
        let lvt = first & 0x07;
        if number == 0x0F {
            number = self.u8()?;
        }
        if context && lvt == 6 {
            return Ok(Header::Opening(number));
        }
        if context && lvt == 7 {
            return Ok(Header::Closing(number));
        }
        if !context && number == 1 {
            return Ok(Header::Boolean(lvt != 0));
        }
        let len = if lvt == 5 {
            match self.u8()? {
                254 => u16::from_be_bytes(self.array::<2>(2)?) as usize,
                255 => u32::from_be_bytes(self.array::<4>(4)?) as usize,
                short => short as usize,
            }
        } else {
            lvt as usize
        };
        Ok(Header::Value {
            number,
            context,
            len,
        })
    }
}
