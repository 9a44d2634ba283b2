use std::fmt;

use bytes::{Buf, BufMut, BytesMut};
use tracing::{debug, warn};

use crate::{CodecError, Tag};

/// Size of a node header: tag (u32), type (u8), length (u16).
const NODE_HEADER_LEN: usize = 7;
const MAX_NESTING: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DataType {
    None = 0x00,
    Bool = 0x01,
    Char8 = 0x02,
    UChar8 = 0x03,
    Int16 = 0x04,
    Uint16 = 0x05,
    Int32 = 0x06,
    Uint32 = 0x07,
    Int64 = 0x08,
    Uint64 = 0x09,
    Float32 = 0x0A,
    Double64 = 0x0B,
    Bitfield = 0x0C,
    CString = 0x0D,
    Container = 0x0E,
    Timestamp = 0x0F,
    ByteArray = 0x10,
    Error = 0xFF,
}

impl DataType {
    pub fn from_code(code: u8) -> Option<Self> {
        let data_type = match code {
            0x00 => Self::None,
            0x01 => Self::Bool,
            0x02 => Self::Char8,
            0x03 => Self::UChar8,
            0x04 => Self::Int16,
            0x05 => Self::Uint16,
            0x06 => Self::Int32,
            0x07 => Self::Uint32,
            0x08 => Self::Int64,
            0x09 => Self::Uint64,
            0x0A => Self::Float32,
            0x0B => Self::Double64,
            0x0C => Self::Bitfield,
            0x0D => Self::CString,
            0x0E => Self::Container,
            0x0F => Self::Timestamp,
            0x10 => Self::ByteArray,
            0xFF => Self::Error,
            _ => return None,
        };
        Some(data_type)
    }

    pub fn code(self) -> u8 {
        self as u8
    }

    /// Payload width for fixed-size types.
    pub fn fixed_width(self) -> Option<usize> {
        match self {
            Self::None => Some(0),
            Self::Bool | Self::Char8 | Self::UChar8 | Self::Bitfield => Some(1),
            Self::Int16 | Self::Uint16 => Some(2),
            Self::Int32 | Self::Uint32 | Self::Float32 | Self::Error => Some(4),
            Self::Int64 | Self::Uint64 | Self::Double64 => Some(8),
            Self::Timestamp => Some(12),
            Self::CString | Self::Container | Self::ByteArray => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    None,
    Bool(bool),
    Char8(i8),
    UChar8(u8),
    Int16(i16),
    Uint16(u16),
    Int32(i32),
    Uint32(u32),
    Int64(i64),
    Uint64(u64),
    Float32(f32),
    Double64(f64),
    Bitfield(u8),
    CString(String),
    Container(Vec<RscpValue>),
    Timestamp { seconds: i64, nanos: i32 },
    ByteArray(Vec<u8>),
    /// Error code sent by the device instead of the requested value.
    Error(u32),
}

impl Value {
    pub fn data_type(&self) -> DataType {
        match self {
            Self::None => DataType::None,
            Self::Bool(_) => DataType::Bool,
            Self::Char8(_) => DataType::Char8,
            Self::UChar8(_) => DataType::UChar8,
            Self::Int16(_) => DataType::Int16,
            Self::Uint16(_) => DataType::Uint16,
            Self::Int32(_) => DataType::Int32,
            Self::Uint32(_) => DataType::Uint32,
            Self::Int64(_) => DataType::Int64,
            Self::Uint64(_) => DataType::Uint64,
            Self::Float32(_) => DataType::Float32,
            Self::Double64(_) => DataType::Double64,
            Self::Bitfield(_) => DataType::Bitfield,
            Self::CString(_) => DataType::CString,
            Self::Container(_) => DataType::Container,
            Self::Timestamp { .. } => DataType::Timestamp,
            Self::ByteArray(_) => DataType::ByteArray,
            Self::Error(_) => DataType::Error,
        }
    }

    /// Integer view of any integral scalar.
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Self::Char8(v) => Some(i64::from(v)),
            Self::UChar8(v) | Self::Bitfield(v) => Some(i64::from(v)),
            Self::Int16(v) => Some(i64::from(v)),
            Self::Uint16(v) => Some(i64::from(v)),
            Self::Int32(v) => Some(i64::from(v)),
            Self::Uint32(v) => Some(i64::from(v)),
            Self::Int64(v) => Some(v),
            Self::Uint64(v) => i64::try_from(v).ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Self::Float32(v) => Some(f64::from(v)),
            Self::Double64(v) => Some(v),
            _ => self.as_i64().map(|v| v as f64),
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match *self {
            Self::Bool(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::CString(v) => Some(v.as_str()),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::ByteArray(v) => Some(v.as_slice()),
            _ => None,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    fn payload_len(&self) -> usize {
        match self {
            Self::CString(v) => v.len(),
            Self::ByteArray(v) => v.len(),
            Self::Container(children) => children.iter().map(RscpValue::encoded_len).sum(),
            other => other.data_type().fixed_width().unwrap_or(0),
        }
    }
}

/// One node of the RSCP value tree.
#[derive(Debug, Clone, PartialEq)]
pub struct RscpValue {
    pub tag: Tag,
    pub value: Value,
}

impl RscpValue {
    pub fn new(tag: Tag, value: Value) -> Self {
        Self { tag, value }
    }

    /// A request without payload, e.g. `EMS_REQ_POWER_PV`.
    pub fn request(tag: Tag) -> Self {
        Self::new(tag, Value::None)
    }

    pub fn container(tag: Tag, children: Vec<RscpValue>) -> Self {
        Self::new(tag, Value::Container(children))
    }

    pub fn is_container(&self) -> bool {
        matches!(self.value, Value::Container(_))
    }

    /// Child nodes of a container; empty for scalars.
    pub fn children(&self) -> &[RscpValue] {
        match &self.value {
            Value::Container(children) => children,
            _ => &[],
        }
    }

    /// First direct child with the given tag.
    pub fn child(&self, tag: Tag) -> Option<&RscpValue> {
        self.children().iter().find(|child| child.tag == tag)
    }

    /// Follows `path` through nested containers starting at the top-level `values`.
    pub fn find_by_path<'a>(values: &'a [RscpValue], path: &[Tag]) -> Option<&'a RscpValue> {
        let (first, rest) = path.split_first()?;
        let node = values.iter().find(|value| value.tag == *first)?;
        if rest.is_empty() {
            Some(node)
        } else {
            Self::find_by_path(node.children(), rest)
        }
    }

    /// Bytes this node occupies on the wire, header included.
    pub fn encoded_len(&self) -> usize {
        NODE_HEADER_LEN + self.value.payload_len()
    }

    fn encode_into(&self, out: &mut BytesMut) -> Result<(), CodecError> {
        let data_type = self.value.data_type();
        if let Some(expected) = self.tag.expected_type() {
            if data_type != expected && data_type != DataType::Error {
                return Err(CodecError::TypeMismatch {
                    tag: self.tag,
                    expected,
                    actual: data_type,
                });
            }
        }

        let payload_len = self.value.payload_len();
        let length = u16::try_from(payload_len).map_err(|_| CodecError::LengthOverflow(payload_len))?;

        out.put_u32_le(self.tag.code());
        out.put_u8(data_type.code());
        out.put_u16_le(length);

        match &self.value {
            Value::None => {}
            Value::Bool(v) => out.put_u8(u8::from(*v)),
            Value::Char8(v) => out.put_i8(*v),
            Value::UChar8(v) | Value::Bitfield(v) => out.put_u8(*v),
            Value::Int16(v) => out.put_i16_le(*v),
            Value::Uint16(v) => out.put_u16_le(*v),
            Value::Int32(v) => out.put_i32_le(*v),
            Value::Uint32(v) | Value::Error(v) => out.put_u32_le(*v),
            Value::Int64(v) => out.put_i64_le(*v),
            Value::Uint64(v) => out.put_u64_le(*v),
            Value::Float32(v) => out.put_f32_le(*v),
            Value::Double64(v) => out.put_f64_le(*v),
            Value::CString(v) => out.put_slice(v.as_bytes()),
            Value::ByteArray(v) => out.put_slice(v),
            Value::Timestamp { seconds, nanos } => {
                out.put_i64_le(*seconds);
                out.put_i32_le(*nanos);
            }
            Value::Container(children) => {
                for child in children {
                    child.encode_into(out)?;
                }
            }
        }

        Ok(())
    }

    fn decode(buf: &[u8], depth: usize) -> Result<(Self, usize), CodecError> {
        if buf.len() < NODE_HEADER_LEN {
            return Err(CodecError::UnexpectedEnd {
                context: "node header",
            });
        }

        let mut header = &buf[..NODE_HEADER_LEN];
        let tag = Tag(header.get_u32_le());
        let type_code = header.get_u8();
        let length = usize::from(header.get_u16_le());

        let data_type = DataType::from_code(type_code).ok_or(CodecError::UnknownDataType {
            tag,
            code: type_code,
        })?;

        match tag.expected_type() {
            Some(expected) if data_type != expected && data_type != DataType::Error => {
                return Err(CodecError::TypeMismatch {
                    tag,
                    expected,
                    actual: data_type,
                });
            }
            None if !tag.is_known() => {
                debug!(%tag, ?data_type, "decoding tag outside the known namespace");
            }
            _ => {}
        }

        let end = NODE_HEADER_LEN + length;
        if buf.len() < end {
            warn!(%tag, length, available = buf.len() - NODE_HEADER_LEN, "node payload truncated");
            return Err(CodecError::UnexpectedEnd {
                context: "node payload",
            });
        }

        if let Some(width) = data_type.fixed_width() {
            if width != length {
                return Err(CodecError::InvalidLength {
                    tag,
                    data_type,
                    length,
                });
            }
        }

        let mut payload = &buf[NODE_HEADER_LEN..end];
        let value = match data_type {
            DataType::None => Value::None,
            DataType::Bool => Value::Bool(payload.get_u8() != 0),
            DataType::Char8 => Value::Char8(payload.get_i8()),
            DataType::UChar8 => Value::UChar8(payload.get_u8()),
            DataType::Int16 => Value::Int16(payload.get_i16_le()),
            DataType::Uint16 => Value::Uint16(payload.get_u16_le()),
            DataType::Int32 => Value::Int32(payload.get_i32_le()),
            DataType::Uint32 => Value::Uint32(payload.get_u32_le()),
            DataType::Int64 => Value::Int64(payload.get_i64_le()),
            DataType::Uint64 => Value::Uint64(payload.get_u64_le()),
            DataType::Float32 => Value::Float32(payload.get_f32_le()),
            DataType::Double64 => Value::Double64(payload.get_f64_le()),
            DataType::Bitfield => Value::Bitfield(payload.get_u8()),
            DataType::Error => Value::Error(payload.get_u32_le()),
            DataType::Timestamp => Value::Timestamp {
                seconds: payload.get_i64_le(),
                nanos: payload.get_i32_le(),
            },
            DataType::CString => Value::CString(String::from_utf8_lossy(payload).into_owned()),
            DataType::ByteArray => Value::ByteArray(payload.to_vec()),
            DataType::Container => {
                if depth >= MAX_NESTING {
                    return Err(CodecError::NestingTooDeep(MAX_NESTING));
                }
                Value::Container(decode_sequence(payload, depth + 1)?)
            }
        };

        Ok((Self { tag, value }, end))
    }
}

impl fmt::Display for RscpValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            Value::Container(children) => {
                write!(f, "{} {{", self.tag)?;
                for (idx, child) in children.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, " {child}")?;
                }
                write!(f, " }}")
            }
            Value::None => write!(f, "{}", self.tag),
            Value::CString(v) => write!(f, "{}: {v:?}", self.tag),
            Value::Error(code) => write!(f, "{}: error {code:#x}", self.tag),
            other => write!(f, "{}: {other:?}", self.tag),
        }
    }
}

/// Serializes a node sequence without frame header.
///
/// Nodes whose type disagrees with their tag are rejected, as on decode.
pub fn encode_values(values: &[RscpValue]) -> Result<Vec<u8>, CodecError> {
    let capacity = values.iter().map(RscpValue::encoded_len).sum();
    let mut out = BytesMut::with_capacity(capacity);
    for value in values {
        value.encode_into(&mut out)?;
    }
    Ok(out.to_vec())
}

/// Parses a node sequence without frame header. The buffer must hold whole nodes.
pub fn decode_values(buf: &[u8]) -> Result<Vec<RscpValue>, CodecError> {
    decode_sequence(buf, 0)
}

fn decode_sequence(buf: &[u8], depth: usize) -> Result<Vec<RscpValue>, CodecError> {
    let mut offset = 0usize;
    let mut values = Vec::new();
    while offset < buf.len() {
        let (value, consumed) = RscpValue::decode(&buf[offset..], depth)?;
        values.push(value);
        offset += consumed;
    }
    Ok(values)
}
