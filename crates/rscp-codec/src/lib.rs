//! Tag-value data model and frame codec of the E3/DC RSCP protocol.
//!
//! A frame carries a sequence of [`RscpValue`] nodes. Each node is either a
//! typed scalar or a container of further nodes. Encryption is not handled
//! here; see the `rscp-connection` crate.

mod frame;
mod tags;
mod value;

use thiserror::Error;

pub use frame::{
    frame_length, pack_frame, pack_frame_at, unpack_frame, Frame, CRC_LEN, FRAME_HEADER_LEN,
    FRAME_MAGIC,
};
pub use tags::Tag;
pub use value::{decode_values, encode_values, DataType, RscpValue, Value};

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("missing RSCP magic at frame start (found {0:#06x})")]
    InvalidMagic(u16),
    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u8),
    #[error("frame incomplete: need {needed} bytes, have {available}")]
    Incomplete { needed: usize, available: usize },
    #[error("frame checksum mismatch (expected {expected:#010x}, computed {computed:#010x})")]
    ChecksumMismatch { expected: u32, computed: u32 },
    #[error("unexpected end of data while decoding {context}")]
    UnexpectedEnd { context: &'static str },
    #[error("unknown data type {code:#04x} for tag {tag}")]
    UnknownDataType { tag: Tag, code: u8 },
    #[error("tag {tag} declares type {actual:?} but {expected:?} is expected")]
    TypeMismatch {
        tag: Tag,
        expected: DataType,
        actual: DataType,
    },
    #[error("tag {tag} of type {data_type:?} has invalid length {length}")]
    InvalidLength {
        tag: Tag,
        data_type: DataType,
        length: usize,
    },
    #[error("payload of {0} bytes does not fit the 16 bit length field")]
    LengthOverflow(usize),
    #[error("containers nested deeper than {0} levels")]
    NestingTooDeep(usize),
}
