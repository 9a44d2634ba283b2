use std::time::{SystemTime, UNIX_EPOCH};

use bytes::{Buf, BufMut, BytesMut};
use crc::{Crc, CRC_32_ISO_HDLC};
use tracing::warn;

use crate::value::{decode_values, encode_values};
use crate::{CodecError, RscpValue};

pub const FRAME_MAGIC: u16 = 0xE3DC;
/// magic (2) + control (2) + seconds (8) + nanoseconds (4) + data length (2)
pub const FRAME_HEADER_LEN: usize = 18;
pub const CRC_LEN: usize = 4;

const PROTOCOL_VERSION: u8 = 0x01;
const CTRL_CRC_FLAG: u16 = 0x0010;
const CTRL_VERSION_MASK: u16 = 0x000F;
const DATA_LENGTH_OFFSET: usize = 16;

const CHECKSUM: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// A decoded frame: send time as stamped by the sender plus the top-level nodes.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub seconds: i64,
    pub nanos: u32,
    pub values: Vec<RscpValue>,
}

/// Packs `values` into a checksummed frame stamped with the current time.
pub fn pack_frame(values: &[RscpValue]) -> Result<Vec<u8>, CodecError> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    let seconds = i64::try_from(now.as_secs()).unwrap_or(i64::MAX);
    pack_frame_at(values, seconds, now.subsec_nanos())
}

pub fn pack_frame_at(values: &[RscpValue], seconds: i64, nanos: u32) -> Result<Vec<u8>, CodecError> {
    let data = encode_values(values)?;
    let data_len = u16::try_from(data.len()).map_err(|_| CodecError::LengthOverflow(data.len()))?;

    let mut out = BytesMut::with_capacity(FRAME_HEADER_LEN + data.len() + CRC_LEN);
    out.put_u16_le(FRAME_MAGIC);
    out.put_u16_le(CTRL_CRC_FLAG | u16::from(PROTOCOL_VERSION));
    out.put_i64_le(seconds);
    out.put_u32_le(nanos);
    out.put_u16_le(data_len);
    out.put_slice(&data);

    let crc = CHECKSUM.checksum(&out);
    out.put_u32_le(crc);

    Ok(out.to_vec())
}

/// Total frame size declared by the header at the start of `buf`, checksum included.
///
/// Returns `None` while fewer than [`FRAME_HEADER_LEN`] bytes are available. Only the
/// header is inspected, so the result may exceed `buf.len()`; such a frame has not
/// been fully received yet.
pub fn frame_length(buf: &[u8]) -> Option<usize> {
    if buf.len() < FRAME_HEADER_LEN {
        return None;
    }
    let ctrl = u16::from_le_bytes([buf[2], buf[3]]);
    let data_len = u16::from_le_bytes([buf[DATA_LENGTH_OFFSET], buf[DATA_LENGTH_OFFSET + 1]]);
    let crc_len = if ctrl & CTRL_CRC_FLAG != 0 { CRC_LEN } else { 0 };
    Some(FRAME_HEADER_LEN + usize::from(data_len) + crc_len)
}

/// Decodes the frame at the start of `buf`. Bytes after the declared frame length
/// (e.g. cipher padding) are ignored.
pub fn unpack_frame(buf: &[u8]) -> Result<Frame, CodecError> {
    let total = frame_length(buf).ok_or(CodecError::Incomplete {
        needed: FRAME_HEADER_LEN,
        available: buf.len(),
    })?;
    if buf.len() < total {
        return Err(CodecError::Incomplete {
            needed: total,
            available: buf.len(),
        });
    }

    let mut header = &buf[..FRAME_HEADER_LEN];
    let magic = header.get_u16_le();
    if magic != FRAME_MAGIC {
        return Err(CodecError::InvalidMagic(magic));
    }
    let ctrl = header.get_u16_le();
    let version = (ctrl & CTRL_VERSION_MASK) as u8;
    if version != PROTOCOL_VERSION {
        return Err(CodecError::UnsupportedVersion(version));
    }
    let seconds = header.get_i64_le();
    let nanos = header.get_u32_le();
    let data_len = usize::from(header.get_u16_le());

    let data_end = FRAME_HEADER_LEN + data_len;
    if ctrl & CTRL_CRC_FLAG != 0 {
        let mut trailer = &buf[data_end..data_end + CRC_LEN];
        let expected = trailer.get_u32_le();
        let computed = CHECKSUM.checksum(&buf[..data_end]);
        if expected != computed {
            warn!(expected, computed, "frame checksum mismatch");
            return Err(CodecError::ChecksumMismatch { expected, computed });
        }
    }

    let values = decode_values(&buf[FRAME_HEADER_LEN..data_end])?;
    Ok(Frame {
        seconds,
        nanos,
        values,
    })
}
