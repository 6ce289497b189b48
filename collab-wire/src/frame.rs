use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::WireError;

/// Largest payload that fits in a single stream frame (§4.1).
pub const MAX_FRAME_LEN: usize = u16::MAX as usize;

/// Length of the big-endian length prefix.
const HEADER_LEN: usize = 2;

/// Encode `payload` as a length-prefixed stream frame.
///
/// Fails with [`WireError::FrameTooLarge`] rather than truncating or
/// splitting — a frame is either sent whole or not at all.
pub fn encode_frame(payload: &[u8]) -> Result<Bytes, WireError> {
    if payload.len() > MAX_FRAME_LEN {
        return Err(WireError::FrameTooLarge {
            len: payload.len(),
            max: MAX_FRAME_LEN,
        });
    }
    let mut buf = BytesMut::with_capacity(HEADER_LEN + payload.len());
    buf.put_u16(payload.len() as u16);
    buf.put_slice(payload);
    Ok(buf.freeze())
}

/// Drain as many complete frames as possible from `buf`, in order.
///
/// This is the incremental half of the codec: `buf` is the reassembly
/// buffer (§3) a caller feeds arbitrary byte chunks into as they arrive on
/// the stream. Anything left over — a partial length header, or a header
/// whose body hasn't fully arrived — stays in `buf` untouched, ready for
/// the next call. No partial frame is ever returned.
pub fn decode_frames(buf: &mut BytesMut) -> Vec<Bytes> {
    let mut frames = Vec::new();
    loop {
        if buf.len() < HEADER_LEN {
            break;
        }
        let len = u16::from_be_bytes([buf[0], buf[1]]) as usize;
        if buf.len() < HEADER_LEN + len {
            break;
        }
        buf.advance(HEADER_LEN);
        frames.push(buf.split_to(len).freeze());
    }
    frames
}
