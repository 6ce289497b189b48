//! Pure, I/O-free framing for the collab QUIC wire protocol.
//!
//! Two encodings live here (§4.1 of the design): length-prefixed frames for
//! the reliable control stream, and a fixed 8-byte header for unreliable
//! awareness datagrams. Nothing in this crate touches a socket, a buffer
//! pool, or an async runtime — every function is pure and total over its
//! byte-slice input.

mod datagram;
mod error;
mod frame;
mod message;

pub use datagram::{decode_awareness_datagram, encode_awareness_datagram, DATAGRAM_HEADER_LEN};
pub use error::WireError;
pub use frame::{decode_frames, encode_frame, MAX_FRAME_LEN};
pub use message::{tag_message, untag_message, MessageTag, STREAM_TYPE_SYNC};
