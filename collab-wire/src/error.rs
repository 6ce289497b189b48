use thiserror::Error;

/// Failures raised by the pure codec functions in this crate.
///
/// Both variants are total failures over the input, never partial: a caller
/// either gets a fully encoded/decoded value or one of these.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum WireError {
    /// Attempted to encode a stream frame payload larger than [`crate::MAX_FRAME_LEN`].
    #[error("frame payload of {len} bytes exceeds the {max}-byte limit")]
    FrameTooLarge {
        /// Size of the payload that was rejected.
        len: usize,
        /// The limit it was rejected against.
        max: usize,
    },
    /// A datagram was shorter than the fixed 8-byte header.
    #[error("datagram of {len} bytes is shorter than the {header}-byte header")]
    DatagramTooShort {
        /// Size of the datagram that was rejected.
        len: usize,
        /// The header size it was rejected against.
        header: usize,
    },
}
