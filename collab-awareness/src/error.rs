use thiserror::Error;

/// Failure modes of the awareness pipeline (§4.4, §7).
#[derive(Debug, Error)]
pub enum AwarenessError {
    /// A received datagram was shorter than the fixed 8-byte header.
    #[error(transparent)]
    Wire(#[from] collab_wire::WireError),

    /// The external awareness codec rejected a stream or datagram payload.
    #[error("malformed awareness update: {0}")]
    Codec(#[from] y_sync::awareness::Error),
}
