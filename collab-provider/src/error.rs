use thiserror::Error;

/// Failure modes of the provider's fallible surface (§7). Once connected, the
/// steady state surfaces faults as events rather than `Result`s; this enum is
/// populated mainly at construction and at `connect()`.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error(transparent)]
    Transport(#[from] collab_transport::TransportError),

    #[error(transparent)]
    Awareness(#[from] collab_awareness::AwarenessError),

    #[error("malformed state vector or update: {0}")]
    Document(String),

    /// Unknown message tag on the control stream (§7 `ProtocolViolation`).
    /// Never propagated to a caller — logged and discarded at the dispatch
    /// site (§4.3 "On any unknown tag: log and discard").
    #[error("unknown message tag {tag:#04x}")]
    ProtocolViolation { tag: u8 },
}
