/// Connection lifecycle state (§3, §4.2).
///
/// `Connected` is the only variant that implies the control stream is open
/// and its stream-type marker has been written; every send primitive checks
/// for it before touching the stream writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    Disconnected,
    Reconnecting,
}

/// Payload of the close/error callback slot (§2, §4.2).
#[derive(Debug)]
pub enum CloseOrError {
    /// The transport's close future resolved with this code and reason.
    Closed { code: u16, reason: String },
    /// A transport-level error occurred; the manager has already begun its
    /// reconnect path by the time this fires.
    Error(crate::TransportError),
}
