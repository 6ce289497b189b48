use thiserror::Error;

/// Failure modes of the connection manager (§7).
#[derive(Debug, Error)]
pub enum TransportError {
    /// The host environment lacks QUIC-bidirectional-transport support.
    /// Raised only from [`crate::ConnectionManager::connect`]; not retryable.
    #[error("QUIC bidirectional transport is not supported on this host")]
    Unsupported,

    /// The manager has been destroyed; every entry point refuses after that.
    #[error("connection manager has been destroyed")]
    Destroyed,

    /// Framing error raised from a public send primitive, propagated to the
    /// caller rather than swallowed (§7).
    #[error(transparent)]
    Wire(#[from] collab_wire::WireError),

    /// Binding or I/O failure underneath the QUIC socket.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failure to initiate a QUIC connection attempt.
    #[error("failed to start QUIC connection: {0}")]
    Connect(#[from] compio_quic::ConnectError),

    /// The QUIC connection closed or failed after being established.
    #[error("QUIC connection error: {0}")]
    Connection(#[from] compio_quic::ConnectionError),

    /// Failed to open the control stream on an otherwise live connection.
    #[error("failed to open control stream: {0}")]
    OpenStream(#[from] compio_quic::OpenStreamError),

    /// Failed to write to the control stream.
    #[error("control stream write error: {0}")]
    Write(#[from] compio_quic::WriteError),

    /// Re-signaled to the direct caller of `connect()` after the original
    /// error (not `Clone`) was already consumed by the reconnect path's
    /// close/error callback.
    #[error("connection attempt failed: {0}")]
    ConnectFailed(String),
}
