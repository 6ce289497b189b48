//! Connection lifecycle over QUIC: framing on the control stream, datagrams,
//! and reconnection with bounded exponential backoff (§3, §4.2).

mod backoff;
mod error;
mod manager;
mod options;
mod state;
mod verifier;

pub use backoff::{next_delay, ReconnectPolicy};
pub use error::TransportError;
pub use manager::ConnectionManager;
pub use options::ConnectOptions;
pub use state::{CloseOrError, ConnectionStatus};
pub use verifier::{CertificateHash, PinnedHashVerifier};
