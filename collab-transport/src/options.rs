use std::net::SocketAddr;
use std::time::Duration;

use crate::backoff::ReconnectPolicy;
use crate::verifier::CertificateHash;

/// Parameters for [`crate::ConnectionManager::connect`] (§4.2, §6).
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub remote: SocketAddr,
    pub server_name: String,
    /// Pinned certificate hashes for relays behind a self-signed leaf.
    /// Empty means fall back to ordinary WebPKI validation.
    pub server_certificate_hashes: Vec<CertificateHash>,
    pub alpn_protocols: Vec<Vec<u8>>,
    pub reconnect: ReconnectPolicy,
    /// Upper bound on how long a stalled handshake or silent peer is
    /// tolerated before the connection is treated as failed and the
    /// reconnect policy takes over. Not part of the spec's enumerated
    /// options; without it an unreachable relay would hang indefinitely
    /// instead of ever reaching `disconnected`.
    pub idle_timeout: Duration,
}

impl ConnectOptions {
    pub fn new(remote: SocketAddr, server_name: impl Into<String>) -> Self {
        Self {
            remote,
            server_name: server_name.into(),
            server_certificate_hashes: Vec::new(),
            alpn_protocols: vec![b"collab".to_vec()],
            reconnect: ReconnectPolicy::default(),
            idle_timeout: Duration::from_secs(10),
        }
    }
}
