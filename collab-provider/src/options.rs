use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use collab_transport::CertificateHash;
use y_sync::awareness::Awareness;

/// §6 "Configuration options (enumerated)".
pub struct ProviderOptions {
    /// External instance to bind (default: construct fresh, bound to the
    /// supplied document).
    pub awareness: Option<Rc<RefCell<Awareness>>>,
    /// Auto-connect on construction.
    pub connect: bool,
    /// Required for self-signed relays; forwarded verbatim to
    /// `collab_transport::ConnectOptions`.
    pub server_certificate_hashes: Vec<CertificateHash>,
    /// Enable the datagram half of the awareness pipeline.
    pub use_unreliable_awareness: bool,
    /// Datagram broadcast period.
    pub awareness_update_interval: Duration,
    pub max_reconnect_attempts: u32,
    pub reconnect_base_delay: Duration,
    pub reconnect_max_delay: Duration,
    /// Periodic re-send of sync-step-1; `Duration::ZERO` disables it. Named
    /// "outside this core" by the design this crate follows, but cheap
    /// ambient insurance against a handshake reply silently lost.
    pub resync_interval: Duration,
    /// Caller-supplied, verbatim query-string key/values. Carried for API
    /// completeness; this binding talks raw QUIC rather than an `https://`
    /// URL (see `Provider::new`'s doc comment), so there is no query string
    /// for these to attach to. Kept so callers migrating from a URL-based
    /// binding have somewhere to put them.
    pub params: Vec<(String, String)>,
}

impl Default for ProviderOptions {
    fn default() -> Self {
        Self {
            awareness: None,
            connect: true,
            server_certificate_hashes: Vec::new(),
            use_unreliable_awareness: true,
            awareness_update_interval: Duration::from_millis(50),
            max_reconnect_attempts: 10,
            reconnect_base_delay: Duration::from_millis(1000),
            reconnect_max_delay: Duration::from_millis(30_000),
            resync_interval: Duration::ZERO,
            params: Vec::new(),
        }
    }
}
