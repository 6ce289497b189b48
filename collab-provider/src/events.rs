//! The provider's observable surface (§4.3 "Events"): four nullable callback
//! slots, the same cost/complexity tradeoff the connection manager makes
//! (§9 "Callbacks vs. event bus") rather than a full pub/sub bus.

use collab_transport::{ConnectionStatus, TransportError};

pub(crate) type StatusCallback = Box<dyn FnMut(ConnectionStatus)>;
pub(crate) type SyncedCallback = Box<dyn FnMut(bool)>;
pub(crate) type ConnectionErrorCallback = Box<dyn FnMut(&TransportError)>;
pub(crate) type ConnectionCloseCallback = Box<dyn FnMut(u16, &str)>;

#[derive(Default)]
pub(crate) struct EventCallbacks {
    pub status: Option<StatusCallback>,
    pub synced: Option<SyncedCallback>,
    /// Compatibility alias for `synced`, fired only on the `true` edge.
    pub sync: Option<SyncedCallback>,
    pub connection_error: Option<ConnectionErrorCallback>,
    pub connection_close: Option<ConnectionCloseCallback>,
}
