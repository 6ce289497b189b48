//! The orchestrator (§4.3): owns the document and awareness handles, binds
//! them to a [`ConnectionManager`], runs the sync handshake, and exposes the
//! public observable surface.

use std::cell::RefCell;
use std::net::SocketAddr;
use std::rc::Rc;
use std::time::Duration;

use bytes::Bytes;
use compio_log::{debug, warn};
use y_sync::awareness::Awareness;
use yrs::{Doc as YrsDoc, Origin, UpdateSubscription};

use collab_awareness::{AwarenessPipeline, AwarenessPipelineOptions};
use collab_transport::{
    CloseOrError, ConnectOptions, ConnectionManager, ConnectionStatus, ReconnectPolicy,
    TransportError,
};
use collab_wire::MessageTag;

use crate::document::Document;
use crate::error::ProviderError;
use crate::events::EventCallbacks;
use crate::options::ProviderOptions;
use crate::sync;

struct Inner {
    server_label: String,
    room_name: String,
    document: Document,
    awareness: Rc<RefCell<Awareness>>,
    awareness_pipeline: Option<AwarenessPipeline>,
    awareness_options: AwarenessPipelineOptions,
    connection: ConnectionManager,
    synced: bool,
    last_status: ConnectionStatus,
    destroyed: bool,
    origin: Origin,
    resync_interval: Duration,
    callbacks: EventCallbacks,
    _update_subscription: Option<UpdateSubscription>,
}

/// Binds a local replica of a CRDT document to a remote relay (§1).
///
/// `server_addr`/`server_name` identify the relay's QUIC endpoint directly:
/// §6 models this crate's consumed transport as bound to an `https://` URL
/// with a `/collab/{room}` path, which presumes an HTTP/WebTransport layer
/// this crate does not have over raw QUIC. `room_name` is carried as
/// descriptive provider state (returned from [`Provider::room_name`]) rather
/// than encoded into the wire protocol, which has no room field of its own —
/// the caller is expected to resolve a room to the relay endpoint that
/// serves it before constructing a `Provider`.
#[derive(Clone)]
pub struct Provider {
    inner: Rc<RefCell<Inner>>,
}

impl Provider {
    pub fn new(
        server_addr: SocketAddr,
        server_name: impl Into<String>,
        room_name: impl Into<String>,
        doc: Rc<YrsDoc>,
        options: ProviderOptions,
    ) -> Self {
        let server_name = server_name.into();
        let room_name = room_name.into();
        let document = Document::new(doc.clone());

        let awareness = options
            .awareness
            .clone()
            .unwrap_or_else(|| Rc::new(RefCell::new(Awareness::new((*doc).clone()))));

        let mut connect_options = ConnectOptions::new(server_addr, server_name.clone());
        connect_options.server_certificate_hashes = options.server_certificate_hashes.clone();
        connect_options.reconnect = ReconnectPolicy {
            max_attempts: options.max_reconnect_attempts,
            base_delay: options.reconnect_base_delay,
            max_delay: options.reconnect_max_delay,
        };
        let connection = ConnectionManager::new(connect_options);

        // A token unique to this provider instance, used to recognize (and
        // suppress) echoes of our own applied remote updates (§9 "Origin
        // tagging").
        let origin = Origin::from(Rc::as_ptr(&doc) as usize as u64);

        let inner = Rc::new(RefCell::new(Inner {
            server_label: format!("{server_name}@{server_addr}"),
            room_name,
            document,
            awareness,
            awareness_pipeline: None,
            awareness_options: AwarenessPipelineOptions {
                use_datagrams: options.use_unreliable_awareness,
                broadcast_interval: options.awareness_update_interval,
                stale_threshold: Duration::from_secs(10),
            },
            connection,
            synced: false,
            last_status: ConnectionStatus::Disconnected,
            destroyed: false,
            origin,
            resync_interval: options.resync_interval,
            callbacks: EventCallbacks::default(),
            _update_subscription: None,
        }));

        let provider = Self { inner };
        provider.wire_connection_callbacks();
        provider.wire_document_subscription();

        if options.resync_interval > Duration::ZERO {
            provider.spawn_resync_task();
        }

        if options.connect {
            let provider = provider.clone();
            compio_runtime::spawn(async move {
                let _ = provider.connect().await;
            })
            .detach();
        }

        provider
    }

    fn wire_connection_callbacks(&self) {
        let connection = self.inner.borrow().connection.clone();

        let p = self.clone();
        connection.on_status(move |status| p.handle_status(status));

        let p = self.clone();
        connection.on_stream_message(move |frame| p.handle_stream_frame(&frame));

        let p = self.clone();
        connection.on_datagram(move |datagram| p.handle_datagram(&datagram));

        let p = self.clone();
        connection.on_close_or_error(move |event| p.handle_close_or_error(event));
    }

    fn wire_document_subscription(&self) {
        let p = self.clone();
        let document = self.inner.borrow().document.clone();
        let subscription = document
            .observe_update(move |txn, event| {
                let origin = &p.inner.borrow().origin;
                if txn.origin() == Some(origin) {
                    return;
                }
                p.handle_local_update(event.update.clone());
            })
            .expect("document update subscription");
        self.inner.borrow_mut()._update_subscription = Some(subscription);
    }

    fn spawn_resync_task(&self) {
        let p = self.clone();
        compio_runtime::spawn(async move {
            loop {
                let (interval, destroyed) = {
                    let inner = p.inner.borrow();
                    (inner.resync_interval, inner.destroyed)
                };
                if destroyed {
                    return;
                }
                compio_runtime::time::sleep(interval).await;
                let (connection, document, connected, destroyed) = {
                    let inner = p.inner.borrow();
                    (
                        inner.connection.clone(),
                        inner.document.clone(),
                        inner.last_status == ConnectionStatus::Connected,
                        inner.destroyed,
                    )
                };
                if destroyed {
                    return;
                }
                if connected {
                    let step1 = sync::encode_sync_step1(&document);
                    let _ = connection.send_sync_message(&step1).await;
                }
            }
        })
        .detach();
    }

    fn handle_local_update(&self, update: Vec<u8>) {
        let (connected, connection) = {
            let inner = self.inner.borrow();
            (
                inner.last_status == ConnectionStatus::Connected,
                inner.connection.clone(),
            )
        };
        if !connected {
            debug!("local update dropped while disconnected ({} bytes)", update.len());
            return;
        }
        let frame = sync::encode_update(&update);
        compio_runtime::spawn(async move {
            let _ = connection.send_sync_message(&frame).await;
        })
        .detach();
    }

    fn handle_status(&self, status: ConnectionStatus) {
        let previous = {
            let mut inner = self.inner.borrow_mut();
            let previous = inner.last_status;
            inner.last_status = status;
            if let Some(cb) = inner.callbacks.status.as_mut() {
                cb(status);
            }
            previous
        };

        match status {
            ConnectionStatus::Connected => self.start_handshake(),
            ConnectionStatus::Disconnected if previous == ConnectionStatus::Connected => {
                self.mark_unsynced();
            }
            _ => {}
        }
    }

    /// §4.3 "Sync handshake": start the awareness pipeline, then send
    /// sync-step-1.
    fn start_handshake(&self) {
        if let Some(old) = self.inner.borrow_mut().awareness_pipeline.take() {
            old.stop();
        }

        let (awareness, awareness_options, document, connection) = {
            let inner = self.inner.borrow();
            (
                inner.awareness.clone(),
                inner.awareness_options,
                inner.document.clone(),
                inner.connection.clone(),
            )
        };

        let stream_conn = connection.clone();
        let send_stream = move |bytes: Bytes| {
            let connection = stream_conn.clone();
            compio_runtime::spawn(async move {
                let _ = connection.send_sync_message(&bytes).await;
            })
            .detach();
        };
        let datagram_conn = connection.clone();
        let send_datagram = move |bytes: Bytes| datagram_conn.send_datagram(bytes);

        let mut pipeline = AwarenessPipeline::new(awareness, awareness_options, send_stream, send_datagram);
        pipeline.start();
        self.inner.borrow_mut().awareness_pipeline = Some(pipeline);

        let step1 = sync::encode_sync_step1(&document);
        compio_runtime::spawn(async move {
            let _ = connection.send_sync_message(&step1).await;
        })
        .detach();
    }

    fn mark_unsynced(&self) {
        let was_synced = {
            let mut inner = self.inner.borrow_mut();
            std::mem::replace(&mut inner.synced, false)
        };
        if was_synced {
            self.emit_synced(false);
        }
    }

    fn handle_stream_frame(&self, frame: &[u8]) {
        let Some((tag, body)) = collab_wire::untag_message(frame) else {
            warn!("empty stream frame discarded");
            return;
        };
        match MessageTag::from_byte(tag) {
            Some(MessageTag::SyncStep1) => self.handle_sync_step1(body),
            Some(MessageTag::SyncStep2) => self.handle_sync_step2(body),
            Some(MessageTag::Update) => self.handle_update(body),
            Some(MessageTag::Awareness) => self.handle_awareness_frame(body),
            None => {
                let err = ProviderError::ProtocolViolation { tag };
                debug!("{err}");
            }
        }
    }

    fn handle_sync_step1(&self, body: &[u8]) {
        let (document, connection, synced) = {
            let inner = self.inner.borrow();
            (inner.document.clone(), inner.connection.clone(), inner.synced)
        };
        match sync::handle_sync_step1(&document, body) {
            Ok(Some(reply)) => {
                let conn = connection.clone();
                compio_runtime::spawn(async move {
                    let _ = conn.send_sync_message(&reply).await;
                })
                .detach();
            }
            Ok(None) => {}
            Err(err) => warn!("failed to compute sync diff: {err}"),
        }
        if !synced {
            let step1 = sync::encode_sync_step1(&document);
            compio_runtime::spawn(async move {
                let _ = connection.send_sync_message(&step1).await;
            })
            .detach();
        }
    }

    fn handle_sync_step2(&self, body: &[u8]) {
        let (document, origin) = {
            let inner = self.inner.borrow();
            (inner.document.clone(), inner.origin.clone())
        };
        if let Err(err) = sync::apply_remote_update(&document, body, origin) {
            warn!("failed to apply sync-step-2 update: {err}");
            return;
        }
        let newly_synced = {
            let mut inner = self.inner.borrow_mut();
            if inner.synced {
                false
            } else {
                inner.synced = true;
                true
            }
        };
        if newly_synced {
            self.emit_synced(true);
            self.emit_sync(true);
        }
    }

    fn handle_update(&self, body: &[u8]) {
        let (document, origin) = {
            let inner = self.inner.borrow();
            (inner.document.clone(), inner.origin.clone())
        };
        if let Err(err) = sync::apply_remote_update(&document, body, origin) {
            warn!("failed to apply update: {err}");
        }
    }

    fn handle_awareness_frame(&self, body: &[u8]) {
        let inner = self.inner.borrow();
        if let Some(pipeline) = inner.awareness_pipeline.as_ref() {
            if let Err(err) = pipeline.handle_stream_frame(body) {
                warn!("malformed awareness frame: {err}");
            }
        }
    }

    fn handle_datagram(&self, datagram: &[u8]) {
        match collab_wire::decode_awareness_datagram(datagram) {
            Ok((client_id, clock, state)) => {
                let inner = self.inner.borrow();
                if let Some(pipeline) = inner.awareness_pipeline.as_ref() {
                    pipeline.handle_datagram(client_id, clock, &state);
                }
            }
            Err(err) => debug!("dropping malformed awareness datagram: {err}"),
        }
    }

    fn handle_close_or_error(&self, event: CloseOrError) {
        let mut inner = self.inner.borrow_mut();
        match event {
            CloseOrError::Closed { code, reason } => {
                if let Some(cb) = inner.callbacks.connection_close.as_mut() {
                    cb(code, &reason);
                }
            }
            CloseOrError::Error(err) => {
                if let Some(cb) = inner.callbacks.connection_error.as_mut() {
                    cb(&err);
                }
            }
        }
    }

    fn emit_synced(&self, value: bool) {
        let mut inner = self.inner.borrow_mut();
        if let Some(cb) = inner.callbacks.synced.as_mut() {
            cb(value);
        }
    }

    fn emit_sync(&self, value: bool) {
        let mut inner = self.inner.borrow_mut();
        if let Some(cb) = inner.callbacks.sync.as_mut() {
            cb(value);
        }
    }

    pub fn on_status(&self, f: impl FnMut(ConnectionStatus) + 'static) {
        self.inner.borrow_mut().callbacks.status = Some(Box::new(f));
    }

    pub fn on_synced(&self, f: impl FnMut(bool) + 'static) {
        self.inner.borrow_mut().callbacks.synced = Some(Box::new(f));
    }

    pub fn on_sync(&self, f: impl FnMut(bool) + 'static) {
        self.inner.borrow_mut().callbacks.sync = Some(Box::new(f));
    }

    pub fn on_connection_error(&self, f: impl FnMut(&TransportError) + 'static) {
        self.inner.borrow_mut().callbacks.connection_error = Some(Box::new(f));
    }

    pub fn on_connection_close(&self, f: impl FnMut(u16, &str) + 'static) {
        self.inner.borrow_mut().callbacks.connection_close = Some(Box::new(f));
    }

    pub async fn connect(&self) -> Result<(), ProviderError> {
        if self.inner.borrow().destroyed {
            return Err(ProviderError::Transport(TransportError::Destroyed));
        }
        let connection = self.inner.borrow().connection.clone();
        connection.connect().await?;
        Ok(())
    }

    pub fn disconnect(&self) {
        self.inner.borrow().connection.disconnect();
    }

    /// Idempotent (§4.3 "Destruction").
    pub fn destroy(&self) {
        let mut inner = self.inner.borrow_mut();
        if inner.destroyed {
            return;
        }
        inner.destroyed = true;
        if let Some(pipeline) = inner.awareness_pipeline.take() {
            pipeline.destroy();
        }
        inner.connection.destroy();
        inner._update_subscription = None;
    }

    pub fn server_url(&self) -> String {
        self.inner.borrow().server_label.clone()
    }

    pub fn room_name(&self) -> String {
        self.inner.borrow().room_name.clone()
    }

    pub fn doc(&self) -> Document {
        self.inner.borrow().document.clone()
    }

    pub fn awareness(&self) -> Rc<RefCell<Awareness>> {
        self.inner.borrow().awareness.clone()
    }

    pub fn connected(&self) -> bool {
        self.inner.borrow().last_status == ConnectionStatus::Connected
    }

    pub fn synced(&self) -> bool {
        self.inner.borrow().synced
    }
}
