//! The connection manager (§4.2): owns the transport, the control stream,
//! and the datagram endpoints, and drives reconnection.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use compio_io::{AsyncRead, AsyncWriteExt};
use compio_log::{debug, error, warn};
use compio_quic::{ClientBuilder, Endpoint, VarInt};
use compio_runtime::time::sleep;
use rand::Rng;
use rustls::crypto::CryptoProvider;

use crate::backoff::next_delay;
use crate::error::TransportError;
use crate::options::ConnectOptions;
use crate::state::{CloseOrError, ConnectionStatus};
use crate::verifier::PinnedHashVerifier;
use collab_wire::{decode_frames, encode_frame, STREAM_TYPE_SYNC};

const CLOSE_CODE_CLIENT_DISCONNECT: u16 = 1000;

type StatusCallback = Box<dyn FnMut(ConnectionStatus)>;
type StreamMessageCallback = Box<dyn FnMut(Bytes)>;
type DatagramCallback = Box<dyn FnMut(Bytes)>;
type CloseOrErrorCallback = Box<dyn FnMut(CloseOrError)>;

struct Callbacks {
    status: Option<StatusCallback>,
    stream_message: Option<StreamMessageCallback>,
    datagram: Option<DatagramCallback>,
    close_or_error: Option<CloseOrErrorCallback>,
}

impl Default for Callbacks {
    fn default() -> Self {
        Self {
            status: None,
            stream_message: None,
            datagram: None,
            close_or_error: None,
        }
    }
}

struct Inner {
    options: ConnectOptions,
    status: ConnectionStatus,
    destroyed: bool,
    attempts: u32,
    /// Bumped every time the current connection is replaced or torn down
    /// (a fresh `connect_inner`, or a manager-initiated `disconnect`).
    /// Background tasks capture the epoch their connection was born into
    /// and compare it before reacting to a close/error, so a deliberate
    /// `disconnect()` can never be mistaken for one of its own tasks as a
    /// fault worth reconnecting from.
    epoch: u64,
    connection: Option<Rc<compio_quic::Connection>>,
    writer: Option<compio_quic::SendStream>,
    send_queue: VecDeque<Bytes>,
    sending: bool,
    callbacks: Callbacks,
}

/// Owns a single QUIC connection attempt at a time and the reconnect loop
/// that replaces it (§3, §4.2). Single-threaded: callers are expected to
/// drive it from one cooperative runner, so `Rc<RefCell<_>>` is sufficient.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Rc<RefCell<Inner>>,
}

impl ConnectionManager {
    pub fn new(options: ConnectOptions) -> Self {
        Self {
            inner: Rc::new(RefCell::new(Inner {
                options,
                status: ConnectionStatus::Disconnected,
                destroyed: false,
                attempts: 0,
                epoch: 0,
                connection: None,
                writer: None,
                send_queue: VecDeque::new(),
                sending: false,
                callbacks: Callbacks::default(),
            })),
        }
    }

    pub fn on_status(&self, f: impl FnMut(ConnectionStatus) + 'static) {
        self.inner.borrow_mut().callbacks.status = Some(Box::new(f));
    }

    pub fn on_stream_message(&self, f: impl FnMut(Bytes) + 'static) {
        self.inner.borrow_mut().callbacks.stream_message = Some(Box::new(f));
    }

    pub fn on_datagram(&self, f: impl FnMut(Bytes) + 'static) {
        self.inner.borrow_mut().callbacks.datagram = Some(Box::new(f));
    }

    pub fn on_close_or_error(&self, f: impl FnMut(CloseOrError) + 'static) {
        self.inner.borrow_mut().callbacks.close_or_error = Some(Box::new(f));
    }

    pub fn status(&self) -> ConnectionStatus {
        self.inner.borrow().status
    }

    fn set_status(&self, status: ConnectionStatus) {
        let mut inner = self.inner.borrow_mut();
        inner.status = status;
        if let Some(cb) = inner.callbacks.status.as_mut() {
            cb(status);
        }
    }

    fn emit_close_or_error(&self, event: CloseOrError) {
        let mut inner = self.inner.borrow_mut();
        if let Some(cb) = inner.callbacks.close_or_error.as_mut() {
            cb(event);
        }
    }

    /// Startup sequence, §4.2 steps 1-8.
    pub async fn connect(&self) -> Result<(), TransportError> {
        if self.inner.borrow().destroyed {
            return Err(TransportError::Destroyed);
        }
        if CryptoProvider::get_default().is_none() {
            return Err(TransportError::Unsupported);
        }

        self.set_status(ConnectionStatus::Connecting);

        match self.connect_inner().await {
            Ok(()) => {
                self.inner.borrow_mut().attempts = 0;
                self.set_status(ConnectionStatus::Connected);
                Ok(())
            }
            Err(err) => {
                warn!("connect attempt failed: {err}");
                let summary = err.to_string();
                let epoch = self.inner.borrow().epoch;
                self.handle_fault(epoch, CloseOrError::Error(err));
                Err(TransportError::ConnectFailed(summary))
            }
        }
    }

    async fn connect_inner(&self) -> Result<(), TransportError> {
        let options = self.inner.borrow().options.clone();

        let endpoint = build_endpoint(&options).await?;
        let connecting = endpoint.connect(options.remote, &options.server_name, None)?;
        let connection = Rc::new(connecting.await?);

        let (mut send, recv) = connection.open_bi()?;
        send.write_all(&[STREAM_TYPE_SYNC]).await?;

        let epoch = {
            let mut inner = self.inner.borrow_mut();
            inner.epoch += 1;
            inner.connection = Some(connection.clone());
            inner.writer = Some(send);
            inner.epoch
        };

        let this = self.clone();
        compio_runtime::spawn(async move { this.run_stream_reader(epoch, recv).await }).detach();

        let this = self.clone();
        let datagram_conn = connection.clone();
        compio_runtime::spawn(async move { this.run_datagram_reader(epoch, datagram_conn).await })
            .detach();

        let this = self.clone();
        compio_runtime::spawn(async move { this.await_close(epoch, connection).await }).detach();

        Ok(())
    }

    fn is_current_epoch(&self, epoch: u64) -> bool {
        let inner = self.inner.borrow();
        !inner.destroyed && inner.epoch == epoch
    }

    async fn run_stream_reader(&self, epoch: u64, mut recv: compio_quic::RecvStream) {
        let mut reassembly = BytesMut::new();
        loop {
            let mut chunk = Vec::with_capacity(64 * 1024);
            match recv.read(&mut chunk).await {
                Ok(Some(n)) => {
                    reassembly.extend_from_slice(&chunk[..n]);
                    for frame in decode_frames(&mut reassembly) {
                        let mut inner = self.inner.borrow_mut();
                        if let Some(cb) = inner.callbacks.stream_message.as_mut() {
                            cb(frame);
                        }
                    }
                }
                Ok(None) => {
                    debug!("control stream closed by peer");
                    break;
                }
                Err(err) => {
                    if self.is_current_epoch(epoch) {
                        error!("control stream read error: {err}");
                        self.handle_fault(epoch, CloseOrError::Error(TransportError::Io(
                            std::io::Error::new(std::io::ErrorKind::Other, err.to_string()),
                        )));
                    }
                    break;
                }
            }
        }
    }

    async fn run_datagram_reader(&self, epoch: u64, connection: Rc<compio_quic::Connection>) {
        loop {
            match connection.recv_datagram().await {
                Ok(datagram) => {
                    if !self.is_current_epoch(epoch) {
                        break;
                    }
                    let mut inner = self.inner.borrow_mut();
                    if let Some(cb) = inner.callbacks.datagram.as_mut() {
                        cb(datagram);
                    }
                }
                Err(err) => {
                    debug!("datagram reader stopped: {err}");
                    break;
                }
            }
        }
    }

    async fn await_close(&self, epoch: u64, connection: Rc<compio_quic::Connection>) {
        let reason = connection.closed().await;
        if !self.is_current_epoch(epoch) {
            // Either destroyed, or this connection was already retired by a
            // manager-initiated `disconnect()`/reconnect — that path already
            // reported its own status and must not be echoed here.
            return;
        }
        let (code, text) = describe_close(&reason);
        self.emit_close_or_error(CloseOrError::Closed {
            code,
            reason: text,
        });
        self.handle_fault(epoch, CloseOrError::Error(TransportError::Connection(reason)));
    }

    /// Reconnect policy (§4.2): only armed from the error/close paths, and
    /// only while the manager has not been destroyed and the fault still
    /// belongs to the connection that is currently current — a fault
    /// reported by a task whose connection has already been superseded or
    /// deliberately disconnected is stale and must not arm a reconnect.
    fn handle_fault(&self, epoch: u64, event: CloseOrError) {
        if !self.is_current_epoch(epoch) {
            return;
        }
        self.emit_close_or_error(event);
        self.inner.borrow_mut().connection = None;
        self.inner.borrow_mut().writer = None;
        self.set_status(ConnectionStatus::Disconnected);

        let attempts = self.inner.borrow().attempts;
        let max_attempts = self.inner.borrow().options.reconnect.max_attempts;
        if attempts >= max_attempts {
            debug!("reconnect attempts exhausted at {attempts}");
            return;
        }

        self.inner.borrow_mut().attempts += 1;
        let attempt = self.inner.borrow().attempts;
        let policy = self.inner.borrow().options.reconnect;
        let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..1000));
        let delay = next_delay(&policy, attempt, jitter);

        self.set_status(ConnectionStatus::Reconnecting);

        let this = self.clone();
        compio_runtime::spawn(async move {
            sleep(delay).await;
            if this.inner.borrow().destroyed {
                return;
            }
            let _ = this.connect().await;
        })
        .detach();
    }

    /// §4.2 send primitives. Frames are queued and written by whichever
    /// call is first to find the queue idle; a send that arrives while
    /// another is still mid-`write_all` enqueues and returns once its own
    /// frame has gone out, rather than racing the first send for the
    /// writer and finding it gone. This is the same queue-not-option shape
    /// `compio_quic::Connection` itself uses to serialize concurrent
    /// stream opens onto one underlying connection.
    pub async fn send_sync_message(&self, payload: &[u8]) -> Result<(), TransportError> {
        let frame = encode_frame(payload)?;
        self.inner.borrow_mut().send_queue.push_back(frame);
        self.drain_send_queue().await;
        Ok(())
    }

    async fn drain_send_queue(&self) {
        if self.inner.borrow().sending {
            return;
        }
        self.inner.borrow_mut().sending = true;
        loop {
            let next = self.inner.borrow_mut().send_queue.pop_front();
            let Some(frame) = next else {
                break;
            };
            let writer = self.inner.borrow_mut().writer.take();
            match writer {
                Some(mut writer) => {
                    let result = writer.write_all(&frame).await;
                    let mut inner = self.inner.borrow_mut();
                    // Only hand the writer back if this connection is still
                    // current; a `disconnect()` that ran while we were
                    // awaiting the write already tore it down.
                    if inner.connection.is_some() {
                        inner.writer = Some(writer);
                    }
                    drop(inner);
                    if let Err(err) = result {
                        warn!("stream write failed: {err}");
                        self.inner.borrow_mut().send_queue.clear();
                        break;
                    }
                }
                None => {
                    debug!("sendSyncMessage dropped: no stream writer held");
                    self.inner.borrow_mut().send_queue.clear();
                    break;
                }
            }
        }
        self.inner.borrow_mut().sending = false;
    }

    pub fn send_datagram(&self, payload: Bytes) {
        let connection = self.inner.borrow().connection.clone();
        if let Some(connection) = connection {
            if let Err(err) = connection.send_datagram(payload) {
                debug!("datagram send dropped: {err}");
            }
        }
    }

    /// §4.2 shutdown: cancel reconnect, close transport, report disconnected.
    /// Bumping `epoch` here is what keeps this deliberate close from being
    /// mistaken for a fault: the reader/close tasks for the retired
    /// connection compare their captured epoch before calling
    /// `handle_fault`, see it's stale, and quietly exit instead of arming a
    /// reconnect or double-reporting the close.
    pub fn disconnect(&self) {
        let connection = {
            let mut inner = self.inner.borrow_mut();
            inner.epoch += 1;
            inner.writer = None;
            inner.send_queue.clear();
            inner.connection.take()
        };
        if let Some(connection) = connection {
            connection.close(
                VarInt::from_u32(CLOSE_CODE_CLIENT_DISCONNECT as u32),
                b"Client disconnect",
            );
        }
        self.set_status(ConnectionStatus::Disconnected);
    }

    pub fn destroy(&self) {
        self.inner.borrow_mut().destroyed = true;
        self.disconnect();
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.borrow().destroyed
    }
}

fn describe_close(reason: &compio_quic::ConnectionError) -> (u16, String) {
    use compio_quic::ConnectionError;
    match reason {
        ConnectionError::ApplicationClosed(close) => (
            u64::from(close.error_code) as u16,
            String::from_utf8_lossy(&close.reason).into_owned(),
        ),
        other => (0, other.to_string()),
    }
}

/// Relays in this system are reached either by a pinned self-signed
/// certificate hash (the common case, §6 `serverCertificateHashes`) or, if
/// none were supplied, by ordinary WebPKI validation against the platform
/// root store.
async fn build_endpoint(options: &ConnectOptions) -> Result<Endpoint, TransportError> {
    let bind_addr = if options.remote.is_ipv6() {
        "[::]:0"
    } else {
        "0.0.0.0:0"
    };
    let alpn: Vec<&str> = options
        .alpn_protocols
        .iter()
        .map(|p| std::str::from_utf8(p).unwrap_or_default())
        .collect();

    let mut transport = compio_quic::TransportConfig::default();
    transport.max_idle_timeout(Some(
        options
            .idle_timeout
            .try_into()
            .expect("idle_timeout must fit in a QUIC VarInt of milliseconds"),
    ));

    let endpoint = if options.server_certificate_hashes.is_empty() {
        ClientBuilder::default()
            .with_alpn_protocols(&alpn)
            .with_transport_config(transport)
            .with_root_certificates()
            .with_webpki_roots()
            .bind(bind_addr)
            .await?
    } else {
        let verifier = PinnedHashVerifier::new(options.server_certificate_hashes.clone());
        let tls_config = rustls::ClientConfig::builder_with_protocol_versions(&[
            &rustls::version::TLS13,
        ])
        .dangerous()
        .with_custom_certificate_verifier(std::sync::Arc::new(verifier))
        .with_no_client_auth();
        ClientBuilder::default()
            .with_alpn_protocols(&alpn)
            .with_transport_config(transport)
            .with_rustls_client_config(tls_config)
            .bind(bind_addr)
            .await?
    };
    Ok(endpoint)
}
