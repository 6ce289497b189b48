//! The awareness pipeline (§4.4): local changes out over datagrams (or the
//! stream, if datagrams are disabled), remote datagrams/stream frames in,
//! with per-client clocks turning the datagram channel into latest-wins.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use compio_log::{debug, warn};
use y_sync::awareness::Awareness;

use crate::clock::{LocalClock, RemoteClockTable};
use crate::error::AwarenessError;
use collab_wire::{tag_message, MessageTag};

const REMOTE_STREAM_ORIGIN: &str = "remote-stream";
const REMOTE_DATAGRAM_ORIGIN: &str = "remote-datagram";

/// §4.4 inputs `{useDatagrams, broadcastInterval}`.
#[derive(Debug, Clone, Copy)]
pub struct AwarenessPipelineOptions {
    pub use_datagrams: bool,
    pub broadcast_interval: Duration,
    pub stale_threshold: Duration,
}

impl Default for AwarenessPipelineOptions {
    fn default() -> Self {
        Self {
            use_datagrams: true,
            broadcast_interval: Duration::from_millis(50),
            stale_threshold: Duration::from_secs(10),
        }
    }
}

type SendStream = Rc<dyn Fn(Bytes)>;
type SendDatagram = Rc<dyn Fn(Bytes)>;

struct Inner {
    awareness: Rc<RefCell<Awareness>>,
    options: AwarenessPipelineOptions,
    send_stream: SendStream,
    send_datagram: SendDatagram,
    local_clock: LocalClock,
    remote_clocks: RemoteClockTable,
    local_client_id: u32,
    stopped: bool,
}

/// Owns the subscription to local awareness changes and the periodic
/// broadcast task. Construction does not start either; call [`start`].
pub struct AwarenessPipeline {
    inner: Rc<RefCell<Inner>>,
    _subscription: Option<y_sync::awareness::Subscription>,
}

impl AwarenessPipeline {
    pub fn new(
        awareness: Rc<RefCell<Awareness>>,
        options: AwarenessPipelineOptions,
        send_stream: impl Fn(Bytes) + 'static,
        send_datagram: impl Fn(Bytes) + 'static,
    ) -> Self {
        // The wire format fixes client ids at 32 bits (§4.1); yrs/y-sync
        // client ids are u64. We narrow once here and treat the narrowed
        // value as this pipeline's identity everywhere else, on the
        // assumption that real client ids fit in 32 bits.
        let local_client_id = awareness.borrow().client_id() as u32;
        let inner = Rc::new(RefCell::new(Inner {
            awareness,
            options,
            send_stream: Rc::new(send_stream),
            send_datagram: Rc::new(send_datagram),
            local_clock: LocalClock::new(),
            remote_clocks: RemoteClockTable::new(),
            local_client_id,
            stopped: false,
        }));
        Self {
            inner,
            _subscription: None,
        }
    }

    /// §4.4 "Initial state" + local-change subscription + periodic broadcast.
    pub fn start(&mut self) {
        self.send_initial_snapshot();

        let watched = self.inner.clone();
        let subscription = self
            .inner
            .borrow()
            .awareness
            .borrow_mut()
            .on_update(move |awareness, event, _origin| {
                let mut inner = watched.borrow_mut();
                if inner.stopped {
                    return;
                }
                let local_id = inner.local_client_id as u64;
                let touched_local = event
                    .added()
                    .iter()
                    .chain(event.updated())
                    .chain(event.removed())
                    .any(|id| *id == local_id);
                if !touched_local {
                    return;
                }
                if inner.options.use_datagrams {
                    inner.emit_local_datagram();
                } else {
                    inner.emit_local_stream_update(awareness, &[local_id]);
                }
            });
        self._subscription = Some(subscription);

        if self.inner.borrow().options.use_datagrams {
            self.spawn_periodic_broadcast();
        }
    }

    fn send_initial_snapshot(&self) {
        let inner = self.inner.borrow();
        let awareness = inner.awareness.borrow();
        let clients: Vec<u64> = awareness
            .clients()
            .keys()
            .copied()
            .chain(std::iter::once(awareness.client_id()))
            .collect();
        match awareness.update_with_clients(clients) {
            Ok(update) => {
                let body = update.encode_v1();
                (inner.send_stream)(Bytes::from(tag_message(MessageTag::Awareness, &body)));
            }
            Err(err) => warn!("failed to encode initial awareness snapshot: {err}"),
        }
    }

    fn spawn_periodic_broadcast(&self) {
        let inner = self.inner.clone();
        compio_runtime::spawn(async move {
            loop {
                let interval = {
                    let guard = inner.borrow();
                    if guard.stopped {
                        return;
                    }
                    guard.options.broadcast_interval
                };
                compio_runtime::time::sleep(interval).await;
                let mut guard = inner.borrow_mut();
                if guard.stopped {
                    return;
                }
                guard.emit_local_datagram();
            }
        })
        .detach();
    }

    /// §4.4 "Wire → local — stream": strip the tag, apply via the external
    /// codec with origin `"remote-stream"`.
    pub fn handle_stream_frame(&self, payload: &[u8]) -> Result<(), AwarenessError> {
        let inner = self.inner.borrow();
        let mut awareness = inner.awareness.borrow_mut();
        let update = y_sync::awareness::AwarenessUpdate::decode_v1(payload)?;
        awareness.apply_update_with(update, REMOTE_STREAM_ORIGIN)?;
        Ok(())
    }

    /// §4.4 "Wire → local — datagram": self-echo suppression, duplicate/old
    /// clock rejection, then apply and mark the entry as seen.
    pub fn handle_datagram(&self, client_id: u32, clock: u32, state: &[u8]) {
        let mut inner = self.inner.borrow_mut();
        if client_id == inner.local_client_id {
            return;
        }
        let now = Instant::now();
        if !inner.remote_clocks.accept(client_id, clock, now) {
            debug!("dropping stale awareness datagram from client {client_id}");
            return;
        }
        let update = match y_sync::awareness::AwarenessUpdate::decode_v1(state) {
            Ok(update) => update,
            Err(err) => {
                warn!("malformed awareness datagram from client {client_id}: {err}");
                return;
            }
        };
        let mut awareness = inner.awareness.borrow_mut();
        if let Err(err) = awareness.apply_update_with(update, REMOTE_DATAGRAM_ORIGIN) {
            warn!("failed to apply awareness datagram from client {client_id}: {err}");
        }
    }

    /// §4.4 stale eviction: on-demand maintenance, not a background task.
    pub fn evict_stale(&self) {
        let mut inner = self.inner.borrow_mut();
        let now = Instant::now();
        let threshold = inner.options.stale_threshold;
        let stale = inner.remote_clocks.stale_clients(now, threshold);
        if stale.is_empty() {
            return;
        }
        for client_id in &stale {
            inner.remote_clocks.remove(*client_id);
        }
        let mut awareness = inner.awareness.borrow_mut();
        for client_id in stale {
            let _ = awareness.remove_state(client_id as u64);
        }
    }

    /// Number of distinct remote clients currently tracked in the clock
    /// table. Exposed for diagnostics and to observe self-echo suppression
    /// (§8 "Self-echo datagrams never reach the clock table") from outside.
    pub fn remote_peer_count(&self) -> usize {
        self.inner.borrow().remote_clocks.len()
    }

    pub fn stop(&self) {
        self.inner.borrow_mut().stopped = true;
    }

    pub fn destroy(&self) {
        self.stop();
        self.inner.borrow_mut().remote_clocks.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_pipeline(
        use_datagrams: bool,
        broadcast_interval: Duration,
    ) -> (
        AwarenessPipeline,
        Rc<RefCell<Awareness>>,
        Rc<RefCell<Vec<Bytes>>>,
    ) {
        let awareness = Rc::new(RefCell::new(Awareness::new(yrs::Doc::new())));
        let stream_sent = Rc::new(RefCell::new(Vec::new()));
        let datagram_sent = Rc::new(RefCell::new(Vec::new()));
        let stream_sink = stream_sent.clone();
        let datagram_sink = datagram_sent.clone();
        let pipeline = AwarenessPipeline::new(
            awareness.clone(),
            AwarenessPipelineOptions {
                use_datagrams,
                broadcast_interval,
                stale_threshold: Duration::from_secs(10),
            },
            move |bytes| stream_sink.borrow_mut().push(bytes),
            move |bytes| datagram_sink.borrow_mut().push(bytes),
        );
        (pipeline, awareness, datagram_sent)
    }

    #[test]
    fn self_echo_datagram_never_reaches_the_clock_table() {
        let (pipeline, _awareness, _datagram_sent) =
            new_pipeline(true, Duration::from_millis(50));
        let local_id = pipeline.inner.borrow().local_client_id;

        pipeline.handle_datagram(local_id, 1, b"echo");
        assert_eq!(pipeline.remote_peer_count(), 0);

        pipeline.handle_datagram(local_id.wrapping_add(1), 1, b"from-a-peer");
        assert_eq!(pipeline.remote_peer_count(), 1);
    }

    #[test]
    fn stale_clock_from_a_remote_peer_is_rejected_like_self_echo() {
        let (pipeline, _awareness, _datagram_sent) =
            new_pipeline(true, Duration::from_millis(50));
        let remote_id = pipeline.inner.borrow().local_client_id.wrapping_add(1);

        pipeline.handle_datagram(remote_id, 5, b"fresh");
        assert_eq!(pipeline.remote_peer_count(), 1);

        pipeline.handle_datagram(remote_id, 5, b"duplicate-clock");
        assert_eq!(pipeline.remote_peer_count(), 1);
    }

    #[compio_macros::test]
    async fn periodic_broadcast_runs_at_roughly_twenty_hertz() {
        let (mut pipeline, awareness, datagram_sent) =
            new_pipeline(true, Duration::from_millis(50));
        awareness.borrow_mut().set_local_state("{}");

        pipeline.start();
        compio_runtime::time::sleep(Duration::from_secs(1)).await;
        pipeline.stop();

        // §8 "Testable Properties": 18-22 datagrams per second at a 50ms
        // broadcast interval, allowing for scheduler jitter on either edge.
        let count = datagram_sent.borrow().len();
        assert!(
            (18..=22).contains(&count),
            "expected 18-22 datagrams in one second, got {count}"
        );
    }
}

impl Inner {
    fn emit_local_datagram(&mut self) {
        // §4.4: "If the local state is absent (cleared), no datagram is
        // emitted." The reference state encoding is JSON over UTF-8 (§9);
        // `local_state` already returns it pre-encoded.
        let Some(state) = self.awareness.borrow().local_state() else {
            return;
        };
        let clock = self.local_clock.next();
        let datagram =
            collab_wire::encode_awareness_datagram(self.local_client_id, clock, state.as_bytes());
        (self.send_datagram)(datagram);
    }

    fn emit_local_stream_update(&self, awareness: &Awareness, clients: &[u64]) {
        match awareness.update_with_clients(clients.iter().copied()) {
            Ok(update) => {
                let body = update.encode_v1();
                (self.send_stream)(Bytes::from(tag_message(MessageTag::Awareness, &body)));
            }
            Err(err) => warn!("failed to encode awareness update: {err}"),
        }
    }
}
