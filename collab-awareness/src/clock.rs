//! Remote-clock table and local clock (§3, §4.4).

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Per-peer highest-accepted datagram clock, with a last-seen timestamp for
/// stale eviction.
#[derive(Debug, Default)]
pub struct RemoteClockTable {
    entries: HashMap<u32, (u32, Instant)>,
}

impl RemoteClockTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// `true` if `clock` is newer than whatever was last recorded for
    /// `client_id`; records the observation either way advances `now`.
    pub fn accept(&mut self, client_id: u32, clock: u32, now: Instant) -> bool {
        match self.entries.get(&client_id) {
            Some((recorded, _)) if *recorded >= clock => false,
            _ => {
                self.entries.insert(client_id, (clock, now));
                true
            }
        }
    }

    pub fn touch(&mut self, client_id: u32, now: Instant) {
        if let Some(entry) = self.entries.get_mut(&client_id) {
            entry.1 = now;
        }
    }

    /// Clients whose last-seen timestamp exceeds `threshold` as of `now`.
    pub fn stale_clients(&self, now: Instant, threshold: Duration) -> Vec<u32> {
        self.entries
            .iter()
            .filter(|(_, (_, last_seen))| now.duration_since(*last_seen) > threshold)
            .map(|(client_id, _)| *client_id)
            .collect()
    }

    pub fn remove(&mut self, client_id: u32) {
        self.entries.remove(&client_id);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Monotonic clock incremented before each datagram send (§3).
#[derive(Debug, Default)]
pub struct LocalClock(u32);

impl LocalClock {
    pub fn new() -> Self {
        Self(0)
    }

    pub fn next(&mut self) -> u32 {
        self.0 += 1;
        self.0
    }

    pub fn current(&self) -> u32 {
        self.0
    }
}
