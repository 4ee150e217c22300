//! # Confirm Cache
//!
//! Expiring map from internal sequence number to the message waiting for its
//! broker confirm. Entries leave the cache exactly once: either an explicit
//! [`resolve`](ConfirmCache::resolve) when a confirm arrives, or a
//! [`sweep`](ConfirmCache::sweep) once their last access is older than the
//! confirm timeout. Both paths remove through the map's per-key lock, so a
//! confirm racing an eviction yields a single winner.
//!
//! The cache performs no side effects of its own; callers decide what an
//! evicted message means.

use dashmap::DashMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::error;

use super::message::PendingMessage;

#[derive(Debug)]
struct CacheEntry {
    message: PendingMessage,
    last_access: Instant,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant, timeout: Duration) -> bool {
        now.saturating_duration_since(self.last_access) >= timeout
    }
}

#[derive(Debug)]
pub struct ConfirmCache {
    entries: DashMap<u64, CacheEntry>,
    timeout: Duration,
}

impl ConfirmCache {
    pub fn new(timeout: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            timeout,
        }
    }

    /// Insert a message and start its expiration clock
    ///
    /// Insertion is the only access that resets the clock; confirms remove the
    /// entry outright.
    pub fn put(&self, key: u64, message: PendingMessage) {
        let entry = CacheEntry {
            message,
            last_access: Instant::now(),
        };
        if let Some(displaced) = self.entries.insert(key, entry) {
            // internal sequence numbers are unique; the displaced caller sees PublisherClosed
            error!(
                key,
                message_id = displaced.message.request().properties().message_id_or_placeholder(),
                "Confirm cache key reused, displaced message dropped"
            );
        }
    }

    /// Atomically remove and return the message for `key`
    pub fn resolve(&self, key: u64) -> Option<PendingMessage> {
        self.entries.remove(&key).map(|(_, entry)| entry.message)
    }

    /// Snapshot of the cached keys, unordered
    pub fn keys(&self) -> Vec<u64> {
        self.entries.iter().map(|entry| *entry.key()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Evict every entry idle for at least the timeout as of `now`, in key order
    pub fn sweep(&self, now: Instant) -> Vec<(u64, PendingMessage)> {
        let timeout = self.timeout;
        let mut candidates: Vec<u64> = self
            .entries
            .iter()
            .filter(|entry| entry.value().is_expired(now, timeout))
            .map(|entry| *entry.key())
            .collect();
        candidates.sort_unstable();

        candidates
            .into_iter()
            .filter_map(|key| {
                // re-checked under the shard lock; a concurrent resolve wins cleanly
                self.entries
                    .remove_if(&key, |_, entry| entry.is_expired(now, timeout))
                    .map(|(key, entry)| (key, entry.message))
            })
            .collect()
    }

    /// Remove every entry regardless of age, in key order
    pub fn drain(&self) -> Vec<(u64, PendingMessage)> {
        let mut keys = self.keys();
        keys.sort_unstable();
        keys.into_iter()
            .filter_map(|key| self.entries.remove(&key))
            .map(|(key, entry)| (key, entry.message))
            .collect()
    }
}
