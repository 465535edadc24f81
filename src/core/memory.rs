use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

/// Fraction of `max_entries` kept after a capacity eviction
const RETAIN_NUMERATOR: usize = 4;
const RETAIN_DENOMINATOR: usize = 5;

/// Cached value with its write time
#[derive(Debug, Clone)]
struct CacheEntry<T> {
    value: T,
    stored_at: Instant,
    written_at: DateTime<Utc>,
    // Write order, breaks timestamp ties during eviction
    sequence: u64,
}

impl<T> CacheEntry<T> {
    fn is_live(&self, now: Instant, ttl: Duration) -> bool {
        now.saturating_duration_since(self.stored_at) < ttl
    }
}

/// Public view of a live cache entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedEntryInfo {
    pub key: String,
    pub stored_at: DateTime<Utc>,
    pub age: Duration,
}

/// Outcome of a cleaning pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanReport {
    pub expired: usize,
    pub evicted: usize,
}

impl CleanReport {
    pub fn removed(&self) -> usize {
        self.expired + self.evicted
    }
}

/// Key/value cache bounded by entry age and entry count
///
/// Lookups never return entries older than `ttl`. Expired entries are only
/// physically removed by [`TaskCache::clean`], which also snaps the cache back
/// to 80% of `max_entries` when it has grown past the cap.
#[derive(Debug)]
pub struct TaskCache<T> {
    data: DashMap<String, CacheEntry<T>>,
    ttl: Duration,
    max_entries: usize,
    next_sequence: AtomicU64,
}

impl<T: Clone> TaskCache<T> {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            data: DashMap::new(),
            ttl,
            max_entries,
            next_sequence: AtomicU64::new(0),
        }
    }

    /// Live value for `key`, if any
    pub fn get(&self, key: &str) -> Option<T> {
        let now = Instant::now();
        self.data
            .get(key)
            .filter(|entry| entry.is_live(now, self.ttl))
            .map(|entry| entry.value.clone())
    }

    pub fn contains(&self, key: &str) -> bool {
        let now = Instant::now();
        self.data
            .get(key)
            .map(|entry| entry.is_live(now, self.ttl))
            .unwrap_or(false)
    }

    /// Write or overwrite `key`, stamped with the current time
    pub fn insert(&self, key: &str, value: T) {
        let entry = CacheEntry {
            value,
            stored_at: Instant::now(),
            written_at: Utc::now(),
            sequence: self.next_sequence.fetch_add(1, Ordering::Relaxed),
        };
        self.data.insert(key.to_string(), entry);
    }

    pub fn remove(&self, key: &str) -> bool {
        self.data.remove(key).is_some()
    }

    /// Expire stale entries, then enforce the entry cap
    pub fn clean(&self) -> CleanReport {
        let now = Instant::now();
        let before = self.data.len();
        self.data.retain(|_, entry| entry.is_live(now, self.ttl));
        let expired = before.saturating_sub(self.data.len());
        if expired > 0 {
            debug!("Expired {} cache entries", expired);
        }

        let mut evicted = 0;
        if self.data.len() > self.max_entries {
            let keep = self.max_entries * RETAIN_NUMERATOR / RETAIN_DENOMINATOR;

            let mut entries_by_age: Vec<(String, Instant, u64)> = self
                .data
                .iter()
                .map(|entry| (entry.key().clone(), entry.stored_at, entry.sequence))
                .collect();
            entries_by_age.sort_by_key(|(_, stored_at, sequence)| (*stored_at, *sequence));

            let excess = entries_by_age.len().saturating_sub(keep);
            for (key, _, _) in entries_by_age.into_iter().take(excess) {
                if self.data.remove(&key).is_some() {
                    evicted += 1;
                }
            }

            info!("Cache cleaned: {}/{} entries", self.data.len(), self.max_entries);
        }

        CleanReport { expired, evicted }
    }

    /// Live entries, newest first
    pub fn entries(&self) -> Vec<CachedEntryInfo> {
        let now = Instant::now();
        let mut live: Vec<(u64, CachedEntryInfo)> = self
            .data
            .iter()
            .filter(|entry| entry.is_live(now, self.ttl))
            .map(|entry| {
                let info = CachedEntryInfo {
                    key: entry.key().clone(),
                    stored_at: entry.written_at,
                    age: now.saturating_duration_since(entry.stored_at),
                };
                (entry.sequence, info)
            })
            .collect();
        live.sort_by(|a, b| b.0.cmp(&a.0));
        live.into_iter().map(|(_, info)| info).collect()
    }

    pub fn clear(&self) {
        self.data.clear();
    }

    /// Number of stored entries, expired ones included until the next clean
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }
}
