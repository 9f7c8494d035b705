//! Counter storage for fixed-window rate limiting.
//!
//! Stores expose one atomic operation, [`CounterStore::increment`], which
//! either opens a fresh window or bumps the count of the live one and
//! returns the resulting entry. Callers never read-then-write.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use thiserror::Error;

use crate::cache::BoundedCache;

/// Error types for counter store operations
#[derive(Debug, Error)]
pub enum CounterStoreError {
    /// Connection error
    #[error("Counter store connection error: {0}")]
    Connection(String),

    /// Unexpected reply from the backend
    #[error("Counter store protocol error: {0}")]
    Protocol(String),

    /// Configuration error
    #[error("Counter store configuration error: {0}")]
    Config(String),
}

/// Result type for counter store operations
pub type StoreResult<T> = Result<T, CounterStoreError>;

/// Count and reset time of one `(identifier, category)` window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterEntry {
    /// Requests seen in the current window, including the current one.
    pub count: u64,
    /// When the current window ends.
    pub window_reset_at: DateTime<Utc>,
}

impl CounterEntry {
    /// Entry for the first request of a new window.
    #[must_use]
    pub fn fresh(now: DateTime<Utc>, window: Duration) -> Self {
        Self {
            count: 1,
            window_reset_at: now + to_delta(window),
        }
    }

    /// Whether the window has ended at `now`.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.window_reset_at
    }

    /// Apply one request at `now`.
    #[must_use]
    pub fn advance(current: Option<&Self>, now: DateTime<Utc>, window: Duration) -> Self {
        match current {
            Some(entry) if !entry.is_expired(now) => Self {
                count: entry.count.saturating_add(1),
                window_reset_at: entry.window_reset_at,
            },
            _ => Self::fresh(now, window),
        }
    }
}

pub(crate) fn to_delta(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::days(365))
}

/// Counter backend trait for polymorphic store implementations
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Atomically register one request against `key` and return the entry.
    ///
    /// When no live window exists for `key` a new one starting at `now` and
    /// lasting `window` is opened with a count of one.
    async fn increment(
        &self,
        key: &str,
        window: Duration,
        now: DateTime<Utc>,
    ) -> StoreResult<CounterEntry>;

    /// Drop counters that can no longer affect a decision. Returns how many
    /// were removed.
    async fn sweep(&self, _now: DateTime<Utc>) -> StoreResult<usize> {
        Ok(0)
    }

    /// Backend name for logs
    fn name(&self) -> &'static str;

    /// Whether counters are shared between processes
    fn is_distributed(&self) -> bool;
}

/// Default number of counters held in memory
pub const DEFAULT_CAPACITY: usize = 10_000;

/// In-memory counter store for single-instance deployments.
///
/// Counters live in a [`BoundedCache`]; an evicted counter simply starts a
/// fresh window on its next request.
#[derive(Debug)]
pub struct MemoryCounterStore {
    cache: BoundedCache<String, CounterEntry>,
}

impl MemoryCounterStore {
    /// Create a store with the given capacity and idle TTL.
    ///
    /// The idle TTL should be at least the longest window in use, otherwise
    /// quiet clients can lose their counters mid-window.
    #[must_use]
    pub fn new(capacity: usize, idle_ttl: Duration) -> Self {
        Self {
            cache: BoundedCache::new(capacity, idle_ttl),
        }
    }

    /// Number of live counters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    /// Whether no counters are held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

impl Default for MemoryCounterStore {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY, crate::config::RateLimitCategory::longest_window())
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn increment(
        &self,
        key: &str,
        window: Duration,
        now: DateTime<Utc>,
    ) -> StoreResult<CounterEntry> {
        Ok(self
            .cache
            .upsert(key.to_string(), now, |current| {
                CounterEntry::advance(current, now, window)
            }))
    }

    async fn sweep(&self, now: DateTime<Utc>) -> StoreResult<usize> {
        Ok(self.cache.purge_idle(now))
    }

    fn name(&self) -> &'static str {
        "memory"
    }

    fn is_distributed(&self) -> bool {
        false
    }
}
