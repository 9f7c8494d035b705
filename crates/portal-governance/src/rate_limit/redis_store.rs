//! Redis-backed counter store for multi-instance deployments.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::{Client, Script};
use std::fmt;
use std::time::Duration;
use tracing::info;

use super::store::{CounterEntry, CounterStore, CounterStoreError, StoreResult};

/// Key prefix used when none is configured.
pub const DEFAULT_NAMESPACE: &str = "portal:rl:";

// INCR and the expiry run as one script so concurrent instances never see
// a counter without a TTL. Returns {count, remaining ttl in ms}.
const INCREMENT_SCRIPT: &str = r"
local count = redis.call('INCR', KEYS[1])
if count == 1 then
  redis.call('PEXPIRE', KEYS[1], ARGV[1])
end
local ttl = redis.call('PTTL', KEYS[1])
if ttl < 0 then
  redis.call('PEXPIRE', KEYS[1], ARGV[1])
  ttl = tonumber(ARGV[1])
end
return {count, ttl}
";

/// Counter store shared through Redis.
///
/// Window expiry is delegated to Redis key TTLs, so [`CounterStore::sweep`]
/// has nothing to do here.
#[derive(Clone)]
pub struct RedisCounterStore {
    connection: ConnectionManager,
    script: Script,
    namespace: String,
}

impl fmt::Debug for RedisCounterStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisCounterStore")
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}

impl RedisCounterStore {
    /// Connect to `url` using the default namespace.
    pub async fn connect(url: &str) -> StoreResult<Self> {
        Self::connect_with_namespace(url, DEFAULT_NAMESPACE).await
    }

    /// Connect to `url`, prefixing every key with `namespace`.
    pub async fn connect_with_namespace(url: &str, namespace: &str) -> StoreResult<Self> {
        if !url.starts_with("redis://") && !url.starts_with("rediss://") {
            return Err(CounterStoreError::Config(format!(
                "Invalid Redis URL scheme: {url}"
            )));
        }

        let client = Client::open(url).map_err(|e| CounterStoreError::Config(e.to_string()))?;
        let connection = client
            .get_connection_manager()
            .await
            .map_err(|e| CounterStoreError::Connection(e.to_string()))?;

        info!(namespace, "Connected Redis counter store");

        Ok(Self {
            connection,
            script: Script::new(INCREMENT_SCRIPT),
            namespace: namespace.to_string(),
        })
    }

    fn namespaced(&self, key: &str) -> String {
        format!("{}{key}", self.namespace)
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn increment(
        &self,
        key: &str,
        window: Duration,
        now: DateTime<Utc>,
    ) -> StoreResult<CounterEntry> {
        let window_ms = u64::try_from(window.as_millis()).unwrap_or(u64::MAX).max(1);
        let mut connection = self.connection.clone();

        let (count, ttl_ms): (i64, i64) = self
            .script
            .key(self.namespaced(key))
            .arg(window_ms)
            .invoke_async(&mut connection)
            .await
            .map_err(|e| {
                if e.is_io_error() || e.is_connection_dropped() {
                    CounterStoreError::Connection(e.to_string())
                } else {
                    CounterStoreError::Protocol(e.to_string())
                }
            })?;

        let count = u64::try_from(count)
            .map_err(|_| CounterStoreError::Protocol(format!("negative counter {count}")))?;

        Ok(CounterEntry {
            count,
            window_reset_at: now + chrono::Duration::milliseconds(ttl_ms.max(0)),
        })
    }

    fn name(&self) -> &'static str {
        "redis"
    }

    fn is_distributed(&self) -> bool {
        true
    }
}
