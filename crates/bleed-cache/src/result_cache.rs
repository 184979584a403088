use crate::clock::Clock;
use crate::freshness::FreshnessPolicy;
use crate::traits::{CacheRecord, OutcomeCode, Store, StoreError};
use std::sync::Arc;
use std::time::Duration;

/// Verdict cache in front of a [`Store`].
///
/// Lookups never fail: an absent key, a backend error, a malformed record, a
/// timed-out call and a stale record all read as a miss. Writes are whole
/// records stamped with the current time; there is no coordination between
/// concurrent writers of the same key.
pub struct ResultCache {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    expiry: Duration,
    policy: FreshnessPolicy,
    timeout: Duration,
}

impl ResultCache {
    pub fn new(
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
        expiry: Duration,
        policy: FreshnessPolicy,
        timeout: Duration,
    ) -> Self {
        tracing::info!(
            store = store.name(),
            expiry_secs = expiry.as_secs(),
            policy = %policy,
            timeout_ms = timeout.as_millis() as u64,
            "result cache initialized"
        );

        Self {
            store,
            clock,
            expiry,
            policy,
            timeout,
        }
    }

    /// Return the stored verdict for `key` if one exists and is still fresh.
    pub async fn check(&self, key: &str) -> Option<CacheRecord> {
        let record = match tokio::time::timeout(self.timeout, self.store.get(key)).await {
            Ok(Ok(Some(record))) => record,
            Ok(Ok(None)) => {
                tracing::debug!(key, "cache MISS");
                return None;
            }
            Ok(Err(e)) => {
                tracing::warn!(key, error = %e, "cache lookup failed, treating as miss");
                return None;
            }
            Err(_) => {
                let e = StoreError::Timeout(self.timeout.as_millis() as u64);
                tracing::warn!(key, error = %e, "cache lookup failed, treating as miss");
                return None;
            }
        };

        let now = self.clock.now_unix();
        if !self.policy.is_fresh(record.last_update, now, self.expiry) {
            tracing::debug!(
                key,
                last_update = record.last_update,
                now,
                "cache STALE, refetching"
            );
            return None;
        }

        tracing::debug!(key, status = %record.status, "cache HIT");
        Some(record)
    }

    /// Store a fresh verdict for `key`, replacing any previous one.
    pub async fn set(
        &self,
        key: &str,
        host: &str,
        status: OutcomeCode,
        data: &str,
        error: &str,
    ) -> Result<(), StoreError> {
        let record = CacheRecord {
            host: host.to_string(),
            last_update: self.clock.now_unix(),
            status,
            data: data.to_string(),
            error: error.to_string(),
        };

        match tokio::time::timeout(self.timeout, self.store.put(key, record)).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout(self.timeout.as_millis() as u64)),
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }
}
