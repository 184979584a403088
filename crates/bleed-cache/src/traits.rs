use async_trait::async_trait;
use serde::{Serialize, Serializer};
use std::fmt;

/// Tri-state verdict reported for a probed host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutcomeCode {
    Vulnerable = 0,
    Safe = 1,
    Error = 2,
}

impl OutcomeCode {
    pub fn as_i64(self) -> i64 {
        self as i64
    }

    pub fn from_i64(value: i64) -> Result<Self, StoreError> {
        match value {
            0 => Ok(OutcomeCode::Vulnerable),
            1 => Ok(OutcomeCode::Safe),
            2 => Ok(OutcomeCode::Error),
            other => Err(StoreError::Decode(format!("status out of range: {other}"))),
        }
    }

    /// Name used in counter keys (`cache.safe`, `site.error`, ...).
    pub fn name(self) -> &'static str {
        match self {
            OutcomeCode::Vulnerable => "vulnerable",
            OutcomeCode::Safe => "safe",
            OutcomeCode::Error => "error",
        }
    }
}

impl fmt::Display for OutcomeCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Serialize for OutcomeCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(self.as_i64())
    }
}

/// A cached verdict. Always written as a whole; the last writer wins.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheRecord {
    pub host: String,
    /// Unix seconds at which the record was written.
    pub last_update: i64,
    pub status: OutcomeCode,
    pub data: String,
    pub error: String,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store backend error: {0}")]
    Backend(String),

    #[error("malformed record: {0}")]
    Decode(String),

    #[error("store operation timed out after {0}ms")]
    Timeout(u64),
}

/// Keyed record store backing the result cache.
///
/// No transactions and no conditional writes: `put` overwrites unconditionally.
/// Implementations: `ShardedStore` (in-process) and the RESP client in the server.
#[async_trait]
pub trait Store: Send + Sync {
    /// Fetch a record. `Ok(None)` when the key is absent.
    async fn get(&self, key: &str) -> Result<Option<CacheRecord>, StoreError>;

    /// Write a record, replacing whatever was stored under `key`.
    async fn put(&self, key: &str, record: CacheRecord) -> Result<(), StoreError>;

    /// Touch the backend to keep its connection warm.
    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    /// Human-readable backend name.
    fn name(&self) -> &str;
}
