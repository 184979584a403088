use crate::traits::{CacheRecord, Store, StoreError};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

/// Number of shards. Must be a power of two for fast modulo via bitmask.
const NUM_SHARDS: usize = 64;
const SHARD_MASK: u64 = (NUM_SHARDS as u64) - 1;

/// In-process record store.
///
/// Distributes keys across 64 independent shards, each a `HashMap` behind its
/// own `RwLock`, so concurrent handlers checking different hosts rarely
/// contend. Records are only ever overwritten, never evicted: staleness is
/// judged by the result cache at read time.
///
/// Shard selection uses `ahash` with fixed seeds.
pub struct ShardedStore {
    shards: Box<[RwLock<HashMap<String, CacheRecord>>; NUM_SHARDS]>,
}

impl ShardedStore {
    pub fn new() -> Self {
        let shards: Vec<RwLock<HashMap<String, CacheRecord>>> = (0..NUM_SHARDS)
            .map(|_| RwLock::new(HashMap::new()))
            .collect();

        let shards: Box<[RwLock<HashMap<String, CacheRecord>>; NUM_SHARDS]> = shards
            .into_boxed_slice()
            .try_into()
            .unwrap_or_else(|_| unreachable!());

        Self { shards }
    }

    #[inline]
    fn shard_index(key: &str) -> usize {
        let hash = ahash::RandomState::with_seeds(1, 2, 3, 4).hash_one(key);
        (hash & SHARD_MASK) as usize
    }

    /// Total number of records across all shards.
    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.read().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.iter().all(|s| s.read().is_empty())
    }
}

impl Default for ShardedStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for ShardedStore {
    async fn get(&self, key: &str) -> Result<Option<CacheRecord>, StoreError> {
        let idx = Self::shard_index(key);
        Ok(self.shards[idx].read().get(key).cloned())
    }

    async fn put(&self, key: &str, record: CacheRecord) -> Result<(), StoreError> {
        let idx = Self::shard_index(key);
        self.shards[idx].write().insert(key.to_string(), record);
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}
