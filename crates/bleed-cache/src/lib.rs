//! Verdict cache for the bleedcheck probe service.
//!
//! A [`ResultCache`] sits in front of any [`Store`] and decides, per lookup,
//! whether a previously recorded verdict can be trusted. The in-process
//! [`ShardedStore`] backs it when no external store is configured.

pub mod clock;
pub mod freshness;
pub mod result_cache;
pub mod sharded;
pub mod traits;

pub use clock::{Clock, ManualClock, SystemClock};
pub use freshness::{bucket_start, FreshnessPolicy};
pub use result_cache::ResultCache;
pub use sharded::ShardedStore;
pub use traits::{CacheRecord, OutcomeCode, Store, StoreError};
