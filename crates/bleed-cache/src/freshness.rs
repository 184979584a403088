use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Decides whether a record written at `last_update` may still be served.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FreshnessPolicy {
    /// Records stay fresh until the next multiple of the expiry since the
    /// epoch. Every key goes stale at the same wall-clock boundary.
    #[default]
    Bucketed,
    /// Records stay fresh for the expiry after they were written.
    Sliding,
}

impl FreshnessPolicy {
    /// Timestamps are unix seconds; any sub-second part of `expiry` is ignored.
    pub fn is_fresh(self, last_update: i64, now: i64, expiry: Duration) -> bool {
        let d = expiry.as_secs() as i64;
        if d <= 0 {
            return false;
        }
        match self {
            FreshnessPolicy::Bucketed => last_update >= bucket_start(now, expiry),
            FreshnessPolicy::Sliding => now - last_update < d,
        }
    }
}

/// `now` truncated down to the nearest multiple of `expiry` since the epoch.
pub fn bucket_start(now: i64, expiry: Duration) -> i64 {
    let d = expiry.as_secs() as i64;
    if d <= 0 {
        return now;
    }
    now - now.rem_euclid(d)
}

impl FromStr for FreshnessPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "bucketed" => Ok(FreshnessPolicy::Bucketed),
            "sliding" => Ok(FreshnessPolicy::Sliding),
            other => Err(format!(
                "unknown freshness policy: {other}, use 'bucketed' or 'sliding'"
            )),
        }
    }
}

impl fmt::Display for FreshnessPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FreshnessPolicy::Bucketed => f.write_str("bucketed"),
            FreshnessPolicy::Sliding => f.write_str("sliding"),
        }
    }
}
