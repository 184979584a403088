use crate::metrics::Metrics;
use crate::prober::{ProbeOutcome, ProbeReport, Prober, Target};
use bleed_cache::{OutcomeCode, ResultCache};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;

/// Error text the prober uses when two handshakes disagree.
pub const MISMATCH_MESSAGE: &str = "Please try again";

/// JSON payload returned for every check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProbeResult {
    pub code: OutcomeCode,
    pub data: String,
    pub error: String,
    pub host: String,
}

/// `<scheme>://<host>`, with `/skip` when certificate validation is skipped.
pub fn cache_key(target: &Target, skip_validation: bool) -> String {
    let mut key = format!("{}://{}", target.service, target.host);
    if skip_validation {
        key.push_str("/skip");
    }
    key
}

/// Per-request decision flow: cached verdict or live probe, then bookkeeping.
///
/// Caching is on when a `ResultCache` is attached. Concurrent requests for the
/// same stale key are not coalesced; each probes and writes, last write wins.
pub struct Orchestrator {
    cache: Option<ResultCache>,
    prober: Arc<dyn Prober>,
    metrics: Arc<Metrics>,
    payload: Vec<u8>,
    expose_vulnerable_data: bool,
}

impl Orchestrator {
    pub fn new(
        prober: Arc<dyn Prober>,
        metrics: Arc<Metrics>,
        payload: impl Into<Vec<u8>>,
        expose_vulnerable_data: bool,
    ) -> Self {
        Self {
            cache: None,
            prober,
            metrics,
            payload: payload.into(),
            expose_vulnerable_data,
        }
    }

    pub fn with_cache(mut self, cache: ResultCache) -> Self {
        self.cache = Some(cache);
        self
    }

    #[cfg(test)]
    pub fn cache(&self) -> Option<&ResultCache> {
        self.cache.as_ref()
    }

    /// Check `target`. Returns `None` for an empty host, without touching the
    /// cache or the counters.
    pub async fn handle(&self, target: &Target, skip_validation: bool) -> Option<ProbeResult> {
        if target.host.is_empty() {
            return None;
        }

        let key = cache_key(target, skip_validation);
        self.metrics.increment("check");

        if let Some(cache) = &self.cache {
            let start = Instant::now();
            let cached = cache.check(&key).await;
            self.metrics
                .timer("cache.lookup", start.elapsed().as_secs_f64() * 1000.0);

            if let Some(record) = cached {
                self.metrics.increment("cache.hit");
                self.metrics
                    .increment(&format!("cache.{}", record.status.name()));
                return Some(ProbeResult {
                    code: record.status,
                    data: record.data,
                    error: record.error,
                    host: target.host.clone(),
                });
            }
        }

        let start = Instant::now();
        let report = self
            .prober
            .probe(target, &self.payload, skip_validation)
            .await;
        self.metrics
            .timer("probe", start.elapsed().as_secs_f64() * 1000.0);

        let (code, data, error) = self.classify(report);
        log_verdict(target, skip_validation, code, &error);
        self.metrics.increment(&format!("site.{}", code.name()));

        if let Some(cache) = &self.cache {
            if let Err(e) = cache.set(&key, &target.host, code, &data, &error).await {
                tracing::warn!(key = %key, error = %e, "cache write failed");
            }
            self.metrics.increment("cache.miss");
        }

        Some(ProbeResult {
            code,
            data,
            error,
            host: target.host.clone(),
        })
    }

    fn classify(&self, report: ProbeReport) -> (OutcomeCode, String, String) {
        match report.outcome {
            ProbeOutcome::Safe | ProbeOutcome::Closed => {
                (OutcomeCode::Safe, String::new(), String::new())
            }
            ProbeOutcome::Error(message) => (OutcomeCode::Error, String::new(), message),
            ProbeOutcome::Vulnerable => {
                let data = if self.expose_vulnerable_data {
                    report.data
                } else {
                    String::new()
                };
                (OutcomeCode::Vulnerable, data, String::new())
            }
        }
    }
}

fn log_verdict(target: &Target, skip: bool, code: OutcomeCode, error: &str) {
    let host = target.host.as_str();
    let service = target.service.as_str();
    match code {
        OutcomeCode::Vulnerable => tracing::info!(host, service, skip, "VULNERABLE"),
        OutcomeCode::Safe => tracing::info!(host, service, "SAFE"),
        OutcomeCode::Error if error == MISMATCH_MESSAGE => {
            tracing::warn!(host, service, "MISMATCH")
        }
        OutcomeCode::Error => tracing::warn!(host, service, error, "ERROR"),
    }
}
