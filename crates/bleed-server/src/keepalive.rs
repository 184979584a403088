use bleed_cache::Store;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Periodically ping the store so its connection stays warm.
///
/// Each ping is bounded by `timeout` and raced against shutdown. Failures are
/// logged and the loop carries on; only the shutdown token ends it.
pub async fn run_keepalive(
    store: Arc<dyn Store>,
    every: Duration,
    timeout: Duration,
    shutdown: CancellationToken,
) {
    tracing::info!(
        store = store.name(),
        interval_secs = every.as_secs(),
        timeout_ms = timeout.as_millis() as u64,
        "store keepalive started"
    );

    let mut interval = tokio::time::interval(every);
    // The first tick completes immediately.
    interval.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                tracing::info!("store keepalive stopping");
                break;
            }
            _ = interval.tick() => {}
        }

        tokio::select! {
            _ = shutdown.cancelled() => {
                tracing::info!("store keepalive stopping");
                break;
            }
            res = tokio::time::timeout(timeout, store.ping()) => match res {
                Ok(Ok(())) => tracing::debug!(store = store.name(), "store keepalive ok"),
                Ok(Err(e)) => tracing::warn!(store = store.name(), error = %e, "store keepalive failed"),
                Err(_) => tracing::warn!(
                    store = store.name(),
                    timeout_ms = timeout.as_millis() as u64,
                    "store keepalive timed out"
                ),
            },
        }
    }
}
