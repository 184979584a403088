use axum::extract::Query;
use axum::routing::get;
use axum::{Json, Router};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::hash::{BuildHasher, Hash, Hasher};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Deserialize)]
struct ProbeQuery {
    #[serde(default)]
    host: String,
    #[serde(default)]
    service: String,
    #[serde(default)]
    payload: String,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
struct ProbeReply {
    outcome: &'static str,
    data: String,
    message: String,
}

/// Stable outcome for a host so repeated checks agree.
fn outcome_for(host: &str) -> &'static str {
    let mut hasher = ahash::RandomState::with_seeds(7, 11, 13, 17).build_hasher();
    host.hash(&mut hasher);
    match hasher.finish() % 10 {
        0 => "vulnerable",
        1 => "closed",
        2 => "error",
        _ => "safe",
    }
}

fn reply_for(q: &ProbeQuery) -> ProbeReply {
    if q.host.is_empty() {
        return ProbeReply {
            outcome: "error",
            data: String::new(),
            message: "missing host".to_string(),
        };
    }

    let outcome = outcome_for(&q.host);
    let (data, message) = match outcome {
        // Echo the heartbeat payload back like a leaking server would.
        "vulnerable" => (format!("{}{}", q.payload, "\0".repeat(16)), String::new()),
        "error" => (String::new(), "Please try again".to_string()),
        _ => (String::new(), String::new()),
    };

    ProbeReply {
        outcome,
        data,
        message,
    }
}

async fn probe(Query(q): Query<ProbeQuery>) -> Json<ProbeReply> {
    // Simulate handshake latency (5-20ms)
    let delay = rand::thread_rng().gen_range(5..=20);
    tokio::time::sleep(Duration::from_millis(delay)).await;

    let reply = reply_for(&q);
    tracing::debug!(
        host = %q.host,
        service = %q.service,
        outcome = reply.outcome,
        latency_ms = delay,
        "probe answered"
    );
    Json(reply)
}

async fn health() -> &'static str {
    "ok"
}

fn app() -> Router {
    Router::new()
        .route("/probe", get(probe))
        .route("/health", get(health))
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let addr = std::env::var("DEMO_PROBER_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
    tracing::info!(addr = %addr, "demo prober starting");

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!(error = %e, addr = %addr, "failed to bind listener");
            std::process::exit(1);
        }
    };
    if let Err(e) = axum::serve(listener, app()).await {
        tracing::error!(error = %e, "server error");
    }
}
