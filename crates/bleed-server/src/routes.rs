use crate::metrics::{snapshot_handler, Metrics};
use crate::orchestrator::Orchestrator;
use crate::prober::Target;
use axum::extract::{Path, RawQuery, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Shared application state passed to all handlers.
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub metrics: Arc<Metrics>,
    pub redirect_host: String,
}

/// Build the public router. `/metrics` is only mounted when reporting is on.
/// Any path without a route redirects like `/`.
pub fn router(state: Arc<AppState>, metrics_enabled: bool) -> Router {
    let mut router = Router::new()
        .route("/", get(redirect_handler))
        .route("/status", get(status_handler))
        .route("/bleed/", get(empty_response))
        .route("/bleed/query", get(bleed_query_handler))
        .route("/bleed/{*host}", get(bleed_handler));

    if metrics_enabled {
        router = router.route("/metrics", get(snapshot_handler));
    }

    router
        .fallback(redirect_handler)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Send visitors to the front-end.
async fn redirect_handler(State(state): State<Arc<AppState>>) -> Response {
    (
        StatusCode::FOUND,
        [(header::LOCATION, state.redirect_host.clone())],
    )
        .into_response()
}

/// GET /status: load balancer health check.
async fn status_handler() -> &'static str {
    "OK"
}

async fn empty_response() -> StatusCode {
    StatusCode::OK
}

/// GET /bleed/{host}: everything after `/bleed/` is the host. Always https,
/// always skipping certificate validation.
async fn bleed_handler(
    State(state): State<Arc<AppState>>,
    Path(host): Path<String>,
) -> Response {
    check(state, Target::new(host, "https"), true).await
}

/// GET /bleed/query?u=<url>[&skip]
async fn bleed_query_handler(
    State(state): State<Arc<AppState>>,
    RawQuery(query): RawQuery,
) -> Response {
    let query = query.unwrap_or_default();
    let mut targets = Vec::new();
    let mut skips = 0;
    for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
        match key.as_ref() {
            "u" => targets.push(value.into_owned()),
            "skip" => skips += 1,
            _ => {}
        }
    }

    if targets.len() != 1 {
        return StatusCode::OK.into_response();
    }

    let target = target_from_param(&targets[0]);
    check(state, target, skips == 1).await
}

/// Interpret the `u` parameter. A URL with a host contributes its authority
/// and scheme; anything else is taken as a bare host over https.
///
/// The authority is kept as written (`example.com:443` stays as is), so the
/// echoed host and the cache key follow what the client sent.
pub fn target_from_param(raw: &str) -> Target {
    if let Ok(parsed) = url::Url::parse(raw) {
        if parsed.host_str().is_some_and(|h| !h.is_empty()) {
            let host = match raw_authority(raw) {
                Some(authority) => authority.to_string(),
                None => match (parsed.host_str(), parsed.port()) {
                    (Some(host), Some(port)) => format!("{host}:{port}"),
                    (Some(host), None) => host.to_string(),
                    (None, _) => raw.to_string(),
                },
            };
            return Target::new(host, parsed.scheme());
        }
    }
    Target::new(raw, "https")
}

/// `host[:port]` exactly as it appears between `scheme://` and the path,
/// without any userinfo.
fn raw_authority(raw: &str) -> Option<&str> {
    let (_, rest) = raw.split_once("://")?;
    let end = rest
        .find(|c| matches!(c, '/' | '?' | '#'))
        .unwrap_or(rest.len());
    let authority = &rest[..end];
    let host = authority.rsplit_once('@').map_or(authority, |(_, h)| h);
    (!host.is_empty()).then_some(host)
}

/// Run the check in its own task so a client hanging up does not abort an
/// in-flight probe or cache write, then render the result.
async fn check(state: Arc<AppState>, target: Target, skip: bool) -> Response {
    let orchestrator = Arc::clone(&state.orchestrator);
    let host = target.host.clone();
    let task = tokio::spawn(async move { orchestrator.handle(&target, skip).await });

    let result = match task.await {
        Ok(result) => result,
        Err(e) => {
            tracing::error!(host = %host, error = %e, "check task failed");
            None
        }
    };

    let Some(result) = result else {
        return StatusCode::OK.into_response();
    };

    let body = match serde_json::to_vec(&result) {
        Ok(body) => body,
        Err(e) => {
            tracing::error!(host = %host, error = %e, "failed to serialize result");
            Vec::new()
        }
    };

    (
        [
            (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
            (header::CONTENT_TYPE, "application/json"),
        ],
        body,
    )
        .into_response()
}
