use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use serde::Deserialize;
use std::time::Duration;

pub type HttpClient = Client<hyper_util::client::legacy::connect::HttpConnector, Body>;

/// A host plus the service it is probed over (e.g. `https`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub host: String,
    pub service: String,
}

impl Target {
    pub fn new(host: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            service: service.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    Vulnerable,
    Safe,
    Closed,
    Error(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeReport {
    /// Bytes leaked by the target, if any, rendered as text.
    pub data: String,
    pub outcome: ProbeOutcome,
}

impl ProbeReport {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            data: String::new(),
            outcome: ProbeOutcome::Error(message.into()),
        }
    }
}

/// Performs the live vulnerability check against a target.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, target: &Target, payload: &[u8], skip_validation: bool) -> ProbeReport;
}

/// Wire shape of the probe service reply.
#[derive(Debug, Deserialize)]
struct ProbeReply {
    outcome: String,
    #[serde(default)]
    data: String,
    #[serde(default)]
    message: String,
}

impl From<ProbeReply> for ProbeReport {
    fn from(reply: ProbeReply) -> Self {
        let outcome = match reply.outcome.to_lowercase().as_str() {
            "vulnerable" => ProbeOutcome::Vulnerable,
            "safe" => ProbeOutcome::Safe,
            "closed" => ProbeOutcome::Closed,
            "error" => ProbeOutcome::Error(reply.message),
            other => ProbeOutcome::Error(format!("unknown probe outcome: {other}")),
        };
        ProbeReport {
            data: reply.data,
            outcome,
        }
    }
}

/// Delegates probes to an external probe service over HTTP.
///
/// Every failure (transport, status, body, timeout) comes back as
/// `ProbeOutcome::Error` so the caller can report it in the result payload.
pub struct HttpProber {
    client: HttpClient,
    base_url: String,
    timeout: Duration,
}

impl HttpProber {
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        Self {
            client: Client::builder(TokioExecutor::new()).build_http(),
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
        }
    }

    fn probe_uri(&self, target: &Target, payload: &[u8], skip_validation: bool) -> String {
        let query = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("host", &target.host)
            .append_pair("service", &target.service)
            .append_pair("skip", if skip_validation { "true" } else { "false" })
            .append_pair("payload", &String::from_utf8_lossy(payload))
            .finish();
        format!("{}/probe?{}", self.base_url, query)
    }

    async fn request(&self, uri: &str) -> Result<ProbeReport, String> {
        let req = Request::builder()
            .method("GET")
            .uri(uri)
            .body(Body::empty())
            .map_err(|e| format!("failed to build probe request: {e}"))?;

        let resp = self
            .client
            .request(req)
            .await
            .map_err(|e| format!("probe service unreachable: {e}"))?;

        let status = resp.status();
        let body = resp
            .into_body()
            .collect()
            .await
            .map_err(|e| format!("failed to read probe reply: {e}"))?
            .to_bytes();

        if status != StatusCode::OK {
            return Err(format!("probe service returned {}", status.as_u16()));
        }

        let reply: ProbeReply = serde_json::from_slice(&body)
            .map_err(|e| format!("malformed probe reply: {e}"))?;
        Ok(reply.into())
    }
}

#[async_trait]
impl Prober for HttpProber {
    async fn probe(&self, target: &Target, payload: &[u8], skip_validation: bool) -> ProbeReport {
        let uri = self.probe_uri(target, payload, skip_validation);

        match tokio::time::timeout(self.timeout, self.request(&uri)).await {
            Ok(Ok(report)) => report,
            Ok(Err(message)) => {
                tracing::error!(host = %target.host, error = %message, "probe request failed");
                ProbeReport::error(message)
            }
            Err(_) => {
                let message = format!("probe timed out after {}ms", self.timeout.as_millis());
                tracing::error!(host = %target.host, error = %message, "probe request failed");
                ProbeReport::error(message)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::Query;
    use axum::routing::get;
    use axum::{Json, Router};
    use std::collections::HashMap;

    async fn fake_probe(Query(q): Query<HashMap<String, String>>) -> Json<serde_json::Value> {
        let host = q.get("host").cloned().unwrap_or_default();
        let reply = match host.as_str() {
            "vuln.test" => serde_json::json!({
                "outcome": "vulnerable",
                "data": format!("{}|{}|{}", q["service"], q["skip"], q["payload"]),
            }),
            "safe.test" => serde_json::json!({"outcome": "safe"}),
            "closed.test" => serde_json::json!({"outcome": "closed"}),
            "weird.test" => serde_json::json!({"outcome": "maybe"}),
            _ => serde_json::json!({"outcome": "error", "message": "Please try again"}),
        };
        Json(reply)
    }

    async fn spawn_probe_service() -> String {
        let app = Router::new().route("/probe", get(fake_probe));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn maps_reply_outcomes() {
        let base = spawn_probe_service().await;
        let prober = HttpProber::new(&format!("{base}/"), Duration::from_secs(5));

        let vuln = prober
            .probe(&Target::new("vuln.test", "https"), b"hello", true)
            .await;
        assert_eq!(vuln.outcome, ProbeOutcome::Vulnerable);
        assert_eq!(vuln.data, "https|true|hello");

        let safe = prober.probe(&Target::new("safe.test", "https"), b"", false).await;
        assert_eq!(safe.outcome, ProbeOutcome::Safe);

        let closed = prober.probe(&Target::new("closed.test", "smtp"), b"", false).await;
        assert_eq!(closed.outcome, ProbeOutcome::Closed);

        let mismatch = prober.probe(&Target::new("x.test", "https"), b"", false).await;
        assert_eq!(
            mismatch.outcome,
            ProbeOutcome::Error("Please try again".to_string())
        );

        let weird = prober.probe(&Target::new("weird.test", "https"), b"", false).await;
        assert!(matches!(weird.outcome, ProbeOutcome::Error(m) if m.contains("maybe")));
    }

    #[tokio::test]
    async fn non_200_reply_is_an_error() {
        let base = spawn_probe_service().await;
        let prober = HttpProber::new(&format!("{base}/nowhere"), Duration::from_secs(5));

        let report = prober.probe(&Target::new("a.test", "https"), b"", false).await;
        assert_eq!(
            report.outcome,
            ProbeOutcome::Error("probe service returned 404".to_string())
        );
    }

    #[tokio::test]
    async fn unreachable_service_is_an_error() {
        // Bind and drop to get a port nobody listens on.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let prober = HttpProber::new(&format!("http://{addr}"), Duration::from_secs(2));
        let report = prober.probe(&Target::new("a.test", "https"), b"", false).await;
        assert!(matches!(report.outcome, ProbeOutcome::Error(_)));
        assert_eq!(report.data, "");
    }
}
