use bleed_cache::FreshnessPolicy;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("missing required setting: {0}")]
    Missing(&'static str),

    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Shape of `config.toml`. Validated into [`Config`] once at startup.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub prober: ProberConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    #[serde(default)]
    pub redirect_host: Option<String>,
    #[serde(default)]
    pub expose_vulnerable_data: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_expiry")]
    pub expiry: String,
    #[serde(default = "default_freshness")]
    pub freshness: String,
    #[serde(default = "default_backend")]
    pub backend: String,
    #[serde(default = "default_cache_name")]
    pub name: String,
    #[serde(default = "default_resp_addr")]
    pub resp_addr: String,
    #[serde(default = "default_store_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_keepalive_secs")]
    pub keepalive_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub server_addr: Option<String>,
    #[serde(default = "default_metrics_prefix")]
    pub prefix: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProberConfig {
    #[serde(default = "default_prober_url")]
    pub url: String,
    #[serde(default = "default_prober_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_payload")]
    pub payload: String,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    /// In-process sharded map.
    Memory,
    /// External Redis-compatible server.
    Resp,
}

/// Validated settings, passed explicitly to every component that needs them.
#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: String,
    pub redirect_host: String,
    pub expose_vulnerable_data: bool,
    pub cache: Option<CacheSettings>,
    pub metrics: MetricsSettings,
    pub prober: ProberSettings,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub expiry: Duration,
    pub freshness: FreshnessPolicy,
    pub backend: StoreBackend,
    pub name: String,
    pub resp_addr: String,
    pub timeout: Duration,
    /// `None` disables the keepalive task.
    pub keepalive: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct MetricsSettings {
    /// Address of the Prometheus listener. `None` disables reporting and
    /// the JSON `/metrics` route.
    pub server_addr: Option<String>,
    pub prefix: String,
}

#[derive(Debug, Clone)]
pub struct ProberSettings {
    pub url: String,
    pub timeout: Duration,
    pub payload: String,
}

impl Config {
    pub fn from_file(file: FileConfig) -> Result<Self, ConfigError> {
        let redirect_host = file
            .server
            .redirect_host
            .filter(|h| !h.trim().is_empty())
            .ok_or(ConfigError::Missing("server.redirect_host"))?;

        if file.server.listen_addr.trim().is_empty() {
            return Err(ConfigError::Missing("server.listen_addr"));
        }

        let cache = if file.cache.enabled {
            Some(validate_cache(&file.cache)?)
        } else {
            None
        };

        if file.metrics.server_addr.as_deref().is_some_and(|a| a.trim().is_empty()) {
            return Err(ConfigError::Invalid {
                field: "metrics.server_addr",
                reason: "must not be empty when set".to_string(),
            });
        }

        if file.prober.url.trim().is_empty() {
            return Err(ConfigError::Missing("prober.url"));
        }
        if file.prober.timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "prober.timeout_ms",
                reason: "must be greater than zero".to_string(),
            });
        }

        Ok(Config {
            listen_addr: file.server.listen_addr,
            redirect_host,
            expose_vulnerable_data: file.server.expose_vulnerable_data,
            cache,
            metrics: MetricsSettings {
                server_addr: file.metrics.server_addr,
                prefix: file.metrics.prefix.trim_end_matches('.').to_string(),
            },
            prober: ProberSettings {
                url: file.prober.url,
                timeout: Duration::from_millis(file.prober.timeout_ms),
                payload: file.prober.payload,
            },
        })
    }
}

fn validate_cache(cache: &CacheConfig) -> Result<CacheSettings, ConfigError> {
    let expiry = humantime::parse_duration(cache.expiry.trim()).map_err(|e| {
        ConfigError::Invalid {
            field: "cache.expiry",
            reason: format!("{:?}: {e}", cache.expiry),
        }
    })?;
    if expiry.as_secs() == 0 {
        return Err(ConfigError::Invalid {
            field: "cache.expiry",
            reason: "must be at least one second".to_string(),
        });
    }
    // Records carry unix seconds, so the expiry must too.
    if expiry.subsec_nanos() != 0 {
        return Err(ConfigError::Invalid {
            field: "cache.expiry",
            reason: format!("{:?} is not a whole number of seconds", cache.expiry),
        });
    }

    let freshness = cache
        .freshness
        .parse::<FreshnessPolicy>()
        .map_err(|reason| ConfigError::Invalid {
            field: "cache.freshness",
            reason,
        })?;

    let backend = match cache.backend.trim().to_lowercase().as_str() {
        "memory" => StoreBackend::Memory,
        "resp" | "redis" => StoreBackend::Resp,
        other => {
            return Err(ConfigError::Invalid {
                field: "cache.backend",
                reason: format!("unknown backend: {other}, use 'memory' or 'resp'"),
            })
        }
    };

    if cache.name.trim().is_empty() {
        return Err(ConfigError::Missing("cache.name"));
    }
    if cache.timeout_ms == 0 {
        return Err(ConfigError::Invalid {
            field: "cache.timeout_ms",
            reason: "must be greater than zero".to_string(),
        });
    }

    Ok(CacheSettings {
        expiry,
        freshness,
        backend,
        name: cache.name.clone(),
        resp_addr: cache.resp_addr.clone(),
        timeout: Duration::from_millis(cache.timeout_ms),
        keepalive: (cache.keepalive_secs > 0).then(|| Duration::from_secs(cache.keepalive_secs)),
    })
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            redirect_host: None,
            expose_vulnerable_data: false,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            expiry: default_expiry(),
            freshness: default_freshness(),
            backend: default_backend(),
            name: default_cache_name(),
            resp_addr: default_resp_addr(),
            timeout_ms: default_store_timeout_ms(),
            keepalive_secs: default_keepalive_secs(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            server_addr: None,
            prefix: default_metrics_prefix(),
        }
    }
}

impl Default for ProberConfig {
    fn default() -> Self {
        Self {
            url: default_prober_url(),
            timeout_ms: default_prober_timeout_ms(),
            payload: default_payload(),
        }
    }
}

fn default_listen_addr() -> String {
    "0.0.0.0:8082".to_string()
}
fn default_expiry() -> String {
    "10m".to_string()
}
fn default_freshness() -> String {
    "bucketed".to_string()
}
fn default_backend() -> String {
    "memory".to_string()
}
fn default_cache_name() -> String {
    "heartbleed".to_string()
}
fn default_resp_addr() -> String {
    "127.0.0.1:6379".to_string()
}
fn default_store_timeout_ms() -> u64 {
    500
}
fn default_keepalive_secs() -> u64 {
    60
}
fn default_metrics_prefix() -> String {
    "heartbleed".to_string()
}
fn default_prober_url() -> String {
    "http://127.0.0.1:3000".to_string()
}
fn default_prober_timeout_ms() -> u64 {
    5000
}
fn default_payload() -> String {
    "heartbleed.mozilla.com".to_string()
}
