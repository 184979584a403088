mod config;
mod keepalive;
mod metrics;
mod orchestrator;
mod prober;
mod resp;
mod routes;

use axum::routing::get;
use axum::Router;
use bleed_cache::{ResultCache, ShardedStore, Store, SystemClock};
use clap::Parser;
use config::{Config, FileConfig, StoreBackend};
use metrics::{Metrics, PrometheusReporter, Reporter};
use orchestrator::Orchestrator;
use prober::HttpProber;
use resp::RespStore;
use routes::AppState;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Heartbleed test server.
#[derive(Parser)]
#[command(name = "bleed-server", version)]
struct Args {
    /// Path to the TOML config file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Listen address, overrides `server.listen_addr`
    #[arg(long)]
    listen: Option<String>,

    /// Where requests to "/" are redirected, overrides `server.redirect_host`
    #[arg(long)]
    redirect_host: Option<String>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let args = Args::parse();

    let config = match load_config(&args) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, path = %args.config.display(), "invalid configuration");
            std::process::exit(1);
        }
    };

    let shutdown = CancellationToken::new();

    // Metrics: Prometheus exporter on its own port when configured
    let metrics_router = match &config.metrics.server_addr {
        Some(_) => {
            let prom_handle = match metrics_exporter_prometheus::PrometheusBuilder::new()
                .install_recorder()
            {
                Ok(h) => h,
                Err(e) => {
                    tracing::error!(error = %e, "failed to install prometheus recorder");
                    std::process::exit(1);
                }
            };
            Some(Router::new().route(
                "/metrics",
                get(move || {
                    let h = prom_handle.clone();
                    async move { h.render() }
                }),
            ))
        }
        None => None,
    };

    let reporter: Option<Arc<dyn Reporter>> = metrics_router
        .as_ref()
        .map(|_| Arc::new(PrometheusReporter) as Arc<dyn Reporter>);
    let metrics = Arc::new(Metrics::new(&config.metrics.prefix, reporter));

    let prober = Arc::new(HttpProber::new(&config.prober.url, config.prober.timeout));
    let mut orchestrator = Orchestrator::new(
        prober,
        Arc::clone(&metrics),
        config.prober.payload.clone(),
        config.expose_vulnerable_data,
    );

    if let Some(cache) = &config.cache {
        let store: Arc<dyn Store> = match cache.backend {
            StoreBackend::Memory => Arc::new(ShardedStore::new()),
            StoreBackend::Resp => Arc::new(RespStore::new(&cache.resp_addr, &cache.name)),
        };

        if let Some(every) = cache.keepalive {
            tokio::spawn(keepalive::run_keepalive(
                Arc::clone(&store),
                every,
                cache.timeout,
                shutdown.clone(),
            ));
        }

        orchestrator = orchestrator.with_cache(ResultCache::new(
            store,
            Arc::new(SystemClock),
            cache.expiry,
            cache.freshness,
            cache.timeout,
        ));
    }

    let state = Arc::new(AppState {
        orchestrator: Arc::new(orchestrator),
        metrics: Arc::clone(&metrics),
        redirect_host: config.redirect_host.clone(),
    });

    let app_router = routes::router(Arc::clone(&state), metrics_router.is_some());

    tracing::info!(
        listen = %config.listen_addr,
        redirect = %config.redirect_host,
        cache = config.cache.is_some(),
        expiry_secs = config.cache.as_ref().map(|c| c.expiry.as_secs()),
        freshness = config.cache.as_ref().map(|c| c.freshness.to_string()),
        metrics = ?config.metrics.server_addr,
        prober = %config.prober.url,
        "bleed server starting"
    );

    let listener = match tokio::net::TcpListener::bind(&config.listen_addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!(error = %e, addr = %config.listen_addr, "failed to bind listener");
            std::process::exit(1);
        }
    };

    if let (Some(router), Some(addr)) = (metrics_router, config.metrics.server_addr.clone()) {
        let metrics_listener = match tokio::net::TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(e) => {
                tracing::error!(error = %e, addr = %addr, "failed to bind metrics listener");
                std::process::exit(1);
            }
        };
        let metrics_shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = axum::serve(metrics_listener, router)
                .with_graceful_shutdown(metrics_shutdown.cancelled_owned())
                .await
            {
                tracing::error!(error = %e, "metrics server error");
            }
        });
    }

    // Spawn shutdown signal handler
    let shutdown_clone = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal(shutdown_clone).await;
    });

    if let Err(e) = axum::serve(listener, app_router)
        .with_graceful_shutdown(shutdown.clone().cancelled_owned())
        .await
    {
        tracing::error!(error = %e, "server error");
    }

    tracing::info!("bleed server shut down");
}

/// Read the config file (a missing default file means "all defaults"), apply
/// CLI overrides, then validate.
fn load_config(args: &Args) -> Result<Config, config::ConfigError> {
    let mut file = if args.config.exists() {
        let file = FileConfig::load(&args.config)?;
        tracing::info!(path = %args.config.display(), "loaded config");
        file
    } else if args.config == PathBuf::from("config.toml") {
        tracing::info!("no config.toml found, using defaults");
        FileConfig::default()
    } else {
        // Explicit path that does not exist: let the read fail loudly.
        FileConfig::load(&args.config)?
    };

    if let Some(listen) = &args.listen {
        file.server.listen_addr = listen.clone();
    }
    if let Some(host) = &args.redirect_host {
        file.server.redirect_host = Some(host.clone());
    }

    Config::from_file(file)
}

/// Listen for SIGINT (Ctrl+C) or SIGTERM and cancel the shutdown token.
async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {},
                    _ = sigterm.recv() => {},
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to install SIGTERM handler");
                ctrl_c.await.ok();
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }

    tracing::info!("shutdown signal received, draining connections...");
    token.cancel();
}
