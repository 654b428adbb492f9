use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use weather_proxy::cache::CacheAsideStore;
use weather_proxy::config::ProxyConfig;
use weather_proxy::fetch::{CoordinatorOptions, FetchCoordinator};
use weather_proxy::http::{AppState, HttpServer};
use weather_proxy::ratelimit::{LimiterConfig, SlidingWindowLimiter};
use weather_proxy::weather::{VisualCrossingOrigin, API_KEY_ENV};

/// Rate-limited, cache-aside weather API proxy.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Path to a YAML configuration file
    #[arg(short, long, env = "WEATHER_PROXY_CONFIG")]
    config: Option<PathBuf>,

    /// Override the HTTP listen address
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_json);

    info!("Starting Weather Proxy");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let mut config = ProxyConfig::load(args.config.as_deref())?;
    if let Some(listen) = args.listen {
        config.server.http_addr = listen;
    }
    info!(http_addr = %config.server.http_addr, "Configuration loaded");

    // Initialize the rate limiter
    let mut limiter_config =
        LimiterConfig::new(config.rate_limiting.limit, config.rate_limiting.window())?;
    if let Some(interval) = config.rate_limiting.cleanup_interval() {
        limiter_config = limiter_config.with_cleanup_interval(interval)?;
    }
    let limiter = Arc::new(SlidingWindowLimiter::new(limiter_config));
    info!(
        limit = config.rate_limiting.limit,
        window_secs = config.rate_limiting.window_secs,
        "Rate limiter initialized"
    );

    // Connect the cache; a failure leaves caching disabled
    let store = if config.cache.enabled {
        CacheAsideStore::connect(&config.cache.redis_url, config.cache.ttl()).await
    } else {
        CacheAsideStore::disabled(config.cache.ttl())
    };
    store.log_mode();

    let origin = VisualCrossingOrigin::new(&config.origin)?;
    if !origin.has_api_key() {
        warn!("{} not set; weather requests will fail until it is configured", API_KEY_ENV);
    }

    let options = CoordinatorOptions::new(config.origin.timeout())
        .with_background_population(config.cache.populate_in_background);
    let coordinator = FetchCoordinator::new(limiter, store, Arc::new(origin), options);

    let state = AppState::new(Arc::new(coordinator))
        .with_trusted_forwarded_headers(config.server.trust_forwarded_headers);
    if config.server.trust_forwarded_headers {
        info!("Identifying clients by X-Forwarded-For / X-Real-IP");
    }
    let server = HttpServer::new(config.server.http_addr, state);

    // Run the server with graceful shutdown on Ctrl+C
    server.serve_with_shutdown(shutdown_signal()).await?;

    info!("Weather Proxy stopped");
    Ok(())
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
