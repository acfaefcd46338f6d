// src/main.rs
mod api;
mod cache;
mod config;
mod error;
mod keys;
mod models;
mod normalize;
mod service;
mod store;
mod upstream;

use crate::api::AppContext;
use crate::cache::CacheService;
use crate::config::Config;
use crate::error::handle_rejection;
use crate::keys::ApiKeyManager;
use crate::service::StockService;
use crate::store::ScyllaStore;
use crate::upstream::StockApiClient;
use env_logger::Builder;
use log::{error, info, warn, LevelFilter};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::task;
use tokio::time::{self, Duration};
use warp::{Filter, Rejection, Reply};

async fn purge_worker(cache: Arc<CacheService>, every: Duration) {
    let mut ticker = time::interval(every);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        if cache.is_empty() {
            continue;
        }
        let purged = cache.purge_expired();
        if purged > 0 {
            info!("Purged {} expired cache entries.", purged);
        }
    }
}

async fn warmup_worker(service: Arc<StockService>, every: Duration) {
    let mut ticker = time::interval(every);
    loop {
        ticker.tick().await;
        if let Err(e) = service.warm_up().await {
            error!("Cache warm-up failed: {}", e);
        }
    }
}

fn cors(origins: &[String]) -> warp::cors::Builder {
    let builder = warp::cors()
        .allow_methods(vec!["GET", "DELETE", "OPTIONS"])
        .allow_headers(vec!["content-type", "authorization"])
        .max_age(Duration::from_secs(60 * 60));

    if origins.is_empty() {
        builder.allow_any_origin()
    } else {
        builder.allow_origins(origins.iter().map(String::as_str))
    }
}

/// Routes plus the layers every response goes through: error envelope, CORS
/// headers and the access log.
fn app(
    ctx: AppContext,
    origins: &[String],
    expose_details: bool,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    api::routes(ctx)
        .recover(move |err| handle_rejection(err, expose_details))
        .with(cors(origins))
        .with(warp::log("stock_dashboard::api"))
}

async fn build_cache(config: &Config) -> CacheService {
    let cache = CacheService::new(config.cache_max_entries);
    let Some(node) = config.scylla_node.as_deref() else {
        return cache;
    };

    match ScyllaStore::connect(node).await {
        Ok(store) => cache.with_store(Arc::new(store)),
        Err(e) => {
            warn!("Persistent cache disabled: {}", e);
            cache
        }
    }
}

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    Builder::new()
        .filter_level(LevelFilter::Info)
        .parse_default_env()
        .format_timestamp_secs()
        .init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    info!(
        "Starting the stock dashboard API ({})...",
        config.environment.as_str()
    );

    let keys = match ApiKeyManager::new(config.api_keys.clone()) {
        Ok(keys) => keys,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };
    info!("Loaded {} upstream API key(s).", keys.len());

    let client = match StockApiClient::new(&config.base_url, keys, config.upstream_timeout) {
        Ok(client) => client,
        Err(e) => {
            error!("Failed to initialize upstream client: {}", e);
            std::process::exit(1);
        }
    };

    let cache = Arc::new(build_cache(&config).await);
    let service = Arc::new(StockService::new(
        client,
        cache.clone(),
        config.watchlist.clone(),
    ));

    task::spawn(purge_worker(cache, config.purge_interval));
    if let Some(every) = config.warmup_interval {
        task::spawn(warmup_worker(service.clone(), every));
    }

    let ctx = AppContext {
        service,
        started_at: Instant::now(),
        environment: config.environment,
    };
    let api = app(ctx, &config.cors_origins, config.expose_error_details());

    let address = SocketAddr::from(([0, 0, 0, 0], config.port));
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Received Ctrl+C, shutting down.");
    };

    match warp::serve(api).try_bind_with_graceful_shutdown(address, shutdown) {
        Ok((bound, server)) => {
            info!("Server running on http://{}", bound);
            server.await;
            info!("Server stopped.");
        }
        Err(e) => {
            error!("Failed to bind {}: {}", address, e);
            std::process::exit(1);
        }
    }
}
