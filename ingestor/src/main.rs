mod cache;
mod config;
mod db;
mod decode;
mod dispatch;
mod errors;
mod metrics;
mod model;
mod mqtt;
mod reconnect;
mod rest;
mod sinks;
mod tls;

use crate::cache::RedisLiveCache;
use crate::config::Settings;
use crate::db::{PgDeviceResolver, PgTelemetryStore};
use crate::dispatch::Dispatcher;
use axum::{routing::get, Router};
use clap::Parser;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let settings = Settings::parse();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let broker = settings.broker();
    let retry_policy = settings.retry_policy();
    let redis = settings.redis();

    info!("Starting envqmon ingestor");
    info!("MQTT broker: {}:{} (TLS: {})", broker.host, broker.port, broker.tls.enabled);
    info!("HTTP server: {}", settings.http_addr);
    info!(
        "Database: {}",
        settings.database_url.split('@').last().unwrap_or("***")
    );

    if let Err(e) = metrics::init_metrics() {
        warn!("Failed to register metrics: {}", e);
    }

    let pool = match db::make_pool(&settings.database_url, settings.db_max_connections).await {
        Ok(pool) => pool,
        Err(e) => {
            error!("Failed to connect to database: {}", e);
            std::process::exit(1);
        }
    };

    let cache = match RedisLiveCache::connect(&redis).await {
        Ok(cache) => cache,
        Err(e) => {
            error!("Failed to connect to Redis: {}", e);
            std::process::exit(1);
        }
    };

    let store = PgTelemetryStore::new(pool.clone(), settings.db_insert_attempts);
    let mut dispatcher = Dispatcher::new(Arc::new(store), Arc::new(cache.clone()));

    if let Some(registry_url) = &settings.device_database_url {
        match db::make_registry_pool(registry_url, settings.db_max_connections).await {
            Ok(registry) => {
                info!(
                    "Device name resolution enabled (unresolved: {:?})",
                    settings.on_unresolved_device
                );
                dispatcher = dispatcher.with_resolver(
                    Arc::new(PgDeviceResolver::new(registry)),
                    settings.on_unresolved_device,
                );
            }
            Err(e) => {
                error!("Failed to connect to device registry: {}", e);
                std::process::exit(1);
            }
        }
    }

    // Build HTTP app with REST API and metrics endpoint
    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .merge(rest::create_router(pool, cache));

    let listener = match tokio::net::TcpListener::bind(&settings.http_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind to {}: {}", settings.http_addr, e);
            std::process::exit(1);
        }
    };

    info!("HTTP server listening on {}", settings.http_addr);

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("HTTP server error: {}", e);
        }
    });

    let exit_code = tokio::select! {
        result = reconnect::supervise(&broker, &retry_policy, &dispatcher) => {
            match result {
                Ok(()) => {
                    info!("MQTT connection closed");
                    0
                }
                Err(e) => {
                    error!("MQTT ingestion stopped: {}", e);
                    1
                }
            }
        }
        _ = server_handle => {
            error!("HTTP server terminated");
            1
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
            0
        }
    };

    info!("Shutting down");
    std::process::exit(exit_code);
}

async fn metrics_handler() -> String {
    metrics::gather_metrics()
}
