//! Axum API server binary.

use std::net::SocketAddr;
use std::time::Duration;

use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crowd_api::{create_router, metrics, ApiConfig, AppState};
use crowd_media::DetectionConfig;
use crowd_worker::{TaskReaper, WorkerConfig};

/// How long in-flight analyses get to finish after the listener closes.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing with colored output for dev, JSON for production
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::from_default_env()
        .add_directive("crowd=info".parse().unwrap())
        .add_directive("ort=warn".parse().unwrap());

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }

    info!("Starting crowd-api");

    // Load configuration
    let config = ApiConfig::from_env();
    let worker_config = WorkerConfig::from_env();
    let detection_config = DetectionConfig::from_env();
    info!(
        "API config: host={}, port={}, environment={}, production={}",
        config.host,
        config.port,
        config.environment,
        config.is_production()
    );
    info!(
        "Worker config: max_jobs={}, work_dir={}",
        worker_config.max_concurrent_jobs,
        worker_config.work_dir.display()
    );

    // Create application state
    let state = match AppState::new(config.clone(), &worker_config, detection_config) {
        Ok(s) => s,
        Err(e) => {
            error!("Failed to create application state: {:#}", e);
            std::process::exit(1);
        }
    };

    if !state.classifier.is_available() {
        warn!("Person detection model unavailable; analysis endpoints will reject requests");
    }

    // Initialize metrics
    let metrics_enabled = std::env::var("METRICS_ENABLED")
        .map(|v| v == "true" || v == "1")
        .unwrap_or(true);

    let metrics_handle = if metrics_enabled {
        info!("Prometheus metrics enabled at /metrics");
        Some(metrics::init_metrics())
    } else {
        None
    };

    // Start finished-task eviction in the background
    let reaper = TaskReaper::new(state.registry.clone(), &worker_config);
    tokio::spawn(async move {
        reaper.run().await;
    });

    let executor = state.executor.clone();

    // Create router
    let app = create_router(state, metrics_handle);

    // Bind and serve
    let addr: SocketAddr = match format!("{}:{}", config.host, config.port).parse() {
        Ok(addr) => addr,
        Err(e) => {
            error!("Invalid bind address: {}", e);
            std::process::exit(1);
        }
    };

    info!("Listening on {}", addr);

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind {}: {}", addr, e);
            std::process::exit(1);
        }
    };

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!("Server error: {}", e);
    }

    // Queued tasks fail with a shutdown cause; running ones get a grace period
    executor.shutdown();
    if !executor.wait_for_jobs(SHUTDOWN_GRACE).await {
        warn!(
            active = executor.active_jobs(),
            "Timed out waiting for video analyses to finish"
        );
    }

    info!("Server shutdown complete");
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Received shutdown signal");
}
