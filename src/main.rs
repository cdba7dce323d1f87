mod config;
mod delivery;
mod domain;
mod repository;
mod telemetry;
mod usecase;

use std::sync::Arc;

use anyhow::Context;
use axum::{
    extract::State,
    middleware,
    routing::get,
    Router,
};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tokio::sync::{mpsc, watch};
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use crate::delivery::http::v1::middleware::auth_middleware;
use crate::delivery::http::v1::ratings::{
    get_spot_aggregate, get_user_rating, list_categories, list_spot_ratings, submit_rating,
};
use crate::repository::postgres::{create_pool, PostgresRatingRepository, PostgresSpotRepository};
use crate::usecase::jwt::JwtService;
use crate::usecase::ratings::RatingsUseCase;
use crate::usecase::reconcile::ReconcileWorker;

const SYNC_FAILURE_QUEUE: usize = 1024;

pub type SpotRatingsUseCase = RatingsUseCase<PostgresRatingRepository, PostgresSpotRepository>;

pub struct AppState {
    pub ratings_usecase: Arc<SpotRatingsUseCase>,
    pub jwt_service: JwtService,
    pub metrics_handle: PrometheusHandle,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = config::AppConfig::from_env().context("failed to load configuration")?;

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let tracer_provider = if config.telemetry_enabled {
        let telemetry_config = telemetry::TelemetryConfig::from(&config);
        let provider = telemetry::init_telemetry_with_subscriber(&telemetry_config, env_filter)
            .map_err(|e| anyhow::anyhow!("failed to initialize telemetry: {e}"))?;
        Some(provider)
    } else {
        telemetry::init_subscriber_without_telemetry(env_filter);
        None
    };

    tracing::info!("starting the spot ratings service");

    let metrics_handle = PrometheusBuilder::new()
        .install_recorder()
        .context("failed to install Prometheus recorder")?;
    metrics_process::Collector::default().describe();
    tracing::info!("prometheus metrics initialized");

    let pool = create_pool(&config.database_url, config.database_max_connections)
        .await
        .context("failed to create database pool")?;
    tracing::info!("database pool created");

    sqlx::migrate!().run(&pool).await?;
    tracing::info!("database migrations applied");

    let (sync_failures_tx, sync_failures_rx) = mpsc::channel(SYNC_FAILURE_QUEUE);
    let ratings_usecase = Arc::new(
        RatingsUseCase::new(
            PostgresRatingRepository::new(pool.clone()),
            PostgresSpotRepository::new(pool),
        )
        .with_aggregate_timeout(config.aggregate_timeout())
        .with_sync_failures(sync_failures_tx),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = ReconcileWorker::new(
        Arc::clone(&ratings_usecase),
        sync_failures_rx,
        config.reconcile_interval(),
        shutdown_rx,
    );
    let worker_handle = tokio::spawn(worker.run());

    let shared_state = Arc::new(AppState {
        ratings_usecase,
        jwt_service: JwtService::new(config.jwt_secret.clone()),
        metrics_handle,
    });

    // All rating routes require authentication
    let ratings_api = Router::new()
        .route(
            "/api/v1/spots/{spot_id}/rating",
            get(get_user_rating).put(submit_rating),
        )
        .route("/api/v1/spots/{spot_id}/ratings", get(list_spot_ratings))
        .route("/api/v1/spots/{spot_id}/aggregate", get(get_spot_aggregate))
        .route("/api/v1/categories", get(list_categories))
        .layer(middleware::from_fn_with_state(
            shared_state.clone(),
            auth_middleware,
        ));

    let router = Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics))
        .merge(ratings_api)
        .layer(TraceLayer::new_for_http())
        .with_state(shared_state);

    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    tracing::info!(listen_addr = %config.listen_addr, "spot ratings service running");
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let _ = shutdown_tx.send(true);
    if let Err(e) = worker_handle.await {
        tracing::error!(error = %e, "reconcile worker panicked");
    }

    if let Some(provider) = tracer_provider {
        telemetry::shutdown_telemetry(provider);
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}

async fn metrics(State(state): State<Arc<AppState>>) -> String {
    metrics_process::Collector::default().collect();
    state.metrics_handle.render()
}

#[tracing::instrument]
async fn healthz() -> &'static str {
    "OK"
}
