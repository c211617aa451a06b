pub mod admin;
pub mod config;
pub mod error;
pub mod metrics;
pub mod observability;
pub mod rate_limit;

use crate::admin::admin_routes;
use crate::config::AppConfig;
use crate::error::{RateLimitError, Result};
use crate::metrics::{metrics_handler, MetricsService};
use crate::observability::request_id_middleware;
use crate::rate_limit::{BackgroundTasks, RateLimitMiddleware, RateLimitMonitor, RateLimiter};
use axum::{middleware::from_fn, routing::get, Json, Router};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::info;

pub use observability::init_tracing;

/// Build the rate limiting middleware described by `config`
pub fn build_middleware(config: &AppConfig) -> RateLimitMiddleware {
    RateLimitMiddleware::new(
        RateLimiter::in_memory(),
        Arc::new(RateLimitMonitor::with_max_tracked_keys(
            config.rate_limit.monitor.max_tracked_keys,
        )),
        config.rate_limit.clone(),
        config.server.timeout(),
    )
}

/// Put `api` behind the rate limiter, alongside health and metrics routes
///
/// Admin routes are not part of this router; see [`build_admin_app`].
pub fn build_app(
    api: Router,
    middleware: RateLimitMiddleware,
    metrics: Option<MetricsService>,
) -> Router {
    let mut app = Router::new()
        .route("/health", get(health_handler))
        .merge(api);

    if let Some(metrics) = metrics {
        app = app.merge(
            Router::new()
                .route("/metrics", get(metrics_handler))
                .with_state(metrics),
        );
    }

    // Request IDs are assigned before the limiter sees the request
    middleware
        .apply(app)
        .layer(from_fn(request_id_middleware))
        .layer(TraceLayer::new_for_http())
}

/// Admin routes for the separate admin listener
pub fn build_admin_app(middleware: RateLimitMiddleware) -> Router {
    admin_routes(middleware)
        .layer(from_fn(request_id_middleware))
        .layer(TraceLayer::new_for_http())
}

/// Serve the admin routes on their own address until `shutdown` is cancelled
async fn serve_admin(
    addr: String,
    middleware: RateLimitMiddleware,
    shutdown: CancellationToken,
) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Admin API listening on {}", addr);

    axum::serve(listener, build_admin_app(middleware))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| RateLimitError::Internal(format!("Admin server error: {}", e)))
}

/// Serve `api` behind the rate limiter until Ctrl-C
pub async fn run(config: AppConfig, api: Router) -> Result<()> {
    config.validate()?;

    info!(
        "Server listening on {}:{}",
        config.server.host, config.server.port
    );

    let metrics = MetricsService::new()?;
    let middleware = build_middleware(&config);

    let tasks = if config.rate_limit.enabled {
        info!(
            strategy = ?config.rate_limit.key_strategy,
            limit = config.rate_limit.default.limit,
            window_secs = config.rate_limit.default.window_secs,
            "Rate limiting enabled"
        );
        middleware.spawn_background_tasks()
    } else {
        info!("Rate limiting disabled");
        BackgroundTasks::new(middleware.shutdown_token(), Vec::new())
    };

    let app = build_app(api, middleware.clone(), Some(metrics));

    let admin = if config.admin.enabled {
        let addr = format!("{}:{}", config.admin.host, config.admin.port);
        Some(tokio::spawn(serve_admin(
            addr,
            middleware.clone(),
            middleware.shutdown_token(),
        )))
    } else {
        None
    };

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!("Ready to accept connections");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .map_err(|e| RateLimitError::Internal(format!("Server error: {}", e)))?;

    middleware.shutdown_token().cancel();
    tasks.shutdown().await;

    if let Some(admin) = admin {
        match admin.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!(error = %e, "Admin API failed"),
            Err(e) => tracing::error!(error = %e, "Admin API task panicked"),
        }
    }

    info!("Server stopped");
    Ok(())
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(json!({ "success": true, "data": { "status": "ok" } }))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
