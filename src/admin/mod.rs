//! Administrative endpoints for inspecting and resetting rate limits

use crate::error::Result;
use crate::rate_limit::{RateLimitMiddleware, RequestContext};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

#[derive(Debug, Deserialize)]
pub struct TopQuery {
    /// How many violators to list
    pub top: Option<usize>,
}

/// Routes mounted under `/admin/rate-limit`
pub fn admin_routes(middleware: RateLimitMiddleware) -> Router {
    Router::new()
        .route("/admin/rate-limit/metrics", get(metrics_snapshot))
        .route("/admin/rate-limit/keys/:key", get(key_stats).delete(reset_key))
        .with_state(middleware)
}

async fn metrics_snapshot(
    State(mw): State<RateLimitMiddleware>,
    Query(query): Query<TopQuery>,
) -> impl IntoResponse {
    let top_n = query.top.unwrap_or(mw.settings().monitor.top_n);
    let snapshot = mw.monitor().snapshot();
    let block_rate = snapshot.block_rate();
    let top_violators: Vec<_> = snapshot
        .top_violators(top_n)
        .into_iter()
        .map(|(key, violations)| json!({ "key": key, "violations": violations }))
        .collect();

    Json(json!({
        "success": true,
        "data": {
            "metrics": snapshot,
            "block_rate": block_rate,
            "top_violators": top_violators,
        },
    }))
}

async fn key_stats(
    State(mw): State<RateLimitMiddleware>,
    Path(key): Path<String>,
) -> Result<impl IntoResponse> {
    let policy = mw.settings().default_policy();
    let stats = mw
        .limiter()
        .stats(&RequestContext::background(), &key, policy, None)
        .await?;

    Ok(Json(json!({ "success": true, "data": stats })))
}

async fn reset_key(
    State(mw): State<RateLimitMiddleware>,
    Path(key): Path<String>,
) -> Result<StatusCode> {
    mw.limiter().reset(&RequestContext::background(), &key).await?;
    info!(key = %key, "Rate limit manually reset");
    Ok(StatusCode::NO_CONTENT)
}
