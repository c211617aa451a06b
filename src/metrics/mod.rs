use crate::error::{RateLimitError, Result};
use axum::{
    body::Body,
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
};
use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::Arc;
use tracing::{debug, info};

/// Metrics service for collecting and exposing Prometheus metrics
#[derive(Clone)]
pub struct MetricsService {
    handle: Arc<PrometheusHandle>,
}

impl MetricsService {
    /// Install the Prometheus recorder and register metric descriptions
    pub fn new() -> Result<Self> {
        let handle = PrometheusBuilder::new().install_recorder().map_err(|e| {
            RateLimitError::Internal(format!("Failed to install metrics recorder: {}", e))
        })?;

        Self::register_metrics();

        info!("Metrics service initialized successfully");

        Ok(Self {
            handle: Arc::new(handle),
        })
    }

    fn register_metrics() {
        describe_counter!(
            "ratelimit_requests_total",
            "Requests checked by the rate limiter, labelled by outcome"
        );
        describe_counter!(
            "ratelimit_exceeded_total",
            "Requests rejected because their key exceeded its limit"
        );
        describe_counter!(
            "ratelimit_cleanup_removed_total",
            "Expired rate limit entries removed by cleanup"
        );
        describe_gauge!(
            "ratelimit_active_keys",
            "Rate limit keys tracked after the last cleanup"
        );

        debug!("All metrics registered with descriptions");
    }

    /// Render metrics in Prometheus format
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

/// Metrics endpoint handler
pub async fn metrics_handler(State(service): State<MetricsService>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        Body::from(service.render()),
    )
        .into_response()
}

/// Record a limiter decision: `allowed`, `blocked` or `error`
pub fn record_rate_limit_decision(outcome: &str, path: &str) {
    let labels = [
        ("outcome", outcome.to_string()),
        ("path", sanitize_path(path)),
    ];
    counter!("ratelimit_requests_total", &labels).increment(1);
}

/// Record a rejected request
pub fn record_rate_limit_exceeded(path: &str) {
    let labels = [("path", sanitize_path(path))];
    counter!("ratelimit_exceeded_total", &labels).increment(1);
}

/// Record the result of a cleanup sweep
pub fn record_cleanup(removed: usize, active_keys: usize) {
    counter!("ratelimit_cleanup_removed_total").increment(removed as u64);
    gauge!("ratelimit_active_keys").set(active_keys as f64);
}

/// Sanitize path for metrics to avoid cardinality explosion
///
/// Numeric IDs, UUIDs, hashes and slugs (see [`is_likely_slug`]) collapse
/// into `:id`.
fn sanitize_path(path: &str) -> String {
    path.split('/')
        .map(|seg| {
            if is_likely_id(seg) || is_likely_slug(seg) {
                ":id"
            } else {
                seg
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Check if a path segment is likely an ID (numeric, UUID, etc.)
fn is_likely_id(segment: &str) -> bool {
    if segment.is_empty() {
        return false;
    }

    if segment.chars().all(|c| c.is_ascii_digit()) {
        return true;
    }

    // UUIDs
    if segment.len() >= 32 && segment.contains('-') {
        return segment.chars().all(|c| c.is_ascii_hexdigit() || c == '-');
    }

    // Mixed alphanumeric tokens such as hashes
    if segment.len() > 10 && segment.chars().all(|c| c.is_alphanumeric()) {
        let has_numbers = segment.chars().any(|c| c.is_numeric());
        let has_letters = segment.chars().any(|c| c.is_alphabetic());
        return has_numbers && has_letters;
    }

    false
}

/// Lowercase hyphenated segment of three or more words, or with a digit
///
/// Two-word route names such as `rate-limit` are kept.
fn is_likely_slug(segment: &str) -> bool {
    if !segment
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return false;
    }

    let words: Vec<&str> = segment.split('-').collect();
    if words.len() < 2 || words.iter().any(|w| w.is_empty()) {
        return false;
    }

    words.len() >= 3 || segment.chars().any(|c| c.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_path() {
        assert_eq!(sanitize_path("/api/articles/123"), "/api/articles/:id");
        assert_eq!(
            sanitize_path("/api/articles/550e8400-e29b-41d4-a716-446655440000/comments"),
            "/api/articles/:id/comments"
        );
        assert_eq!(sanitize_path("/api/tags"), "/api/tags");
        assert_eq!(sanitize_path("/"), "/");
        assert_eq!(
            sanitize_path("/api/articles/my-first-post/comments"),
            "/api/articles/:id/comments"
        );
        assert_eq!(sanitize_path("/api/articles/rust-2024"), "/api/articles/:id");
        assert_eq!(sanitize_path("/api/rate-limit"), "/api/rate-limit");
    }

    #[test]
    fn test_is_likely_slug() {
        assert!(is_likely_slug("my-first-post"));
        assert!(is_likely_slug("release-v2"));
        assert!(!is_likely_slug("user-profiles"));
        assert!(!is_likely_slug("articles"));
        assert!(!is_likely_slug("My-First-Post"));
        assert!(!is_likely_slug("-leading-dash"));
        assert!(!is_likely_slug("a--b"));
    }

    #[test]
    fn test_is_likely_id() {
        assert!(is_likely_id("42"));
        assert!(is_likely_id("abc123def456ghi789"));
        assert!(!is_likely_id("bookmarks"));
        assert!(!is_likely_id(""));
    }

    #[test]
    fn test_record_functions_dont_panic() {
        // No recorder installed: the facade drops everything
        record_rate_limit_decision("allowed", "/api/articles/7");
        record_rate_limit_exceeded("/api/articles/7");
        record_cleanup(3, 10);
    }
}
