use super::context::RequestContext;
use super::limiter::RateLimiter;
use super::monitor::{RateLimitEvent, RateLimitMonitor};
use super::tasks::BackgroundTasks;
use super::types::{format_window, RateLimitPolicy, RateLimitStats};
use crate::config::RateLimitSettings;
use crate::observability::{RequestId, REQUEST_ID_HEADER};
use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode},
    middleware::{from_fn_with_state, Next},
    response::{IntoResponse, Response},
    Json, Router,
};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub const HEADER_LIMIT: &str = "x-ratelimit-limit";
pub const HEADER_REMAINING: &str = "x-ratelimit-remaining";
pub const HEADER_RESET: &str = "x-ratelimit-reset";
pub const HEADER_WINDOW: &str = "x-ratelimit-window";
pub const HEADER_RETRY_AFTER: &str = "retry-after";

/// Error code in the body of a rejected request
pub const RATE_LIMIT_EXCEEDED: &str = "RATE_LIMIT_EXCEEDED";

/// Caller identity resolved by the upstream auth layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser(pub String);

/// Who is making a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerIdentity {
    pub client_ip: String,
    pub user_id: Option<String>,
    pub request_id: Option<String>,
}

/// Rate limiting middleware state
#[derive(Clone)]
pub struct RateLimitMiddleware {
    limiter: RateLimiter,
    monitor: Arc<RateLimitMonitor>,
    settings: Arc<RateLimitSettings>,
    /// Deadline for each admission check
    request_timeout: Duration,
    /// Parent of every per-request context; cancelled on shutdown
    shutdown: CancellationToken,
}

impl RateLimitMiddleware {
    /// Create a new rate limiting middleware
    pub fn new(
        limiter: RateLimiter,
        monitor: Arc<RateLimitMonitor>,
        settings: RateLimitSettings,
        request_timeout: Duration,
    ) -> Self {
        Self {
            limiter,
            monitor,
            settings: Arc::new(settings),
            request_timeout,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn monitor(&self) -> &Arc<RateLimitMonitor> {
        &self.monitor
    }

    pub fn settings(&self) -> &RateLimitSettings {
        &self.settings
    }

    /// Token cancelled when the server shuts down
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Wrap `router` so every request passes through the limiter
    pub fn apply<S>(self, router: Router<S>) -> Router<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        router.layer(from_fn_with_state(self, rate_limit_middleware))
    }

    /// Start the cleanup and reporting tasks
    pub fn spawn_background_tasks(&self) -> BackgroundTasks {
        let token = self.shutdown.child_token();
        let mut handles = vec![self.limiter.spawn_cleanup(
            self.settings.cleanup_interval(),
            token.clone(),
            self.monitor.clone(),
        )];

        let monitor_config = &self.settings.monitor;
        if monitor_config.enabled {
            handles.push(self.monitor.spawn_reporter(
                Duration::from_secs(monitor_config.report_interval_secs),
                monitor_config.top_n,
                token.clone(),
            ));
        }

        BackgroundTasks::new(token, handles)
    }

    /// Resolve client IP, user and request ID
    pub fn identify(&self, request: &Request) -> CallerIdentity {
        let client_ip = client_ip(request, self.settings.trust_forwarded_headers);

        let user_id = request
            .extensions()
            .get::<AuthenticatedUser>()
            .map(|user| user.0.clone())
            .filter(|id| !id.is_empty());

        let request_id = request
            .extensions()
            .get::<RequestId>()
            .map(|id| id.0.clone())
            .or_else(|| header_str(request.headers(), REQUEST_ID_HEADER).map(str::to_string));

        CallerIdentity {
            client_ip,
            user_id,
            request_id,
        }
    }

    /// Key and policy for a caller
    pub fn resolve(&self, caller: &CallerIdentity) -> (String, RateLimitPolicy) {
        let key = self
            .settings
            .key_strategy
            .key_for(&caller.client_ip, caller.user_id.as_deref());
        let policy = self.settings.policy_for(caller.user_id.is_some());
        (key, policy)
    }

    fn context(&self) -> RequestContext {
        RequestContext::with_token(self.shutdown.child_token()).with_timeout(self.request_timeout)
    }
}

/// Axum middleware function for rate limiting
pub async fn rate_limit_middleware(
    State(mw): State<RateLimitMiddleware>,
    request: Request,
    next: Next,
) -> Response {
    if !mw.settings.enabled {
        return next.run(request).await;
    }

    let path = request.uri().path().to_string();
    if mw.settings.is_skipped(&path) {
        debug!(path = %path, "Path exempt from rate limiting");
        return next.run(request).await;
    }

    let caller = mw.identify(&request);
    let (key, policy) = mw.resolve(&caller);
    let ctx = mw.context();

    let mut event = RateLimitEvent {
        key: key.clone(),
        client_ip: caller.client_ip.clone(),
        user_id: caller.user_id.clone(),
        path,
        limit: policy.limit,
        window: policy.window,
        count: 0,
    };

    // Fail open: a broken limiter must not take the API down with it
    let decision = match mw.limiter.allow(&ctx, &key, policy.limit, policy.window).await {
        Ok(allowed) => Some(allowed),
        Err(e) => {
            warn!(key = %key, error = %e, "Rate limit check failed, allowing request");
            mw.monitor.record_error(&event, &e);
            None
        }
    };

    let denied = decision == Some(false);
    let stats = if mw.settings.include_headers || denied {
        let stats = match mw
            .limiter
            .stats(&ctx, &key, policy, caller.request_id.clone())
            .await
        {
            Ok(stats) => stats,
            Err(e) => {
                debug!(key = %key, error = %e, "Rate limit stats unavailable, using defaults");
                RateLimitStats::fresh(key.clone(), policy, caller.request_id.clone())
            }
        };
        event.count = stats.count;
        Some(stats)
    } else {
        None
    };

    match (decision, stats) {
        (Some(false), Some(stats)) => {
            mw.monitor.record_blocked(&event);
            create_rate_limit_response(&stats, policy, mw.settings.include_headers)
        }
        (decision, stats) => {
            if decision == Some(true) {
                mw.monitor.record_allowed(&event);
            }

            let mut response = next.run(request).await;
            if let Some(stats) = stats.filter(|_| mw.settings.include_headers) {
                add_rate_limit_headers(response.headers_mut(), &stats);
            }
            response
        }
    }
}

/// Create a 429 Too Many Requests response
pub fn create_rate_limit_response(
    stats: &RateLimitStats,
    policy: RateLimitPolicy,
    include_headers: bool,
) -> Response {
    let window = format_window(policy.window);
    let retry_after = policy.window_secs_ceil();

    let body = json!({
        "success": false,
        "error": {
            "code": RATE_LIMIT_EXCEEDED,
            "message": format!(
                "Rate limit exceeded: {} requests per {}. Try again later.",
                policy.limit, window
            ),
            "request_id": stats.request_id.clone().unwrap_or_default(),
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "details": {
                "limit": policy.limit.to_string(),
                "window": window,
                "reset_at": stats.reset_time.to_rfc3339(),
            },
        },
    });

    let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
    let headers = response.headers_mut();

    if include_headers {
        add_rate_limit_headers(headers, stats);
    }
    headers.insert(
        HeaderName::from_static(HEADER_RETRY_AFTER),
        HeaderValue::from(retry_after),
    );

    response
}

/// Add `X-RateLimit-*` headers describing `stats`
pub fn add_rate_limit_headers(headers: &mut HeaderMap, stats: &RateLimitStats) {
    headers.insert(
        HeaderName::from_static(HEADER_LIMIT),
        HeaderValue::from(stats.limit),
    );
    headers.insert(
        HeaderName::from_static(HEADER_REMAINING),
        HeaderValue::from(stats.remaining),
    );
    headers.insert(
        HeaderName::from_static(HEADER_RESET),
        HeaderValue::from(stats.reset_unix()),
    );
    if let Ok(window) = HeaderValue::from_str(&format_window(stats.window)) {
        headers.insert(HeaderName::from_static(HEADER_WINDOW), window);
    }
    if let Some(request_id) = stats
        .request_id
        .as_deref()
        .and_then(|id| HeaderValue::from_str(id).ok())
    {
        headers.insert(HeaderName::from_static(REQUEST_ID_HEADER), request_id);
    }
}

/// Client IP from forwarding headers (when trusted) or the socket address
fn client_ip(request: &Request, trust_forwarded: bool) -> String {
    if trust_forwarded {
        let headers = request.headers();

        let forwarded = header_str(headers, "x-forwarded-for")
            .and_then(|value| value.split(',').next())
            .map(str::trim)
            .filter(|ip| !ip.is_empty());
        if let Some(ip) = forwarded {
            return ip.to_string();
        }

        if let Some(ip) = header_str(headers, "x-real-ip")
            .map(str::trim)
            .filter(|ip| !ip.is_empty())
        {
            return ip.to_string();
        }
    }

    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}
