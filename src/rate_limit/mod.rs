//! Rate limiting module
//!
//! Per-key request admission control over an approximate sliding window:
//! each key gets a counter that fully resets once its window has elapsed.
//!
//! # Layers
//!
//! - [`RateLimitStore`]: counter storage, in memory by default ([`MemoryStore`])
//! - [`RateLimiter`]: allow/deny policy, quota stats, cleanup
//! - [`RateLimitMiddleware`]: axum integration, key/policy resolution, headers
//!   and 429 responses
//! - [`RateLimitMonitor`]: aggregated telemetry and periodic summaries
//!
//! # Example
//!
//! ```rust,no_run
//! use blog_ratelimit::config::RateLimitSettings;
//! use blog_ratelimit::rate_limit::{RateLimitMiddleware, RateLimitMonitor, RateLimiter};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     let middleware = RateLimitMiddleware::new(
//!         RateLimiter::in_memory(),
//!         Arc::new(RateLimitMonitor::new()),
//!         RateLimitSettings::default(),
//!         Duration::from_secs(30),
//!     );
//!
//!     let tasks = middleware.spawn_background_tasks();
//!     let app = middleware.apply(axum::Router::<()>::new());
//!     # let _ = app;
//!
//!     tasks.shutdown().await;
//! }
//! ```

pub mod context;
pub mod limiter;
pub mod memory;
pub mod middleware;
pub mod monitor;
pub mod store;
pub mod tasks;
pub mod types;

// Re-export commonly used types
pub use context::RequestContext;
pub use limiter::RateLimiter;
pub use memory::MemoryStore;
pub use middleware::{
    add_rate_limit_headers, create_rate_limit_response, rate_limit_middleware,
    AuthenticatedUser, CallerIdentity, RateLimitMiddleware,
};
pub use monitor::{RateLimitEvent, RateLimitMetrics, RateLimitMonitor};
pub use store::{CounterEntry, RateLimitStore};
pub use tasks::BackgroundTasks;
pub use types::{KeyStrategy, LimitConfig, RateLimitPolicy, RateLimitStats};
