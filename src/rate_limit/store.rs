use super::context::RequestContext;
use crate::error::Result;
use async_trait::async_trait;
use std::time::Duration;
use tokio::time::Instant;

/// Counter state tracked for a single rate limit key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterEntry {
    /// Admitted increments in the current window
    pub count: u64,
    /// When the current window began
    pub window_start: Instant,
    /// Window length, captured when the window was opened
    pub window: Duration,
}

impl CounterEntry {
    /// Open a fresh window with a count of one
    pub fn new(window: Duration, now: Instant) -> Self {
        Self {
            count: 1,
            window_start: now,
            window,
        }
    }

    /// Whether the window has run out at `now`
    pub fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.window_start) >= self.window
    }

    /// Instant at which the current window closes
    pub fn expires_at(&self) -> Instant {
        self.window_start + self.window
    }
}

/// Storage backend for rate limit counters
///
/// Implementations must make `increment` a single atomic read-modify-write
/// per key. Every method checks the supplied context before doing any work
/// and returns its cancellation or timeout error unchanged.
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    /// Count one request against `key`, opening a new window if needed.
    /// Returns the count after the increment.
    async fn increment(&self, ctx: &RequestContext, key: &str, window: Duration) -> Result<u64>;

    /// Current count, or 0 when the key is unknown or its window has expired
    async fn get(&self, ctx: &RequestContext, key: &str) -> Result<u64>;

    /// Zero the count and restart the window now
    async fn reset(&self, ctx: &RequestContext, key: &str) -> Result<()>;

    /// When the current window for `key` closes
    async fn get_expiry(&self, ctx: &RequestContext, key: &str) -> Result<Option<Instant>>;

    /// Move the window so that it closes at `at`
    async fn set_expiry(&self, ctx: &RequestContext, key: &str, at: Instant) -> Result<()>;

    /// Drop every expired entry, returning how many were removed
    async fn cleanup(&self, ctx: &RequestContext) -> Result<usize>;

    /// Number of keys currently tracked
    async fn len(&self) -> usize;

    async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
