use super::context::RequestContext;
use super::memory::MemoryStore;
use super::monitor::RateLimitMonitor;
use super::store::RateLimitStore;
use super::types::{reset_time_from_now, RateLimitPolicy, RateLimitStats};
use crate::error::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Deadline applied to each background cleanup sweep
pub const CLEANUP_TIMEOUT: Duration = Duration::from_secs(5);

/// Rate limiting policy layer over a counter store
///
/// Denied requests are still counted, so a caller that keeps hammering a key
/// stays denied until the window rolls over.
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn RateLimitStore>,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("store", &"<dyn RateLimitStore>")
            .finish()
    }
}

impl RateLimiter {
    /// Create a rate limiter over the given store
    pub fn new(store: Arc<dyn RateLimitStore>) -> Self {
        Self { store }
    }

    /// Create a rate limiter backed by a fresh in-memory store
    pub fn in_memory() -> Self {
        info!("Initializing in-memory rate limiter");
        Self::new(Arc::new(MemoryStore::new()))
    }

    /// Count a request against `key` and decide whether it may proceed
    pub async fn allow(
        &self,
        ctx: &RequestContext,
        key: &str,
        limit: u64,
        window: Duration,
    ) -> Result<bool> {
        let count = self.store.increment(ctx, key, window).await?;
        let allowed = count <= limit;

        if allowed {
            debug!(key = %key, count, limit, "Rate limit check passed");
        } else {
            warn!(key = %key, count, limit, window = ?window, "Rate limit exceeded");
        }

        Ok(allowed)
    }

    /// Best-effort remaining quota for `key` under `limit`
    pub async fn remaining(&self, ctx: &RequestContext, key: &str, limit: u64) -> Result<u64> {
        let count = self.store.get(ctx, key).await?;
        Ok(limit.saturating_sub(count))
    }

    /// Clear the counter for `key`
    pub async fn reset(&self, ctx: &RequestContext, key: &str) -> Result<()> {
        self.store.reset(ctx, key).await?;
        info!(key = %key, "Rate limit reset");
        Ok(())
    }

    /// Current quota view for `key` under `policy`
    pub async fn stats(
        &self,
        ctx: &RequestContext,
        key: &str,
        policy: RateLimitPolicy,
        request_id: Option<String>,
    ) -> Result<RateLimitStats> {
        let count = self.store.get(ctx, key).await?;
        let expiry = self.store.get_expiry(ctx, key).await?;

        let now = Instant::now();
        let reset_after = match expiry {
            Some(at) if at > now => at - now,
            _ => policy.window,
        };

        Ok(RateLimitStats::new(
            key,
            count,
            policy,
            reset_time_from_now(reset_after),
            request_id,
        ))
    }

    /// Drop expired counters from the store
    pub async fn cleanup(&self, ctx: &RequestContext) -> Result<usize> {
        self.store.cleanup(ctx).await
    }

    /// Number of keys currently tracked by the store
    pub async fn active_keys(&self) -> usize {
        self.store.len().await
    }

    /// Run `cleanup` every `every` until `token` is cancelled
    pub fn spawn_cleanup(
        &self,
        every: Duration,
        token: CancellationToken,
        monitor: Arc<RateLimitMonitor>,
    ) -> JoinHandle<()> {
        let limiter = self.clone();

        tokio::spawn(async move {
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately
            ticker.tick().await;

            info!(interval = ?every, "Started rate limit cleanup task");

            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        info!("Rate limit cleanup task stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        let ctx = RequestContext::with_token(token.child_token())
                            .with_timeout(CLEANUP_TIMEOUT);

                        match limiter.cleanup(&ctx).await {
                            Ok(removed) => {
                                let active = limiter.active_keys().await;
                                debug!(removed, active, "Rate limit cleanup sweep finished");
                                monitor.record_cleanup(removed, active);
                            }
                            Err(e) if e.is_context_error() => {
                                debug!(error = %e, "Rate limit cleanup interrupted");
                            }
                            Err(e) => {
                                error!(error = %e, "Rate limit cleanup failed");
                            }
                        }
                    }
                }
            }
        })
    }
}
