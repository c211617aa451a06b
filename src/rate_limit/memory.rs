use super::context::RequestContext;
use super::store::{CounterEntry, RateLimitStore};
use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info};

/// In-memory counter store guarded by a single reader/writer lock
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    /// Counters keyed by rate limit key
    entries: Arc<RwLock<HashMap<String, CounterEntry>>>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the raw entry for `key` (for tests and diagnostics)
    pub async fn entry(&self, key: &str) -> Option<CounterEntry> {
        self.entries.read().await.get(key).cloned()
    }

    /// Remove all entries
    #[cfg(test)]
    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }
}

#[async_trait]
impl RateLimitStore for MemoryStore {
    async fn increment(&self, ctx: &RequestContext, key: &str, window: Duration) -> Result<u64> {
        ctx.check()?;

        let mut entries = self.entries.write().await;
        let now = Instant::now();

        let count = match entries.get_mut(key) {
            Some(entry) if entry.is_expired(now) => {
                debug!(key = %key, "Window expired, starting a new one");
                *entry = CounterEntry::new(window, now);
                entry.count
            }
            Some(entry) => {
                entry.count += 1;
                entry.count
            }
            None => {
                debug!(key = %key, "Tracking new rate limit key");
                entries.insert(key.to_string(), CounterEntry::new(window, now));
                1
            }
        };

        Ok(count)
    }

    async fn get(&self, ctx: &RequestContext, key: &str) -> Result<u64> {
        ctx.check()?;

        let entries = self.entries.read().await;
        let now = Instant::now();

        Ok(entries
            .get(key)
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.count)
            .unwrap_or(0))
    }

    async fn reset(&self, ctx: &RequestContext, key: &str) -> Result<()> {
        ctx.check()?;

        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.get_mut(key) {
            entry.count = 0;
            entry.window_start = Instant::now();
            debug!(key = %key, "Rate limit counter reset");
        }

        Ok(())
    }

    async fn get_expiry(&self, ctx: &RequestContext, key: &str) -> Result<Option<Instant>> {
        ctx.check()?;

        let entries = self.entries.read().await;
        Ok(entries.get(key).map(CounterEntry::expires_at))
    }

    async fn set_expiry(&self, ctx: &RequestContext, key: &str, at: Instant) -> Result<()> {
        ctx.check()?;

        let mut entries = self.entries.write().await;
        let Some(entry) = entries.get_mut(key) else {
            return Ok(());
        };

        match at.checked_sub(entry.window) {
            Some(start) => {
                entry.window_start = start;
                debug!(key = %key, "Rate limit expiry overridden");
            }
            None => {
                // A window that closes before the clock's origin has already run out
                entries.remove(key);
                debug!(key = %key, "Expiry precedes clock origin, entry dropped");
            }
        }

        Ok(())
    }

    async fn cleanup(&self, ctx: &RequestContext) -> Result<usize> {
        ctx.check()?;

        let mut entries = self.entries.write().await;
        let now = Instant::now();
        let before = entries.len();

        entries.retain(|_, entry| !entry.is_expired(now));

        let removed = before - entries.len();
        if removed > 0 {
            info!(
                removed,
                remaining = entries.len(),
                "Cleaned up expired rate limit entries"
            );
        }

        Ok(removed)
    }

    async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}
