//! Aggregated rate limiting telemetry
//!
//! The monitor only observes admission outcomes. Its lock is separate from
//! the counter store's lock, is never held across an await, and nothing in
//! the admission path reads it back.

use super::types::format_window;
use crate::error::RateLimitError;
use crate::metrics;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Default bound on keys held in the per-key maps
pub const DEFAULT_MAX_TRACKED_KEYS: usize = 10_000;

/// A single admission outcome reported by the middleware
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitEvent {
    pub key: String,
    pub client_ip: String,
    pub user_id: Option<String>,
    pub path: String,
    pub limit: u64,
    pub window: Duration,
    /// Count as seen by the caller; 0 when unknown
    pub count: u64,
}

/// Process-wide rate limiting counters
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct RateLimitMetrics {
    pub total_requests: u64,
    pub allowed_requests: u64,
    pub blocked_requests: u64,
    pub error_count: u64,
    pub active_keys: usize,
    pub last_cleanup: Option<DateTime<Utc>>,
    pub violations_by_key: HashMap<String, u64>,
    pub requests_by_key: HashMap<String, u64>,
}

impl RateLimitMetrics {
    /// Percentage of checked requests that were blocked
    pub fn block_rate(&self) -> f64 {
        if self.total_requests == 0 {
            return 0.0;
        }
        self.blocked_requests as f64 / self.total_requests as f64 * 100.0
    }

    /// Keys with the most violations, highest first; ties ordered by key
    pub fn top_violators(&self, n: usize) -> Vec<(String, u64)> {
        top_entries(&self.violations_by_key, n)
    }
}

fn top_entries(map: &HashMap<String, u64>, n: usize) -> Vec<(String, u64)> {
    let mut entries: Vec<(String, u64)> = map
        .iter()
        .map(|(key, count)| (key.clone(), *count))
        .collect();

    entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    entries.truncate(n);
    entries
}

/// Count `key` if it is already tracked or there is room for it
fn bump(map: &mut HashMap<String, u64>, key: &str, max_keys: usize) {
    if let Some(count) = map.get_mut(key) {
        *count += 1;
    } else if map.len() < max_keys {
        map.insert(key.to_string(), 1);
    }
}

/// Keep only the `keep` busiest keys
fn shrink(map: &mut HashMap<String, u64>, keep: usize) -> usize {
    if map.len() <= keep {
        return 0;
    }
    let before = map.len();
    *map = top_entries(map, keep).into_iter().collect();
    before - map.len()
}

/// Collects admission outcomes and logs periodic summaries
#[derive(Debug)]
pub struct RateLimitMonitor {
    metrics: Mutex<RateLimitMetrics>,
    max_tracked_keys: usize,
}

impl Default for RateLimitMonitor {
    fn default() -> Self {
        Self::with_max_tracked_keys(DEFAULT_MAX_TRACKED_KEYS)
    }
}

impl RateLimitMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Monitor whose per-key maps never hold more than `max_keys` entries
    pub fn with_max_tracked_keys(max_keys: usize) -> Self {
        Self {
            metrics: Mutex::new(RateLimitMetrics::default()),
            max_tracked_keys: max_keys.max(1),
        }
    }

    pub fn max_tracked_keys(&self) -> usize {
        self.max_tracked_keys
    }

    /// Record a request that passed the limiter
    pub fn record_allowed(&self, event: &RateLimitEvent) {
        {
            let mut m = self.metrics.lock();
            m.total_requests += 1;
            m.allowed_requests += 1;
            bump(&mut m.requests_by_key, &event.key, self.max_tracked_keys);
        }

        metrics::record_rate_limit_decision("allowed", &event.path);
    }

    /// Record a request rejected by the limiter
    pub fn record_blocked(&self, event: &RateLimitEvent) {
        {
            let mut m = self.metrics.lock();
            m.total_requests += 1;
            m.blocked_requests += 1;
            bump(&mut m.requests_by_key, &event.key, self.max_tracked_keys);
            bump(&mut m.violations_by_key, &event.key, self.max_tracked_keys);
        }

        warn!(
            key = %event.key,
            client_ip = %event.client_ip,
            user_id = event.user_id.as_deref().unwrap_or("-"),
            path = %event.path,
            limit = event.limit,
            window = %format_window(event.window),
            count = event.count,
            "Rate limit violation"
        );
        metrics::record_rate_limit_decision("blocked", &event.path);
        metrics::record_rate_limit_exceeded(&event.path);
    }

    /// Record a limiter failure that was let through
    pub fn record_error(&self, event: &RateLimitEvent, err: &RateLimitError) {
        {
            let mut m = self.metrics.lock();
            m.total_requests += 1;
            m.error_count += 1;
        }

        error!(
            key = %event.key,
            client_ip = %event.client_ip,
            path = %event.path,
            error = %err,
            "Rate limiter error, allowing request"
        );
        metrics::record_rate_limit_decision("error", &event.path);
    }

    /// Record the outcome of a cleanup sweep
    ///
    /// Once a per-key map is more than half full it is cut back to its busiest
    /// half, leaving room for keys first seen after the sweep.
    pub fn record_cleanup(&self, removed: usize, active_keys: usize) {
        let keep = self.max_tracked_keys / 2;
        let pruned = {
            let mut m = self.metrics.lock();
            m.active_keys = active_keys;
            m.last_cleanup = Some(Utc::now());
            shrink(&mut m.requests_by_key, keep) + shrink(&mut m.violations_by_key, keep)
        };

        if pruned > 0 {
            debug!(pruned, "Pruned per-key rate limit telemetry");
        }
        metrics::record_cleanup(removed, active_keys);
    }

    /// Deep copy of the current counters
    pub fn snapshot(&self) -> RateLimitMetrics {
        self.metrics.lock().clone()
    }

    /// Clear all counters
    pub fn reset(&self) {
        *self.metrics.lock() = RateLimitMetrics::default();
    }

    /// Log a summary every `every` until `token` is cancelled
    pub fn spawn_reporter(
        self: &Arc<Self>,
        every: Duration,
        top_n: usize,
        token: CancellationToken,
    ) -> JoinHandle<()> {
        let monitor = self.clone();

        tokio::spawn(async move {
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        info!("Rate limit reporter stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        let snapshot = monitor.snapshot();
                        let top = snapshot.top_violators(top_n);

                        info!(
                            total = snapshot.total_requests,
                            allowed = snapshot.allowed_requests,
                            blocked = snapshot.blocked_requests,
                            errors = snapshot.error_count,
                            active_keys = snapshot.active_keys,
                            block_rate = %format!("{:.2}%", snapshot.block_rate()),
                            top_violators = ?top,
                            "Rate limit summary"
                        );
                    }
                }
            }
        })
    }
}
