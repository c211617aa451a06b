use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How a rate limit key is derived from the caller's identity
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum KeyStrategy {
    /// Rate limit by client IP address
    #[default]
    Ip,
    /// Rate limit by authenticated user, falling back to IP for anonymous callers
    User,
    /// Rate limit by IP and user combined
    IpUser,
}

impl KeyStrategy {
    /// Build the key for a caller
    pub fn key_for(&self, client_ip: &str, user_id: Option<&str>) -> String {
        match (self, user_id) {
            (KeyStrategy::User, Some(user)) => format!("user:{}", user),
            (KeyStrategy::IpUser, Some(user)) => format!("ip:{}:user:{}", client_ip, user),
            _ => format!("ip:{}", client_ip),
        }
    }
}

/// A limit and the window it applies to
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct LimitConfig {
    /// Maximum number of requests allowed per window
    pub limit: u64,
    /// Window length in seconds
    pub window_secs: u64,
}

impl LimitConfig {
    pub fn new(limit: u64, window_secs: u64) -> Self {
        Self { limit, window_secs }
    }

    /// Get the window as a Duration
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    pub fn policy(&self) -> RateLimitPolicy {
        RateLimitPolicy::new(self.limit, self.window())
    }
}

/// Limit and window applied to a single request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    pub limit: u64,
    pub window: Duration,
}

impl RateLimitPolicy {
    pub fn new(limit: u64, window: Duration) -> Self {
        Self { limit, window }
    }

    /// Window length in whole seconds, rounded up (used for `Retry-After`)
    pub fn window_secs_ceil(&self) -> u64 {
        let secs = self.window.as_secs();
        if self.window.subsec_nanos() > 0 {
            secs + 1
        } else {
            secs
        }
    }
}

/// Point-in-time view of a key's quota
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RateLimitStats {
    pub key: String,
    pub count: u64,
    pub limit: u64,
    pub remaining: u64,
    /// When the current window closes
    pub reset_time: DateTime<Utc>,
    /// Window length, formatted like `10s` or `1m0s`
    #[serde(serialize_with = "serialize_window")]
    pub window: Duration,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl RateLimitStats {
    /// Build stats for `count` requests against `policy`
    pub fn new(
        key: impl Into<String>,
        count: u64,
        policy: RateLimitPolicy,
        reset_time: DateTime<Utc>,
        request_id: Option<String>,
    ) -> Self {
        Self {
            key: key.into(),
            count,
            limit: policy.limit,
            remaining: policy.limit.saturating_sub(count),
            reset_time,
            window: policy.window,
            request_id,
        }
    }

    /// Stats for a key with no recorded usage; the window starts now
    pub fn fresh(key: impl Into<String>, policy: RateLimitPolicy, request_id: Option<String>) -> Self {
        Self::new(key, 0, policy, reset_time_from_now(policy.window), request_id)
    }

    /// Reset time as unix seconds (for `X-RateLimit-Reset`)
    pub fn reset_unix(&self) -> i64 {
        self.reset_time.timestamp()
    }
}

/// Wall-clock time `after` from now
pub fn reset_time_from_now(after: Duration) -> DateTime<Utc> {
    let after = chrono::Duration::from_std(after).unwrap_or_else(|_| chrono::Duration::zero());
    Utc::now() + after
}

/// Format a window as hours, minutes and seconds (`10s`, `1m0s`, `1h30m0s`)
pub fn format_window(window: Duration) -> String {
    let total = window.as_secs();
    let millis = window.subsec_millis();

    if total == 0 {
        return if millis > 0 {
            format!("{}ms", millis)
        } else {
            "0s".to_string()
        };
    }

    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;

    if hours > 0 {
        format!("{}h{}m{}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m{}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

fn serialize_window<S>(window: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_str(&format_window(*window))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_strategies() {
        assert_eq!(KeyStrategy::Ip.key_for("1.2.3.4", Some("42")), "ip:1.2.3.4");
        assert_eq!(KeyStrategy::User.key_for("1.2.3.4", Some("42")), "user:42");
        assert_eq!(KeyStrategy::User.key_for("1.2.3.4", None), "ip:1.2.3.4");
        assert_eq!(
            KeyStrategy::IpUser.key_for("1.2.3.4", Some("42")),
            "ip:1.2.3.4:user:42"
        );
        assert_eq!(KeyStrategy::IpUser.key_for("1.2.3.4", None), "ip:1.2.3.4");
    }

    #[test]
    fn test_key_strategy_deserialize() {
        let strategy: KeyStrategy = serde_yaml::from_str("ip_user").unwrap();
        assert_eq!(strategy, KeyStrategy::IpUser);
        let strategy: KeyStrategy = serde_yaml::from_str("user").unwrap();
        assert_eq!(strategy, KeyStrategy::User);
    }

    #[test]
    fn test_limit_config_policy() {
        let config = LimitConfig::new(100, 60);
        assert_eq!(config.window(), Duration::from_secs(60));
        assert_eq!(config.policy(), RateLimitPolicy::new(100, Duration::from_secs(60)));
    }

    #[test]
    fn test_stats_remaining_never_negative() {
        let policy = RateLimitPolicy::new(3, Duration::from_secs(1));

        let stats = RateLimitStats::new("k", 2, policy, Utc::now(), None);
        assert_eq!(stats.remaining, 1);

        let stats = RateLimitStats::new("k", 7, policy, Utc::now(), None);
        assert_eq!(stats.remaining, 0);

        let stats = RateLimitStats::fresh("k", policy, Some("req-1".to_string()));
        assert_eq!(stats.count, 0);
        assert_eq!(stats.remaining, 3);
        assert_eq!(stats.request_id.as_deref(), Some("req-1"));
    }

    #[test]
    fn test_format_window() {
        assert_eq!(format_window(Duration::from_secs(10)), "10s");
        assert_eq!(format_window(Duration::from_secs(60)), "1m0s");
        assert_eq!(format_window(Duration::from_secs(90)), "1m30s");
        assert_eq!(format_window(Duration::from_secs(3600)), "1h0m0s");
        assert_eq!(format_window(Duration::from_millis(500)), "500ms");
        assert_eq!(format_window(Duration::ZERO), "0s");
    }

    #[test]
    fn test_window_secs_ceil() {
        assert_eq!(RateLimitPolicy::new(1, Duration::from_secs(10)).window_secs_ceil(), 10);
        assert_eq!(RateLimitPolicy::new(1, Duration::from_millis(1500)).window_secs_ceil(), 2);
    }

    #[test]
    fn test_stats_serialize() {
        let policy = RateLimitPolicy::new(10, Duration::from_secs(10));
        let stats = RateLimitStats::new("ip:1.2.3.4", 4, policy, Utc::now(), None);
        let json = serde_json::to_value(&stats).unwrap();

        assert_eq!(json["key"], "ip:1.2.3.4");
        assert_eq!(json["remaining"], 6);
        assert_eq!(json["window"], "10s");
        assert!(json.get("request_id").is_none());
    }
}
