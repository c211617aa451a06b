use crate::error::{RateLimitError, Result};
use crate::rate_limit::types::{KeyStrategy, LimitConfig, RateLimitPolicy};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Prefix for environment overrides, e.g. `BLOG__RATE_LIMIT__ENABLED=false`
pub const ENV_PREFIX: &str = "BLOG";

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limit: RateLimitSettings,
    /// Admin listener configuration
    #[serde(default)]
    pub admin: AdminConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,
    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,
    /// Request timeout in seconds, also the deadline for rate limit checks
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

/// Admin API listener, bound separately from the public API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminConfig {
    /// Serve the admin routes at all
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_admin_host")]
    pub host: String,
    #[serde(default = "default_admin_port")]
    pub port: u16,
}

/// Logging configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Emit JSON log lines instead of compact text
    #[serde(default)]
    pub json: bool,
}

/// Rate limiting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitSettings {
    /// Enable rate limiting
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Limit used when no caller-class limit is configured
    #[serde(default = "default_limit")]
    pub default: LimitConfig,
    /// Limit for callers with a resolved user ID
    #[serde(default)]
    pub authenticated: Option<LimitConfig>,
    /// Limit for anonymous callers
    #[serde(default)]
    pub anonymous: Option<LimitConfig>,
    /// Seconds between cleanup sweeps of expired counters
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_secs: u64,
    /// Paths (and everything below them) that bypass the limiter
    #[serde(default = "default_skip_paths")]
    pub skip_paths: Vec<String>,
    /// How rate limit keys are derived
    #[serde(default)]
    pub key_strategy: KeyStrategy,
    /// Attach `X-RateLimit-*` headers to responses
    #[serde(default = "default_true")]
    pub include_headers: bool,
    /// Take the client IP from `X-Forwarded-For` / `X-Real-IP`; only safe
    /// behind a proxy that overwrites them
    #[serde(default)]
    pub trust_forwarded_headers: bool,
    /// Summary logging of limiter telemetry
    #[serde(default)]
    pub monitor: MonitorConfig,
}

/// Periodic summary logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Seconds between summaries
    #[serde(default = "default_report_interval")]
    pub report_interval_secs: u64,
    /// How many top violators each summary lists
    #[serde(default = "default_top_n")]
    pub top_n: usize,
    /// Upper bound on keys tracked in the per-key request and violation maps
    #[serde(default = "default_max_tracked_keys")]
    pub max_tracked_keys: usize,
}

fn default_true() -> bool {
    true
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_timeout() -> u64 {
    30
}

fn default_limit() -> LimitConfig {
    LimitConfig::new(100, 60)
}

fn default_cleanup_interval() -> u64 {
    300 // 5 minutes
}

fn default_skip_paths() -> Vec<String> {
    vec!["/health".to_string(), "/metrics".to_string()]
}

fn default_report_interval() -> u64 {
    60
}

fn default_top_n() -> usize {
    10
}

fn default_max_tracked_keys() -> usize {
    10_000
}

fn default_admin_host() -> String {
    "127.0.0.1".to_string()
}

fn default_admin_port() -> u16 {
    9091
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            timeout_secs: default_timeout(),
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            report_interval_secs: default_report_interval(),
            top_n: default_top_n(),
            max_tracked_keys: default_max_tracked_keys(),
        }
    }
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: default_admin_host(),
            port: default_admin_port(),
        }
    }
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            default: default_limit(),
            authenticated: None,
            anonymous: None,
            cleanup_interval_secs: default_cleanup_interval(),
            skip_paths: default_skip_paths(),
            key_strategy: KeyStrategy::default(),
            include_headers: true,
            trust_forwarded_headers: false,
            monitor: MonitorConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl RateLimitSettings {
    /// Policy for a caller, depending on whether a user ID was resolved
    pub fn policy_for(&self, authenticated: bool) -> RateLimitPolicy {
        let class = if authenticated {
            self.authenticated
        } else {
            self.anonymous
        };
        class.unwrap_or(self.default).policy()
    }

    pub fn default_policy(&self) -> RateLimitPolicy {
        self.default.policy()
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    /// Whether `path` equals a skip entry or lies below one
    pub fn is_skipped(&self, path: &str) -> bool {
        self.skip_paths.iter().any(|skip| {
            let skip = skip.trim_end_matches('/');
            if skip.is_empty() {
                return path == "/";
            }
            path == skip
                || path
                    .strip_prefix(skip)
                    .is_some_and(|rest| rest.starts_with('/'))
        })
    }
}

impl AppConfig {
    /// Load configuration from an optional YAML file, then apply
    /// `BLOG__*` environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(
                config::File::from(path)
                    .format(config::FileFormat::Yaml)
                    .required(true),
            );
        }

        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("rate_limit.skip_paths")
                .try_parsing(true),
        );

        let config: Self = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| RateLimitError::Config(format!("Failed to load config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| RateLimitError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        let rl = &self.rate_limit;

        let limits = [
            ("default", Some(rl.default)),
            ("authenticated", rl.authenticated),
            ("anonymous", rl.anonymous),
        ];
        for (name, limit) in limits {
            let Some(limit) = limit else { continue };
            if limit.limit == 0 {
                return Err(RateLimitError::Config(format!(
                    "Rate limit '{}' must allow at least one request",
                    name
                )));
            }
            if limit.window_secs == 0 {
                return Err(RateLimitError::Config(format!(
                    "Rate limit '{}' window must be > 0",
                    name
                )));
            }
        }

        if rl.cleanup_interval_secs == 0 {
            return Err(RateLimitError::Config(
                "Cleanup interval must be > 0".to_string(),
            ));
        }

        if rl.monitor.enabled && rl.monitor.report_interval_secs == 0 {
            return Err(RateLimitError::Config(
                "Monitor report interval must be > 0".to_string(),
            ));
        }

        if rl.monitor.max_tracked_keys == 0 {
            return Err(RateLimitError::Config(
                "Monitor max_tracked_keys must be > 0".to_string(),
            ));
        }

        if self.admin.enabled
            && self.admin.host == self.server.host
            && self.admin.port == self.server.port
        {
            return Err(RateLimitError::Config(
                "Admin listener must not share the API address".to_string(),
            ));
        }

        if self.server.timeout_secs == 0 {
            return Err(RateLimitError::Config(
                "Server timeout must be > 0".to_string(),
            ));
        }

        for path in &rl.skip_paths {
            if !path.starts_with('/') {
                return Err(RateLimitError::Config(format!(
                    "Skip path '{}' must start with '/'",
                    path
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_values() {
        let config = AppConfig::from_yaml("{}").unwrap();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.timeout_secs, 30);

        let rl = &config.rate_limit;
        assert!(rl.enabled);
        assert!(rl.include_headers);
        assert_eq!(rl.default, LimitConfig::new(100, 60));
        assert_eq!(rl.cleanup_interval(), Duration::from_secs(300));
        assert_eq!(rl.key_strategy, KeyStrategy::Ip);
        assert_eq!(rl.skip_paths, vec!["/health", "/metrics"]);
        assert!(!rl.trust_forwarded_headers);
        assert_eq!(rl.monitor.max_tracked_keys, 10_000);
        assert!(!config.admin.enabled);
        assert_eq!(config.admin.host, "127.0.0.1");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_rate_limit_config() {
        let yaml = r#"
server:
  host: "127.0.0.1"
  port: 9000

rate_limit:
  enabled: true
  default:
    limit: 100
    window_secs: 60
  authenticated:
    limit: 1000
    window_secs: 60
  anonymous:
    limit: 20
    window_secs: 10
  cleanup_interval_secs: 30
  skip_paths: ["/health"]
  key_strategy: ip_user
  include_headers: false
  trust_forwarded_headers: true
  monitor:
    max_tracked_keys: 500

admin:
  enabled: true
  port: 9200
"#;

        let config = AppConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.server.port, 9000);

        let rl = &config.rate_limit;
        assert_eq!(rl.key_strategy, KeyStrategy::IpUser);
        assert!(!rl.include_headers);
        assert!(rl.trust_forwarded_headers);
        assert_eq!(rl.monitor.max_tracked_keys, 500);
        assert_eq!(rl.monitor.top_n, 10);
        assert!(config.admin.enabled);
        assert_eq!(config.admin.host, "127.0.0.1");
        assert_eq!(config.admin.port, 9200);
        assert_eq!(
            rl.policy_for(true),
            RateLimitPolicy::new(1000, Duration::from_secs(60))
        );
        assert_eq!(
            rl.policy_for(false),
            RateLimitPolicy::new(20, Duration::from_secs(10))
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_policy_falls_back_to_default() {
        let rl = RateLimitSettings::default();
        assert_eq!(rl.policy_for(true), rl.default_policy());
        assert_eq!(rl.policy_for(false), rl.default_policy());
    }

    #[test]
    fn test_skip_paths() {
        let rl = RateLimitSettings {
            skip_paths: vec!["/health".to_string(), "/admin/".to_string()],
            ..Default::default()
        };

        assert!(rl.is_skipped("/health"));
        assert!(rl.is_skipped("/health/live"));
        assert!(!rl.is_skipped("/healthz"));
        assert!(rl.is_skipped("/admin"));
        assert!(rl.is_skipped("/admin/rate-limit/metrics"));
        assert!(!rl.is_skipped("/api/articles"));
    }

    #[test]
    fn test_validate_rejects_zero_limit() {
        let mut config = AppConfig::default();
        config.rate_limit.anonymous = Some(LimitConfig::new(0, 60));
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.rate_limit.default = LimitConfig::new(10, 0);
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.rate_limit.cleanup_interval_secs = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.rate_limit.skip_paths = vec!["health".to_string()];
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.rate_limit.monitor.max_tracked_keys = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.admin.enabled = true;
        config.admin.host = config.server.host.clone();
        config.admin.port = config.server.port;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file_with_env_override() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "rate_limit:\n  key_strategy: user\n  default:\n    limit: 5\n    window_secs: 10\n"
        )
        .unwrap();

        std::env::set_var("BLOG__RATE_LIMIT__INCLUDE_HEADERS", "false");
        std::env::set_var("BLOG__RATE_LIMIT__SKIP_PATHS", "/health,/status");
        let config = AppConfig::load(Some(file.path()));
        std::env::remove_var("BLOG__RATE_LIMIT__INCLUDE_HEADERS");
        std::env::remove_var("BLOG__RATE_LIMIT__SKIP_PATHS");

        let config = config.unwrap();
        let rl = &config.rate_limit;
        assert_eq!(rl.key_strategy, KeyStrategy::User);
        assert_eq!(rl.default, LimitConfig::new(5, 10));
        assert!(!rl.include_headers);
        assert_eq!(rl.skip_paths, vec!["/health", "/status"]);
    }

    #[test]
    fn test_load_missing_file_fails() {
        let result = AppConfig::load(Some(Path::new("/nonexistent/blog-ratelimit.yaml")));
        assert!(matches!(result, Err(RateLimitError::Config(_))));
    }
}
