use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::time::Duration;

use crate::utils::{AdmissionError, AdmissionResult};

/// Role used when the authentication layer supplies none
pub const GUEST_ROLE: &str = "guest";

/// Configuration settings for the admission service
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Server configuration
    pub server: ServerConfig,
    /// Tiered quota configuration
    pub rate_limit: RateLimitConfig,
    /// Flood detection configuration
    pub ddos: DdosConfig,
    /// Behavioral heuristics configuration
    pub threat: ThreatConfig,
    /// Idle state eviction configuration
    pub eviction: EvictionConfig,
}

/// Server configuration settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host address to bind the server to
    pub host: String,
    /// Port number to listen on
    pub port: u16,
    /// Per-request timeout enforced by the HTTP stack
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            request_timeout_secs: 30,
        }
    }
}

/// Tighter limit applied to a path prefix
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EndpointLimit {
    /// Requests admitted per window
    pub requests: u32,
    /// Window length in seconds
    #[serde(default = "default_endpoint_window")]
    pub window_seconds: u64,
}

fn default_endpoint_window() -> u64 {
    60
}

impl EndpointLimit {
    pub fn per_minute(requests: u32) -> Self {
        Self {
            requests,
            window_seconds: default_endpoint_window(),
        }
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_seconds)
    }
}

/// Rate limiting configuration settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub requests_per_minute: u32,
    pub requests_per_hour: u32,
    pub requests_per_day: u32,
    /// Minimum minute-bucket capacity
    pub burst_size: u32,
    /// Scale refill rates and install blocks in response to threat levels
    pub adaptive_enabled: bool,
    /// Extra addresses always admitted; entries ending in `.`, `:` or `*` match as prefixes
    pub whitelist_addresses: Vec<String>,
    /// Addresses always rejected
    pub blacklist_addresses: Vec<String>,
    /// Path prefix to tighter limit
    pub endpoint_overrides: HashMap<String, EndpointLimit>,
    /// Role name to quota multiplier
    pub role_multipliers: HashMap<String, f64>,
    /// Retry-After reported for blacklist entries without expiry
    pub blacklist_retry_after_secs: u64,
    /// Block length installed when a client reaches the critical threat level
    pub critical_block_secs: u64,
    /// Optional process-wide ceiling in requests per second
    pub global_requests_per_second: Option<u32>,
    /// Burst allowance for the process-wide ceiling, defaults to the rate
    pub global_burst: Option<u32>,
}

fn default_role_multipliers() -> HashMap<String, f64> {
    [
        ("admin", 10.0),
        ("moderator", 5.0),
        ("creator", 3.0),
        ("api_user", 2.0),
        ("reader", 1.0),
        (GUEST_ROLE, 1.0),
    ]
    .into_iter()
    .map(|(role, multiplier)| (role.to_string(), multiplier))
    .collect()
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: 60,
            requests_per_hour: 1000,
            requests_per_day: 10000,
            burst_size: 10,
            adaptive_enabled: true,
            whitelist_addresses: Vec::new(),
            blacklist_addresses: Vec::new(),
            endpoint_overrides: HashMap::new(),
            role_multipliers: default_role_multipliers(),
            blacklist_retry_after_secs: 3600,
            critical_block_secs: 300,
            global_requests_per_second: None,
            global_burst: None,
        }
    }
}

impl RateLimitConfig {
    /// Quota multiplier for a role; unknown roles get 1.0
    pub fn role_multiplier(&self, role: &str) -> f64 {
        self.role_multipliers.get(role).copied().unwrap_or(1.0)
    }

    /// Longest configured prefix matching `path`
    pub fn endpoint_override(&self, path: &str) -> Option<(&str, &EndpointLimit)> {
        self.endpoint_overrides
            .iter()
            .filter(|(prefix, _)| path.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(prefix, limit)| (prefix.as_str(), limit))
    }

    pub fn critical_block(&self) -> Duration {
        Duration::from_secs(self.critical_block_secs)
    }

    pub fn validate(&self) -> AdmissionResult<()> {
        if self.requests_per_minute == 0 {
            return Err(AdmissionError::invalid("requests_per_minute must be greater than 0"));
        }
        if self.requests_per_hour == 0 {
            return Err(AdmissionError::invalid("requests_per_hour must be greater than 0"));
        }
        if self.requests_per_day == 0 {
            return Err(AdmissionError::invalid("requests_per_day must be greater than 0"));
        }
        if self.burst_size == 0 {
            return Err(AdmissionError::invalid("burst_size must be greater than 0"));
        }
        for (role, multiplier) in &self.role_multipliers {
            if !multiplier.is_finite() || *multiplier <= 0.0 {
                return Err(AdmissionError::invalid(format!(
                    "role multiplier for '{}' must be a positive number, got {}",
                    role, multiplier
                )));
            }
        }
        for (prefix, limit) in &self.endpoint_overrides {
            if prefix.is_empty() {
                return Err(AdmissionError::invalid("endpoint override prefix must not be empty"));
            }
            if limit.requests == 0 || limit.window_seconds == 0 {
                return Err(AdmissionError::invalid(format!(
                    "endpoint override for '{}' needs non-zero requests and window",
                    prefix
                )));
            }
        }
        if self.global_requests_per_second == Some(0) || self.global_burst == Some(0) {
            return Err(AdmissionError::invalid("global throttle values must be greater than 0"));
        }
        Ok(())
    }
}

/// Flood detection configuration settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DdosConfig {
    /// Requests tolerated per identity within the window
    pub threshold: u32,
    /// Rolling window in seconds
    pub window_seconds: u64,
}

impl Default for DdosConfig {
    fn default() -> Self {
        Self {
            threshold: 500,
            window_seconds: 60,
        }
    }
}

impl DdosConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_seconds)
    }

    pub fn validate(&self) -> AdmissionResult<()> {
        if self.threshold == 0 {
            return Err(AdmissionError::invalid("ddos threshold must be greater than 0"));
        }
        if self.window_seconds == 0 {
            return Err(AdmissionError::invalid("ddos window_seconds must be greater than 0"));
        }
        Ok(())
    }
}

/// Behavioral heuristics configuration settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ThreatConfig {
    /// Inter-arrival time below which a request counts as rapid
    pub rapid_interval_ms: u64,
    /// Rapid requests tolerated before the client is rated high
    pub rapid_threshold: u32,
    /// User agents shorter than this are suspicious
    pub min_user_agent_len: usize,
    /// Lifetime error ratio above which the client is rated high
    pub error_rate_threshold: f64,
    /// Requests needed before the error ratio is considered
    pub error_rate_min_requests: u64,
    /// Path fragments that indicate probing
    pub sensitive_paths: Vec<String>,
}

impl Default for ThreatConfig {
    fn default() -> Self {
        Self {
            rapid_interval_ms: 100,
            rapid_threshold: 10,
            min_user_agent_len: 10,
            error_rate_threshold: 0.5,
            error_rate_min_requests: 10,
            sensitive_paths: ["/admin", "/.env", "/wp-admin", "/phpmyadmin"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

impl ThreatConfig {
    pub fn rapid_interval(&self) -> Duration {
        Duration::from_millis(self.rapid_interval_ms)
    }

    pub fn validate(&self) -> AdmissionResult<()> {
        if !(0.0..=1.0).contains(&self.error_rate_threshold) {
            return Err(AdmissionError::invalid(
                "error_rate_threshold must be between 0.0 and 1.0",
            ));
        }
        Ok(())
    }
}

/// Idle state eviction configuration settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EvictionConfig {
    /// Client state idle for longer than this is dropped
    pub idle_timeout_secs: u64,
    /// How often the sweeper runs
    pub sweep_interval_secs: u64,
}

impl Default for EvictionConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: 3600,
            sweep_interval_secs: 300,
        }
    }
}

impl EvictionConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn validate(&self) -> AdmissionResult<()> {
        if self.idle_timeout_secs == 0 || self.sweep_interval_secs == 0 {
            return Err(AdmissionError::invalid(
                "eviction idle_timeout_secs and sweep_interval_secs must be greater than 0",
            ));
        }
        Ok(())
    }
}

impl Settings {
    /// Load configuration from `.env`, an optional config file and `APP_` environment variables
    pub fn load() -> Result<Self, config::ConfigError> {
        // Load .env file if it exists
        dotenvy::dotenv().ok();

        let file = env::var("ADMISSION_CONFIG").unwrap_or_else(|_| "config/admission".to_string());

        let builder = config::Config::builder()
            .add_source(config::File::with_name(&file).required(false))
            // e.g. APP_RATE_LIMIT__REQUESTS_PER_MINUTE=120
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("rate_limit.whitelist_addresses")
                    .with_list_parse_key("rate_limit.blacklist_addresses")
                    .with_list_parse_key("threat.sensitive_paths")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Reject configurations the limiter cannot run with
    pub fn validate(&self) -> AdmissionResult<()> {
        self.rate_limit.validate()?;
        self.ddos.validate()?;
        self.threat.validate()?;
        self.eviction.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let settings = Settings::default();
        assert_eq!(settings.rate_limit.requests_per_minute, 60);
        assert_eq!(settings.rate_limit.requests_per_hour, 1000);
        assert_eq!(settings.rate_limit.requests_per_day, 10000);
        assert_eq!(settings.rate_limit.burst_size, 10);
        assert!(settings.rate_limit.adaptive_enabled);
        assert_eq!(settings.ddos.threshold, 500);
        assert_eq!(settings.ddos.window_seconds, 60);
        assert_eq!(settings.eviction.idle_timeout_secs, 3600);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_role_multiplier_defaults() {
        let config = RateLimitConfig::default();
        assert_eq!(config.role_multiplier("admin"), 10.0);
        assert_eq!(config.role_multiplier("moderator"), 5.0);
        assert_eq!(config.role_multiplier("creator"), 3.0);
        assert_eq!(config.role_multiplier("api_user"), 2.0);
        assert_eq!(config.role_multiplier(GUEST_ROLE), 1.0);
        assert_eq!(config.role_multiplier("unknown"), 1.0);
    }

    #[test]
    fn test_zero_burst_rejected() {
        let config = RateLimitConfig {
            burst_size: 0,
            ..RateLimitConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(AdmissionError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_bad_multiplier_rejected() {
        let mut config = RateLimitConfig::default();
        config.role_multipliers.insert("bot".to_string(), -1.0);
        assert!(config.validate().is_err());

        config.role_multipliers.insert("bot".to_string(), f64::NAN);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_endpoint_override_longest_prefix_wins() {
        let mut config = RateLimitConfig::default();
        config
            .endpoint_overrides
            .insert("/api".to_string(), EndpointLimit::per_minute(30));
        config
            .endpoint_overrides
            .insert("/api/generate".to_string(), EndpointLimit::per_minute(5));

        let (prefix, limit) = config.endpoint_override("/api/generate/story").unwrap();
        assert_eq!(prefix, "/api/generate");
        assert_eq!(limit.requests, 5);

        let (prefix, _) = config.endpoint_override("/api/stories").unwrap();
        assert_eq!(prefix, "/api");

        assert!(config.endpoint_override("/health").is_none());
    }

    #[test]
    fn test_zero_ddos_threshold_rejected() {
        let config = DdosConfig {
            threshold: 0,
            ..DdosConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_settings_deserialize_partial() {
        let raw = config::Config::builder()
            .add_source(config::File::from_str(
                r#"
                [rate_limit]
                requests_per_minute = 3
                burst_size = 3
                blacklist_addresses = ["203.0.113.9"]

                [rate_limit.endpoint_overrides."/api/generate"]
                requests = 2
                "#,
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap();
        let settings: Settings = raw.try_deserialize().unwrap();

        assert_eq!(settings.rate_limit.requests_per_minute, 3);
        assert_eq!(settings.rate_limit.requests_per_hour, 1000);
        assert_eq!(settings.rate_limit.blacklist_addresses, vec!["203.0.113.9"]);
        assert_eq!(
            settings.rate_limit.endpoint_overrides["/api/generate"],
            EndpointLimit::per_minute(2)
        );
        assert_eq!(settings.server.port, 3000);
    }
}
