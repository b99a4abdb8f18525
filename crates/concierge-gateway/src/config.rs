//! Gateway configuration types.
//!
//! This module defines configuration structures for the HTTP/WebSocket gateway.
//! The binary fills them from environment variables; see [`GatewayConfig::from_env`].

use std::time::Duration;

use concierge_control::ControlConfig;
use concierge_router::Strategy;

/// Configuration for the gateway service.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Listen address (e.g., "0.0.0.0:8080").
    pub listen_addr: String,

    /// RocksDB data directory.
    pub data_dir: String,

    /// Shared HS256 secret for bearer tokens.
    pub jwt_secret: String,

    /// Expected token issuer; not checked when absent.
    pub jwt_issuer: Option<String>,

    /// Automatic assignment strategy.
    pub strategy: Strategy,

    /// Active consultations per staff member before automatic assignment skips them.
    pub max_concurrent_consultations: u32,

    /// How long a WebSocket may stay unauthenticated, in seconds.
    pub auth_timeout_seconds: u64,

    /// Interval between transport-level pings, in seconds.
    pub heartbeat_interval_seconds: u64,

    /// Silence after which a connection is dropped, in seconds.
    pub heartbeat_timeout_seconds: u64,

    /// Allowed CORS origins.
    pub cors_origins: Vec<String>,

    /// Maximum request body size in bytes.
    pub max_body_bytes: usize,

    /// Request timeout in seconds.
    pub request_timeout_seconds: u64,
}

impl GatewayConfig {
    fn default_listen_addr() -> String {
        "0.0.0.0:8080".to_string()
    }

    fn default_data_dir() -> String {
        "/data/concierge".to_string()
    }

    const fn default_max_concurrent() -> u32 {
        10
    }

    const fn default_auth_timeout() -> u64 {
        10
    }

    const fn default_heartbeat_interval() -> u64 {
        25
    }

    const fn default_heartbeat_timeout() -> u64 {
        60
    }

    const fn default_max_body() -> usize {
        1024 * 1024 // 1 MB
    }

    const fn default_request_timeout() -> u64 {
        30
    }

    /// Build a configuration from environment variables, falling back to defaults.
    ///
    /// # Errors
    ///
    /// Returns a description of the first variable that is set but unparsable.
    pub fn from_env() -> Result<Self, String> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Returns a description of the first variable that is set but unparsable.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, String> {
        fn parsed<T: std::str::FromStr>(
            lookup: &impl Fn(&str) -> Option<String>,
            key: &str,
            default: T,
        ) -> Result<T, String> {
            match lookup(key) {
                Some(raw) => raw
                    .trim()
                    .parse()
                    .map_err(|_| format!("{key} has an invalid value: {raw}")),
                None => Ok(default),
            }
        }

        let defaults = Self::default();
        Ok(Self {
            listen_addr: lookup("LISTEN_ADDR").unwrap_or(defaults.listen_addr),
            data_dir: lookup("DATA_DIR").unwrap_or(defaults.data_dir),
            jwt_secret: lookup("JWT_SECRET").unwrap_or(defaults.jwt_secret),
            jwt_issuer: lookup("JWT_ISSUER").or(defaults.jwt_issuer),
            strategy: match lookup("STAFF_ASSIGN_STRATEGY") {
                Some(raw) => raw.trim().parse()?,
                None => defaults.strategy,
            },
            max_concurrent_consultations: parsed(
                &lookup,
                "MAX_CONCURRENT_CONSULTATIONS",
                defaults.max_concurrent_consultations,
            )?,
            auth_timeout_seconds: parsed(
                &lookup,
                "AUTH_TIMEOUT_SECONDS",
                defaults.auth_timeout_seconds,
            )?,
            heartbeat_interval_seconds: parsed(
                &lookup,
                "HEARTBEAT_INTERVAL_SECONDS",
                defaults.heartbeat_interval_seconds,
            )?,
            heartbeat_timeout_seconds: parsed(
                &lookup,
                "HEARTBEAT_TIMEOUT_SECONDS",
                defaults.heartbeat_timeout_seconds,
            )?,
            cors_origins: lookup("CORS_ORIGINS").map_or(defaults.cors_origins, |raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|origin| !origin.is_empty())
                    .map(str::to_string)
                    .collect()
            }),
            max_body_bytes: parsed(&lookup, "MAX_BODY_BYTES", defaults.max_body_bytes)?,
            request_timeout_seconds: parsed(
                &lookup,
                "REQUEST_TIMEOUT_SECONDS",
                defaults.request_timeout_seconds,
            )?,
        })
    }

    /// Get the authentication timeout as a `Duration`.
    #[must_use]
    pub fn auth_timeout(&self) -> Duration {
        Duration::from_secs(self.auth_timeout_seconds)
    }

    /// Get the heartbeat interval as a `Duration`.
    #[must_use]
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_seconds.max(1))
    }

    /// Get the heartbeat timeout as a `Duration`.
    #[must_use]
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_seconds)
    }

    /// Get the request timeout as a `Duration`.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    /// The consultation service settings implied by this configuration.
    #[must_use]
    pub fn control_config(&self) -> ControlConfig {
        ControlConfig {
            strategy: self.strategy,
            max_concurrent_consultations: self.max_concurrent_consultations,
            ..ControlConfig::default()
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen_addr: Self::default_listen_addr(),
            data_dir: Self::default_data_dir(),
            jwt_secret: String::new(),
            jwt_issuer: None,
            strategy: Strategy::default(),
            max_concurrent_consultations: Self::default_max_concurrent(),
            auth_timeout_seconds: Self::default_auth_timeout(),
            heartbeat_interval_seconds: Self::default_heartbeat_interval(),
            heartbeat_timeout_seconds: Self::default_heartbeat_timeout(),
            cors_origins: vec!["*".to_string()],
            max_body_bytes: Self::default_max_body(),
            request_timeout_seconds: Self::default_request_timeout(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn default_config() {
        let config = GatewayConfig::default();
        assert_eq!(config.listen_addr, "0.0.0.0:8080");
        assert_eq!(config.strategy, Strategy::LeastBusy);
        assert_eq!(config.max_concurrent_consultations, 10);
        assert_eq!(config.auth_timeout_seconds, 10);
        assert_eq!(config.heartbeat_interval_seconds, 25);
        assert_eq!(config.heartbeat_timeout_seconds, 60);
        assert_eq!(config.max_body_bytes, 1024 * 1024);
    }

    #[test]
    fn timeout_durations() {
        let config = GatewayConfig::default();
        assert_eq!(config.auth_timeout(), Duration::from_secs(10));
        assert_eq!(config.heartbeat_timeout(), Duration::from_secs(60));
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn reads_environment_overrides() {
        let config = GatewayConfig::from_lookup(lookup(&[
            ("STAFF_ASSIGN_STRATEGY", "round_robin"),
            ("MAX_CONCURRENT_CONSULTATIONS", "3"),
            ("CORS_ORIGINS", "https://a.example, https://b.example"),
            ("JWT_ISSUER", "concierge"),
        ]))
        .unwrap();
        assert_eq!(config.strategy, Strategy::RoundRobin);
        assert_eq!(config.max_concurrent_consultations, 3);
        assert_eq!(config.cors_origins, vec!["https://a.example", "https://b.example"]);
        assert_eq!(config.jwt_issuer.as_deref(), Some("concierge"));
        assert_eq!(config.heartbeat_interval_seconds, 25);

        let control = config.control_config();
        assert_eq!(control.strategy, Strategy::RoundRobin);
        assert_eq!(control.max_concurrent_consultations, 3);
        assert_eq!(control.recall_window_seconds, 120);
    }

    #[test]
    fn empty_environment_yields_defaults() {
        let config = GatewayConfig::from_lookup(|_| None).unwrap();
        let defaults = GatewayConfig::default();
        assert_eq!(config.listen_addr, defaults.listen_addr);
        assert_eq!(config.data_dir, defaults.data_dir);
        assert_eq!(config.cors_origins, vec!["*"]);
        assert_eq!(config.request_timeout_seconds, 30);
        assert!(config.jwt_issuer.is_none());
    }

    #[test]
    fn rejects_malformed_values() {
        assert!(GatewayConfig::from_lookup(lookup(&[("AUTH_TIMEOUT_SECONDS", "soon")])).is_err());
        assert!(GatewayConfig::from_lookup(lookup(&[("STAFF_ASSIGN_STRATEGY", "fastest")])).is_err());
    }
}
