//! Client configuration
//!
//! This module defines the configuration for the ticket client: where the
//! frontend lives, how long a search may take and how retries back off.
//! Values come from a TOML file or environment variables; the library core
//! only ever sees the resulting structs.

use crate::backoff::BackoffPolicy;
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Main client configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub service: ServiceSettings,
    pub frontend: FrontendSettings,
    pub search: SearchSettings,
    pub backoff: BackoffSettings,
}

/// Process-level settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceSettings {
    /// Name used in logs
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
}

/// Transport security for the frontend channel
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum TransportSecurity {
    #[default]
    Plaintext,
    Tls {
        /// PEM file overriding the default root store
        ca_certificate: Option<PathBuf>,
        /// Expected server name when it differs from the address host
        domain_name: Option<String>,
    },
}

/// Frontend endpoint settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrontendSettings {
    /// Frontend address as `host:port`
    pub address: String,
    pub security: TransportSecurity,
    /// Per-call timeout for unary RPCs in milliseconds
    pub call_timeout_ms: u64,
    /// TCP/HTTP2 connect timeout in milliseconds
    pub connect_timeout_ms: u64,
}

/// Search lifecycle settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchSettings {
    /// Overall search deadline in seconds (0 = no deadline)
    pub deadline_seconds: u64,
    /// Maximum retries for ticket creation and watch reconnects (0 = unbounded)
    pub max_reconnect_attempts: u32,
    /// Cap on time the watcher keeps reconnecting, in seconds (0 = no cap)
    pub watch_max_elapsed_seconds: u64,
}

/// Backoff settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffSettings {
    pub base_ms: u64,
    pub cap_ms: u64,
    pub jitter: bool,
    /// Fixed jitter seed for reproducible runs
    pub seed: Option<u64>,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            name: "match-ticket".to_string(),
            log_level: "info".to_string(),
        }
    }
}

impl FrontendSettings {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl Default for FrontendSettings {
    fn default() -> Self {
        Self {
            address: "open-match-frontend.open-match.svc.cluster.local:50504".to_string(),
            security: TransportSecurity::Plaintext,
            call_timeout_ms: 10_000,
            connect_timeout_ms: 5_000,
        }
    }
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            deadline_seconds: 60,
            max_reconnect_attempts: 5,
            watch_max_elapsed_seconds: 0,
        }
    }
}

impl Default for BackoffSettings {
    fn default() -> Self {
        Self {
            base_ms: 250,
            cap_ms: 10_000,
            jitter: true,
            seed: None,
        }
    }
}

fn env_parse<T: FromStr>(name: &str) -> Result<Option<T>> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| anyhow!("Invalid {} value: {}", name, raw)),
        Err(_) => Ok(None),
    }
}

impl ClientConfig {
    /// Load configuration from environment variables with fallback to defaults
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(level) = env::var("LOG_LEVEL") {
            config.service.log_level = level;
        }

        // Frontend settings
        if let Ok(address) = env::var("OPEN_MATCH_FRONTEND_SERVICE") {
            config.frontend.address = address;
        }
        if let Some(timeout) = env_parse("MATCH_CALL_TIMEOUT_MS")? {
            config.frontend.call_timeout_ms = timeout;
        }
        if let Some(timeout) = env_parse("MATCH_CONNECT_TIMEOUT_MS")? {
            config.frontend.connect_timeout_ms = timeout;
        }
        if env_parse::<bool>("MATCH_TLS")?.unwrap_or(false) {
            config.frontend.security = TransportSecurity::Tls {
                ca_certificate: env::var("MATCH_TLS_CA_CERT").ok().map(PathBuf::from),
                domain_name: env::var("MATCH_TLS_DOMAIN").ok(),
            };
        }

        // Search settings
        if let Some(deadline) = env_parse("ASSIGNMENT_TIMEOUT")? {
            config.search.deadline_seconds = deadline;
        }
        if let Some(attempts) = env_parse("MATCH_MAX_RECONNECT_ATTEMPTS")? {
            config.search.max_reconnect_attempts = attempts;
        }
        if let Some(elapsed) = env_parse("MATCH_WATCH_MAX_ELAPSED_SECONDS")? {
            config.search.watch_max_elapsed_seconds = elapsed;
        }

        // Backoff settings
        if let Some(base) = env_parse("MATCH_BACKOFF_BASE_MS")? {
            config.backoff.base_ms = base;
        }
        if let Some(cap) = env_parse("MATCH_BACKOFF_CAP_MS")? {
            config.backoff.cap_ms = cap;
        }
        if let Some(jitter) = env_parse("MATCH_BACKOFF_JITTER")? {
            config.backoff.jitter = jitter;
        }
        if let Some(seed) = env_parse("MATCH_BACKOFF_SEED")? {
            config.backoff.seed = Some(seed);
        }

        validate_config(&config)?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml_str(&raw)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw).context("Failed to parse TOML configuration")?;
        validate_config(&config)?;
        Ok(config)
    }

    /// Get the per-call timeout as Duration
    pub fn call_timeout(&self) -> Duration {
        self.frontend.call_timeout()
    }

    /// Get the connect timeout as Duration
    pub fn connect_timeout(&self) -> Duration {
        self.frontend.connect_timeout()
    }

    /// Overall search deadline, if any
    pub fn search_deadline(&self) -> Option<Duration> {
        (self.search.deadline_seconds > 0).then(|| Duration::from_secs(self.search.deadline_seconds))
    }

    /// Watcher reconnect time cap, if any
    pub fn watch_max_elapsed(&self) -> Option<Duration> {
        (self.search.watch_max_elapsed_seconds > 0)
            .then(|| Duration::from_secs(self.search.watch_max_elapsed_seconds))
    }

    pub fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy {
            base: Duration::from_millis(self.backoff.base_ms),
            cap: Duration::from_millis(self.backoff.cap_ms),
            jitter: self.backoff.jitter,
        }
    }
}

/// Validate configuration values
pub fn validate_config(config: &ClientConfig) -> Result<()> {
    // Validate log level
    match config.service.log_level.to_lowercase().as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => {}
        _ => return Err(anyhow!("Invalid log level: {}", config.service.log_level)),
    }

    // Validate frontend settings
    if config.frontend.address.trim().is_empty() {
        return Err(anyhow!("Frontend address cannot be empty"));
    }
    if config.frontend.address.contains("://") {
        return Err(anyhow!(
            "Frontend address must be host:port without a scheme: {}",
            config.frontend.address
        ));
    }
    if config.frontend.call_timeout_ms == 0 {
        return Err(anyhow!("Call timeout must be greater than 0"));
    }
    if config.frontend.connect_timeout_ms == 0 {
        return Err(anyhow!("Connect timeout must be greater than 0"));
    }

    // Validate backoff settings
    if config.backoff.cap_ms == 0 {
        return Err(anyhow!("Backoff cap must be greater than 0"));
    }
    if config.backoff.base_ms > config.backoff.cap_ms {
        return Err(anyhow!(
            "Backoff base ({}ms) cannot exceed cap ({}ms)",
            config.backoff.base_ms,
            config.backoff.cap_ms
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = ClientConfig::default();
        assert!(validate_config(&config).is_ok());
        assert_eq!(config.call_timeout(), Duration::from_secs(10));
        assert_eq!(config.connect_timeout(), Duration::from_secs(5));
        assert_eq!(config.search_deadline(), Some(Duration::from_secs(60)));
        assert_eq!(config.watch_max_elapsed(), None);
        assert_eq!(config.frontend.security, TransportSecurity::Plaintext);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = ClientConfig::from_toml_str(
            r#"
            [frontend]
            address = "localhost:50504"

            [frontend.security]
            mode = "tls"
            domain_name = "frontend.example.com"

            [search]
            deadline_seconds = 0
            max_reconnect_attempts = 2

            [backoff]
            seed = 7
            "#,
        )
        .unwrap();

        assert_eq!(config.frontend.address, "localhost:50504");
        assert_eq!(
            config.frontend.security,
            TransportSecurity::Tls {
                ca_certificate: None,
                domain_name: Some("frontend.example.com".to_string()),
            }
        );
        assert_eq!(config.search_deadline(), None);
        assert_eq!(config.search.max_reconnect_attempts, 2);
        assert_eq!(config.backoff.seed, Some(7));
        assert_eq!(config.backoff.base_ms, 250);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut config = ClientConfig::default();
        config.backoff.base_ms = 20_000;
        assert!(validate_config(&config).is_err());

        let mut config = ClientConfig::default();
        config.frontend.address = "http://localhost:50504".to_string();
        assert!(validate_config(&config).is_err());

        let mut config = ClientConfig::default();
        config.service.log_level = "loud".to_string();
        assert!(validate_config(&config).is_err());

        let mut config = ClientConfig::default();
        config.frontend.call_timeout_ms = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_backoff_policy_from_settings() {
        let mut config = ClientConfig::default();
        config.backoff.jitter = false;
        let policy = config.backoff_policy();
        assert_eq!(policy.base, Duration::from_millis(250));
        assert_eq!(policy.cap, Duration::from_secs(10));
        assert!(!policy.jitter);
    }
}
