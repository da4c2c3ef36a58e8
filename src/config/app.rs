//! Main application configuration
//!
//! This module defines the primary configuration structures for the
//! tandem-match service, including environment variable and TOML file loading
//! and validation.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub service: ServiceSettings,
    pub matchmaking: MatchmakingSettings,
}

/// Service-level settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceSettings {
    /// Service name for logging and metrics
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Port for the HTTP API, health and metrics endpoints
    pub http_port: u16,
    /// Graceful shutdown timeout in seconds
    pub shutdown_timeout_seconds: u64,
}

/// Matchmaking-specific settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchmakingSettings {
    /// Pairing attempts per request before answering pending
    pub max_match_attempts: u32,
    /// Backoff after losing a candidate race, in milliseconds
    pub retry_backoff_ms: u64,
    /// Lifetime of a pairing reservation in seconds
    pub claim_ttl_seconds: u64,
    /// Maximum wait time for participants in seconds
    pub max_wait_time_seconds: u64,
    /// How long undelivered match results are kept, in seconds
    pub result_ttl_seconds: u64,
    /// Expiry sweep interval in seconds
    pub cleanup_interval_seconds: u64,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            name: "tandem-match".to_string(),
            log_level: "info".to_string(),
            http_port: 8080,
            shutdown_timeout_seconds: 30,
        }
    }
}

impl Default for MatchmakingSettings {
    fn default() -> Self {
        Self {
            max_match_attempts: 3,
            retry_backoff_ms: 10,
            claim_ttl_seconds: 30,
            max_wait_time_seconds: 300,   // 5 minutes
            result_ttl_seconds: 600,      // 10 minutes
            cleanup_interval_seconds: 60, // 1 minute
        }
    }
}

/// Parse an environment variable into `target` if it is set
fn env_override<T: std::str::FromStr>(name: &str, target: &mut T) -> Result<()> {
    if let Ok(value) = env::var(name) {
        *target = value
            .parse()
            .map_err(|_| anyhow!("Invalid {} value: {}", name, value))?;
    }
    Ok(())
}

impl AppConfig {
    /// Load configuration from environment variables with fallback to defaults
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env()?;
        validate_config(&config)?;
        Ok(config)
    }

    /// Load configuration from a TOML file, then apply environment overrides
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let mut config: AppConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        config.apply_env()?;

        validate_config(&config)?;
        Ok(config)
    }

    fn apply_env(&mut self) -> Result<()> {
        // Service settings
        if let Ok(name) = env::var("SERVICE_NAME") {
            self.service.name = name;
        }
        if let Ok(log_level) = env::var("LOG_LEVEL") {
            self.service.log_level = log_level;
        }
        env_override("HTTP_PORT", &mut self.service.http_port)?;
        env_override(
            "SHUTDOWN_TIMEOUT_SECONDS",
            &mut self.service.shutdown_timeout_seconds,
        )?;

        // Matchmaking settings
        let matchmaking = &mut self.matchmaking;
        env_override("MAX_MATCH_ATTEMPTS", &mut matchmaking.max_match_attempts)?;
        env_override("RETRY_BACKOFF_MS", &mut matchmaking.retry_backoff_ms)?;
        env_override("CLAIM_TTL_SECONDS", &mut matchmaking.claim_ttl_seconds)?;
        env_override("MAX_WAIT_TIME_SECONDS", &mut matchmaking.max_wait_time_seconds)?;
        env_override("RESULT_TTL_SECONDS", &mut matchmaking.result_ttl_seconds)?;
        env_override(
            "CLEANUP_INTERVAL_SECONDS",
            &mut matchmaking.cleanup_interval_seconds,
        )?;

        Ok(())
    }

    /// Get shutdown timeout as Duration
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.service.shutdown_timeout_seconds)
    }

    /// Get cleanup interval as Duration
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.matchmaking.cleanup_interval_seconds)
    }

    /// Get claim lifetime as Duration
    pub fn claim_ttl(&self) -> Duration {
        Duration::from_secs(self.matchmaking.claim_ttl_seconds)
    }
}

/// Validate configuration values
pub fn validate_config(config: &AppConfig) -> Result<()> {
    // Validate log level
    match config.service.log_level.to_lowercase().as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => {}
        _ => return Err(anyhow!("Invalid log level: {}", config.service.log_level)),
    }

    if config.service.name.trim().is_empty() {
        return Err(anyhow!("Service name cannot be empty"));
    }
    if config.service.http_port == 0 {
        return Err(anyhow!("HTTP port cannot be 0"));
    }
    if config.service.shutdown_timeout_seconds == 0 {
        return Err(anyhow!("Shutdown timeout must be greater than 0"));
    }

    // Validate matchmaking settings
    let matchmaking = &config.matchmaking;
    if matchmaking.max_match_attempts == 0 {
        return Err(anyhow!("Max match attempts must be greater than 0"));
    }
    if matchmaking.claim_ttl_seconds == 0 {
        return Err(anyhow!("Claim TTL must be greater than 0"));
    }
    if matchmaking.max_wait_time_seconds == 0 {
        return Err(anyhow!("Max wait time must be greater than 0"));
    }
    if matchmaking.max_wait_time_seconds <= matchmaking.claim_ttl_seconds {
        return Err(anyhow!(
            "Max wait time ({}s) must exceed the claim TTL ({}s)",
            matchmaking.max_wait_time_seconds,
            matchmaking.claim_ttl_seconds
        ));
    }
    if matchmaking.result_ttl_seconds == 0 {
        return Err(anyhow!("Result TTL must be greater than 0"));
    }
    if matchmaking.cleanup_interval_seconds == 0 {
        return Err(anyhow!("Cleanup interval must be greater than 0"));
    }

    Ok(())
}
