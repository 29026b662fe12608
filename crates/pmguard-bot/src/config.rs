//! Application configuration.
//!
//! Loaded from a TOML file through the `config` crate, then overlaid with
//! `PMGUARD__SECTION__KEY` environment variables.

use crate::error::{AppError, AppResult};
use pmguard_core::OwnerRef;
use pmguard_dashboard::DashboardConfig;
use pmguard_engine::WorkerConfig;
use pmguard_risk::{CircuitBreakerConfig, MAX_COOLDOWN_SECS};
use pmguard_upstream::HttpApiConfig;
use pmguard_ws::ConnectionConfig;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::time::Duration;
use tracing::warn;

pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Prefix for environment overrides, e.g. `PMGUARD__WORKER__POLL_INTERVAL_MS`.
pub const ENV_PREFIX: &str = "PMGUARD";

// ============================================================================
// Upstream
// ============================================================================

/// Upstream trading API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Env var holding the key used for owners without their own entry.
    #[serde(default = "default_api_key_env")]
    pub default_api_key_env: Option<String>,
    /// ownerRef -> name of the env var holding that owner's API key.
    #[serde(default)]
    pub owners: BTreeMap<String, String>,
}

fn default_base_url() -> String {
    "http://localhost:8080/api".to_string()
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_api_key_env() -> Option<String> {
    Some("PMGUARD_API_KEY".to_string())
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            request_timeout_ms: default_request_timeout_ms(),
            default_api_key_env: default_api_key_env(),
            owners: BTreeMap::new(),
        }
    }
}

impl UpstreamConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Configured owners in stable order.
    pub fn owner_refs(&self) -> Vec<OwnerRef> {
        self.owners.keys().map(OwnerRef::new).collect()
    }

    /// Resolve API keys through `lookup` (normally `std::env::var`).
    ///
    /// An owner whose variable is unset is kept without a key; its calls
    /// fail as unauthorized until the key is provided.
    pub fn http_config<F>(&self, lookup: F) -> HttpApiConfig
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut api_keys = HashMap::new();
        for (owner, var) in &self.owners {
            match lookup(var) {
                Some(key) if !key.is_empty() => {
                    api_keys.insert(OwnerRef::new(owner.as_str()), key);
                }
                _ => warn!(owner = %owner, env_var = %var, "API key env var not set"),
            }
        }
        let default_api_key = self
            .default_api_key_env
            .as_deref()
            .and_then(|var| lookup(var))
            .filter(|key| !key.is_empty());

        HttpApiConfig {
            base_url: self.base_url.clone(),
            request_timeout: self.request_timeout(),
            api_keys,
            default_api_key,
        }
    }
}

// ============================================================================
// Worker
// ============================================================================

/// Monitoring worker settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerSettings {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Concurrent per-owner position refreshes.
    #[serde(default = "default_max_concurrent_refreshes")]
    pub max_concurrent_refreshes: usize,
    /// Concurrent rule evaluations and price pulls within a cycle.
    #[serde(default = "default_max_concurrent_evaluations")]
    pub max_concurrent_evaluations: usize,
    /// Minimum spacing of RULE_EVALUATED events per rule (0 = never).
    #[serde(default = "default_evaluation_event_interval_secs")]
    pub evaluation_event_interval_secs: u64,
}

fn default_poll_interval_ms() -> u64 {
    10_000
}

fn default_max_concurrent_refreshes() -> usize {
    4
}

fn default_max_concurrent_evaluations() -> usize {
    8
}

fn default_evaluation_event_interval_secs() -> u64 {
    60
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            max_concurrent_refreshes: default_max_concurrent_refreshes(),
            max_concurrent_evaluations: default_max_concurrent_evaluations(),
            evaluation_event_interval_secs: default_evaluation_event_interval_secs(),
        }
    }
}

// ============================================================================
// Stream
// ============================================================================

/// Market stream settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_stream_url")]
    pub url: String,
    /// Maximum consecutive reconnection attempts (0 = infinite).
    #[serde(default)]
    pub max_reconnect_attempts: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_stable_after_ms")]
    pub stable_after_ms: u64,
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    #[serde(default = "default_heartbeat_timeout_ms")]
    pub heartbeat_timeout_ms: u64,
    /// Inbound message queue depth.
    #[serde(default = "default_stream_buffer")]
    pub buffer: usize,
}

fn default_stream_url() -> String {
    "wss://ws-subscriptions-clob.polymarket.com/ws/market".to_string()
}

fn default_initial_backoff_ms() -> u64 {
    1_000
}

fn default_max_backoff_ms() -> u64 {
    60_000
}

fn default_stable_after_ms() -> u64 {
    30_000
}

fn default_heartbeat_interval_ms() -> u64 {
    10_000
}

fn default_heartbeat_timeout_ms() -> u64 {
    5_000
}

fn default_stream_buffer() -> usize {
    1024
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: default_stream_url(),
            max_reconnect_attempts: 0,
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            stable_after_ms: default_stable_after_ms(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            heartbeat_timeout_ms: default_heartbeat_timeout_ms(),
            buffer: default_stream_buffer(),
        }
    }
}

impl From<&StreamConfig> for ConnectionConfig {
    fn from(cfg: &StreamConfig) -> Self {
        Self {
            url: cfg.url.clone(),
            max_reconnect_attempts: cfg.max_reconnect_attempts,
            initial_backoff_ms: cfg.initial_backoff_ms,
            max_backoff_ms: cfg.max_backoff_ms,
            stable_after_ms: cfg.stable_after_ms,
            heartbeat_interval_ms: cfg.heartbeat_interval_ms,
            heartbeat_timeout_ms: cfg.heartbeat_timeout_ms,
            ..ConnectionConfig::default()
        }
    }
}

// ============================================================================
// Cache / persistence / telemetry
// ============================================================================

/// Streamed price cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceCacheConfig {
    /// Streamed prices older than this are ignored.
    #[serde(default = "default_ttl_ms")]
    pub ttl_ms: u64,
}

fn default_ttl_ms() -> u64 {
    30_000
}

impl Default for PriceCacheConfig {
    fn default() -> Self {
        Self {
            ttl_ms: default_ttl_ms(),
        }
    }
}

/// Journal settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Directory holding `rules.jsonl` and `events.jsonl`.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    /// Event journal writer queue depth.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

fn default_data_dir() -> String {
    "./data".to_string()
}

fn default_event_buffer() -> usize {
    1000
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            event_buffer: default_event_buffer(),
        }
    }
}

impl PersistenceConfig {
    pub fn rules_path(&self) -> std::path::PathBuf {
        Path::new(&self.data_dir).join("rules.jsonl")
    }

    pub fn events_path(&self) -> std::path::PathBuf {
        Path::new(&self.data_dir).join("events.jsonl")
    }
}

/// Logging settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Filter used when `RUST_LOG` is unset.
    #[serde(default)]
    pub log_level: Option<String>,
}

// ============================================================================
// AppConfig
// ============================================================================

/// Main application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub worker: WorkerSettings,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub price_cache: PriceCacheConfig,
    #[serde(default)]
    pub persistence: PersistenceConfig,
    #[serde(default)]
    pub dashboard: DashboardConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl AppConfig {
    /// Load `path` (optional) with environment overrides, then validate.
    pub fn load(path: &str) -> AppResult<Self> {
        if !Path::new(path).exists() {
            warn!(path = %path, "Config file not found, using defaults");
        }
        let settings = ::config::Config::builder()
            .add_source(::config::File::with_name(path).required(false))
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?;
        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML document without environment overrides.
    pub fn from_toml(content: &str) -> AppResult<Self> {
        let settings = ::config::Config::builder()
            .add_source(::config::File::from_str(content, ::config::FileFormat::Toml))
            .build()?;
        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.worker.poll_interval_ms == 0 {
            return Err(AppError::Config("worker.poll_interval_ms must be > 0".into()));
        }
        if self.worker.max_concurrent_refreshes == 0 || self.worker.max_concurrent_evaluations == 0
        {
            return Err(AppError::Config("worker concurrency limits must be >= 1".into()));
        }
        if self.circuit_breaker.failure_threshold == 0 {
            return Err(AppError::Config(
                "circuit_breaker.failure_threshold must be >= 1".into(),
            ));
        }
        if self.circuit_breaker.cooldown_secs > MAX_COOLDOWN_SECS {
            return Err(AppError::Config(format!(
                "circuit_breaker.cooldown_secs must be <= {MAX_COOLDOWN_SECS}"
            )));
        }
        if self.upstream.request_timeout_ms == 0 {
            return Err(AppError::Config("upstream.request_timeout_ms must be > 0".into()));
        }
        if self.stream.initial_backoff_ms > self.stream.max_backoff_ms {
            return Err(AppError::Config(
                "stream.initial_backoff_ms must not exceed stream.max_backoff_ms".into(),
            ));
        }
        if self.stream.enabled && self.stream.url.is_empty() {
            return Err(AppError::Config("stream.url is required when enabled".into()));
        }
        Ok(())
    }

    /// Worker settings in engine form.
    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            poll_interval: Duration::from_millis(self.worker.poll_interval_ms),
            evaluation_event_interval: Duration::from_secs(
                self.worker.evaluation_event_interval_secs,
            ),
            max_concurrent_evaluations: self.worker.max_concurrent_evaluations,
            stream: self.stream.enabled.then(|| ConnectionConfig::from(&self.stream)),
            stream_buffer: self.stream.buffer,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert!(!config.stream.enabled);
        assert!(!config.dashboard.enabled);
        assert!(config.worker_config().stream.is_none());
    }

    #[test]
    fn test_oversized_cooldown_rejected() {
        let mut config = AppConfig::default();
        config.circuit_breaker.cooldown_secs = u64::MAX;
        assert!(matches!(config.validate(), Err(AppError::Config(_))));

        config.circuit_breaker.cooldown_secs = MAX_COOLDOWN_SECS;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config = AppConfig::from_toml(
            r#"
            [worker]
            poll_interval_ms = 2500

            [upstream.owners]
            alice = "ALICE_KEY"

            [stream]
            enabled = true
            "#,
        )
        .unwrap();

        assert_eq!(config.worker.poll_interval_ms, 2500);
        assert_eq!(config.worker.max_concurrent_evaluations, 8);
        assert_eq!(config.circuit_breaker.failure_threshold, 5);
        assert_eq!(config.upstream.owner_refs(), vec![OwnerRef::new("alice")]);

        let worker = config.worker_config();
        assert_eq!(worker.poll_interval, Duration::from_millis(2500));
        let stream = worker.stream.unwrap();
        assert_eq!(stream.url, default_stream_url());
        assert_eq!(stream.initial_backoff_ms, 1_000);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = AppConfig::default();
        config.worker.poll_interval_ms = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.circuit_breaker.failure_threshold = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.stream.initial_backoff_ms = 120_000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_http_config_resolves_keys() {
        let mut config = UpstreamConfig::default();
        config.owners.insert("alice".into(), "ALICE_KEY".into());
        config.owners.insert("bob".into(), "BOB_KEY".into());

        let http = config.http_config(|var| match var {
            "ALICE_KEY" => Some("k-alice".to_string()),
            "PMGUARD_API_KEY" => Some("k-default".to_string()),
            _ => None,
        });

        assert_eq!(
            http.api_keys.get(&OwnerRef::new("alice")).map(String::as_str),
            Some("k-alice")
        );
        assert!(!http.api_keys.contains_key(&OwnerRef::new("bob")));
        assert_eq!(http.default_api_key.as_deref(), Some("k-default"));
        assert_eq!(http.request_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_config_serialization() {
        let toml_str = toml::to_string(&AppConfig::default()).unwrap();
        assert!(toml_str.contains("poll_interval_ms"));
        assert!(toml_str.contains("failure_threshold"));
    }
}
