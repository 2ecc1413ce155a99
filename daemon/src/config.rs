//! Daemon configuration

use anyhow::{Context, Result};
use iotlink_store::StoreBackend;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::Path;

/// Daemon configuration
#[derive(Debug, Clone, Deserialize, Default)]
pub struct DaemonConfig {
    /// Device WebSocket server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Management API configuration
    #[serde(default)]
    pub management: ManagementConfig,

    /// Device handshake security
    #[serde(default)]
    pub security: SecurityConfig,

    /// Login lockout thresholds
    #[serde(default)]
    pub lock: LockConfig,

    /// Per-route rate limiting
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Counter store backend
    #[serde(default)]
    pub store: StoreConfig,

    /// Monitoring configuration
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

impl DaemonConfig {
    /// Load configuration from file
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        Self::parse(&content)
    }

    /// Parse configuration from TOML text
    pub fn parse(content: &str) -> Result<Self> {
        let config: DaemonConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and merge configuration from file (incremental update)
    ///
    /// Only non-default values from the new config will overwrite existing values.
    pub async fn load_merge(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let content = tokio::fs::read_to_string(path).await?;
        let other: DaemonConfig = toml::from_str(&content)?;
        self.merge(other);
        self.validate()
    }

    /// Reject values the counters cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.lock.max_unsuccessful_attempts == 0 {
            anyhow::bail!("lock.max_unsuccessful_attempts must be at least 1");
        }
        if self.lock.lock_interval_length == 0 {
            anyhow::bail!("lock.lock_interval_length must be at least 1");
        }
        if self.lock.lock_live_period == 0 {
            anyhow::bail!("lock.lock_live_period must be at least 1");
        }
        if self.server.handshake_timeout_secs == 0 {
            anyhow::bail!("server.handshake_timeout_secs must be at least 1");
        }
        if self.rate_limit.window_secs == 0 {
            anyhow::bail!("rate_limit.window_secs must be at least 1");
        }
        if self.security.require_device_token && self.security.device_token_secret.is_none() {
            anyhow::bail!("security.device_token_secret is required when require_device_token is set");
        }
        Ok(())
    }

    /// Merge another config into this one (incremental)
    ///
    /// Rules:
    /// - Scalar values: overwrite if the new value differs from default
    /// - Option values: overwrite if Some
    pub fn merge(&mut self, other: DaemonConfig) {
        // Server config
        if other.server.bind != default_device_bind() {
            self.server.bind = other.server.bind;
        }
        if other.server.path != default_device_path() {
            self.server.path = other.server.path;
        }
        if other.server.max_connections != default_max_connections() {
            self.server.max_connections = other.server.max_connections;
        }
        if other.server.handshake_timeout_secs != default_handshake_timeout() {
            self.server.handshake_timeout_secs = other.server.handshake_timeout_secs;
        }

        // Management
        if other.management.bind != default_management_bind() {
            self.management.bind = other.management.bind;
        }

        // Security config - only if provided
        if other.security.device_token_secret.is_some() {
            self.security.device_token_secret = other.security.device_token_secret;
        }
        if other.security.require_device_token != default_true() {
            self.security.require_device_token = other.security.require_device_token;
        }

        // Lock thresholds
        if other.lock.max_unsuccessful_attempts != default_max_unsuccessful_attempts() {
            self.lock.max_unsuccessful_attempts = other.lock.max_unsuccessful_attempts;
        }
        if other.lock.lock_interval_length != default_lock_interval_length() {
            self.lock.lock_interval_length = other.lock.lock_interval_length;
        }
        if other.lock.lock_live_period != default_lock_live_period() {
            self.lock.lock_live_period = other.lock.lock_live_period;
        }

        // Rate limiting
        if other.rate_limit.window_secs != default_rate_window() {
            self.rate_limit.window_secs = other.rate_limit.window_secs;
        }
        if other.rate_limit.max_hits != default_max_hits() {
            self.rate_limit.max_hits = other.rate_limit.max_hits;
        }
        if other.rate_limit.enabled != default_true() {
            self.rate_limit.enabled = other.rate_limit.enabled;
        }
        if other.rate_limit.trust_requester_header {
            self.rate_limit.trust_requester_header = true;
        }

        // Store
        if other.store.backend != StoreBackend::default() {
            self.store.backend = other.store.backend;
        }
        if other.store.redis_url != default_redis_url() {
            self.store.redis_url = other.store.redis_url;
        }
        if other.store.key_prefix != default_key_prefix() {
            self.store.key_prefix = other.store.key_prefix;
        }
        if other.store.op_timeout_ms != default_op_timeout_ms() {
            self.store.op_timeout_ms = other.store.op_timeout_ms;
        }
        if other.store.failure_policy != FailurePolicy::default() {
            self.store.failure_policy = other.store.failure_policy;
        }

        // Monitoring
        if other.monitoring.prometheus_bind != default_prometheus_bind() {
            self.monitoring.prometheus_bind = other.monitoring.prometheus_bind;
        }
        if other.monitoring.prometheus_enabled != default_true() {
            self.monitoring.prometheus_enabled = other.monitoring.prometheus_enabled;
        }
    }
}

/// Device WebSocket server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind address
    #[serde(default = "default_device_bind")]
    pub bind: SocketAddr,

    /// Upgrade path devices connect on
    #[serde(default = "default_device_path")]
    pub path: String,

    /// Maximum concurrent device sessions
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Seconds a connection may take to complete the WebSocket upgrade
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_secs: u64,
}

fn default_device_bind() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8443))
}

fn default_device_path() -> String {
    "/device".to_string()
}

fn default_max_connections() -> usize {
    10000
}

fn default_handshake_timeout() -> u64 {
    10
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_device_bind(),
            path: default_device_path(),
            max_connections: default_max_connections(),
            handshake_timeout_secs: default_handshake_timeout(),
        }
    }
}

/// Management API configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ManagementConfig {
    #[serde(default = "default_management_bind")]
    pub bind: SocketAddr,
}

fn default_management_bind() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

impl Default for ManagementConfig {
    fn default() -> Self {
        Self {
            bind: default_management_bind(),
        }
    }
}

/// Security configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SecurityConfig {
    /// Device token HMAC secret (hex)
    #[serde(default)]
    pub device_token_secret: Option<String>,

    /// Refuse handshakes without a valid token
    ///
    /// When off, devices may connect with `?device=<id>` and are registered as
    /// `Connected` rather than `Authenticated`.
    #[serde(default = "default_true")]
    pub require_device_token: bool,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            device_token_secret: None,
            require_device_token: default_true(),
        }
    }
}

/// Login lockout configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LockConfig {
    /// Failures per threshold crossing
    #[serde(default = "default_max_unsuccessful_attempts")]
    pub max_unsuccessful_attempts: u32,

    /// Base lock period in seconds, multiplied by the number of crossings
    #[serde(default = "default_lock_interval_length")]
    pub lock_interval_length: u64,

    /// How long a failure history is remembered, in seconds
    #[serde(default = "default_lock_live_period")]
    pub lock_live_period: u64,
}

fn default_max_unsuccessful_attempts() -> u32 {
    10
}

fn default_lock_interval_length() -> u64 {
    30
}

fn default_lock_live_period() -> u64 {
    86400 // 1 day
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            max_unsuccessful_attempts: default_max_unsuccessful_attempts(),
            lock_interval_length: default_lock_interval_length(),
            lock_live_period: default_lock_live_period(),
        }
    }
}

/// Rate limiting configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    /// Counting window in seconds
    #[serde(default = "default_rate_window")]
    pub window_secs: u64,

    /// Hits allowed per window before the API answers 429
    #[serde(default = "default_max_hits")]
    pub max_hits: u64,

    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Count hits against the `x-requester-id` header instead of the peer IP
    ///
    /// Only safe behind a proxy that sets the header itself.
    #[serde(default)]
    pub trust_requester_header: bool,
}

fn default_rate_window() -> u64 {
    3600
}

fn default_max_hits() -> u64 {
    1000
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_secs: default_rate_window(),
            max_hits: default_max_hits(),
            enabled: default_true(),
            trust_requester_header: false,
        }
    }
}

/// What the HTTP layer does when the counter store is unreachable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Treat the request as not locked / not limited
    #[default]
    FailOpen,

    /// Reject the request with 503
    FailClosed,
}

/// Counter store configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,

    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    /// Namespace prepended to every key
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Per-operation timeout in milliseconds
    #[serde(default = "default_op_timeout_ms")]
    pub op_timeout_ms: u64,

    #[serde(default)]
    pub failure_policy: FailurePolicy,
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_key_prefix() -> String {
    "iotlink:".to_string()
}

fn default_op_timeout_ms() -> u64 {
    500
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            redis_url: default_redis_url(),
            key_prefix: default_key_prefix(),
            op_timeout_ms: default_op_timeout_ms(),
            failure_policy: FailurePolicy::default(),
        }
    }
}

/// Monitoring configuration
#[derive(Debug, Clone, Deserialize)]
pub struct MonitoringConfig {
    /// Prometheus metrics bind address
    #[serde(default = "default_prometheus_bind")]
    pub prometheus_bind: SocketAddr,

    /// Enable Prometheus
    #[serde(default = "default_true")]
    pub prometheus_enabled: bool,
}

fn default_prometheus_bind() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 9090))
}

fn default_true() -> bool {
    true
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            prometheus_bind: default_prometheus_bind(),
            prometheus_enabled: default_true(),
        }
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod config_tests;
