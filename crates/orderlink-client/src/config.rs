//! Application configuration.
//!
//! Loaded from a TOML file and overlaid with `ORDERLINK__SECTION__KEY`
//! environment variables. Every tunable has a serde default, so an empty
//! file (or no file) yields a usable configuration apart from the identity.

use crate::error::{AppError, AppResult};
use orderlink_core::{Identity, Role};
use orderlink_sync::{
    SyncConfig, DEFAULT_COMMAND_TIMEOUT_MS, DEFAULT_MAX_PAGES, DEFAULT_PAGE_SIZE,
};
use orderlink_ws::ConnectionConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Environment variable naming the config file.
pub const CONFIG_PATH_ENV: &str = "ORDERLINK_CONFIG";
/// Prefix for per-key environment overrides.
pub const ENV_PREFIX: &str = "ORDERLINK";
const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Identity the client binds the channel to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    #[serde(default = "default_role")]
    pub role: Role,
    #[serde(default)]
    pub id: String,
}

fn default_role() -> Role {
    Role::Buyer
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            role: default_role(),
            id: String::new(),
        }
    }
}

/// Channel connection tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionSettings {
    #[serde(default = "default_reconnect_base_delay_ms")]
    pub reconnect_base_delay_ms: u64,
    #[serde(default = "default_reconnect_max_delay_ms")]
    pub reconnect_max_delay_ms: u64,
    #[serde(default = "default_reconnect_jitter_ms")]
    pub reconnect_jitter_ms: u64,
    /// Idle time before a liveness ping (ms).
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    /// Pong deadline (ms). Missing it forces a reconnect.
    #[serde(default = "default_heartbeat_timeout_ms")]
    pub heartbeat_timeout_ms: u64,
}

fn default_reconnect_base_delay_ms() -> u64 {
    1_000
}

fn default_reconnect_max_delay_ms() -> u64 {
    30_000
}

fn default_reconnect_jitter_ms() -> u64 {
    1_000
}

fn default_heartbeat_interval_ms() -> u64 {
    25_000
}

fn default_heartbeat_timeout_ms() -> u64 {
    10_000
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            reconnect_base_delay_ms: default_reconnect_base_delay_ms(),
            reconnect_max_delay_ms: default_reconnect_max_delay_ms(),
            reconnect_jitter_ms: default_reconnect_jitter_ms(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            heartbeat_timeout_ms: default_heartbeat_timeout_ms(),
        }
    }
}

/// Application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Channel endpoint.
    #[serde(default = "default_ws_url")]
    pub ws_url: String,
    /// REST base URL (`{base}/orders`).
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    /// Ack deadline for cancellation commands (ms).
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,
    #[serde(default = "default_reconcile_page_size")]
    pub reconcile_page_size: u32,
    #[serde(default = "default_reconcile_max_pages")]
    pub reconcile_max_pages: u32,
    #[serde(default = "default_http_timeout_ms")]
    pub http_timeout_ms: u64,
    /// How often the run loop logs a health sample (ms).
    #[serde(default = "default_status_interval_ms")]
    pub status_interval_ms: u64,
    #[serde(default)]
    pub identity: IdentityConfig,
    #[serde(default)]
    pub connection: ConnectionSettings,
}

fn default_ws_url() -> String {
    "ws://127.0.0.1:3000/ws".to_string()
}

fn default_api_base_url() -> String {
    "http://127.0.0.1:3000/api".to_string()
}

fn default_command_timeout_ms() -> u64 {
    DEFAULT_COMMAND_TIMEOUT_MS
}

fn default_reconcile_page_size() -> u32 {
    DEFAULT_PAGE_SIZE
}

fn default_reconcile_max_pages() -> u32 {
    DEFAULT_MAX_PAGES
}

fn default_http_timeout_ms() -> u64 {
    10_000
}

fn default_status_interval_ms() -> u64 {
    30_000
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            ws_url: default_ws_url(),
            api_base_url: default_api_base_url(),
            identity: IdentityConfig::default(),
            connection: ConnectionSettings::default(),
            command_timeout_ms: default_command_timeout_ms(),
            reconcile_page_size: default_reconcile_page_size(),
            reconcile_max_pages: default_reconcile_max_pages(),
            http_timeout_ms: default_http_timeout_ms(),
            status_interval_ms: default_status_interval_ms(),
        }
    }
}

impl AppConfig {
    /// Resolve the config path (`explicit` > `ORDERLINK_CONFIG` > default) and load it.
    pub fn load(explicit: Option<&str>) -> AppResult<Self> {
        let path = explicit
            .map(str::to_string)
            .or_else(|| std::env::var(CONFIG_PATH_ENV).ok())
            .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());

        if !Path::new(&path).exists() {
            tracing::warn!(path = %path, "Config file not found, using defaults and environment");
        }
        Self::from_file(&path)
    }

    /// Load from `path` (optional) layered with environment overrides.
    pub fn from_file(path: &str) -> AppResult<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::new(path, config::FileFormat::Toml).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| AppError::Config(format!("Failed to read config: {e}")))?;

        settings
            .try_deserialize()
            .map_err(|e| AppError::Config(format!("Failed to parse config: {e}")))
    }

    /// Parse TOML text without environment overrides.
    pub fn from_toml(content: &str) -> AppResult<Self> {
        toml::from_str(content)
            .map_err(|e| AppError::Config(format!("Failed to parse config: {e}")))
    }

    /// The configured identity.
    pub fn identity(&self) -> AppResult<Identity> {
        Ok(Identity::new(self.identity.role, self.identity.id.clone())?)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_millis(self.http_timeout_ms)
    }

    /// Sanity checks that would otherwise surface as confusing runtime behavior.
    pub fn validate(&self) -> AppResult<()> {
        if self.ws_url.trim().is_empty() {
            return Err(AppError::Config("ws_url must be set".to_string()));
        }
        if self.api_base_url.trim().is_empty() {
            return Err(AppError::Config("api_base_url must be set".to_string()));
        }
        if self.connection.reconnect_base_delay_ms > self.connection.reconnect_max_delay_ms {
            return Err(AppError::Config(
                "reconnect_base_delay_ms exceeds reconnect_max_delay_ms".to_string(),
            ));
        }
        if self.command_timeout_ms == 0 {
            return Err(AppError::Config("command_timeout_ms must be > 0".to_string()));
        }
        Ok(())
    }

    /// Sync client configuration derived from this file.
    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            connection: ConnectionConfig {
                url: self.ws_url.clone(),
                reconnect_base_delay_ms: self.connection.reconnect_base_delay_ms,
                reconnect_max_delay_ms: self.connection.reconnect_max_delay_ms,
                reconnect_jitter_ms: self.connection.reconnect_jitter_ms,
                heartbeat_interval_ms: self.connection.heartbeat_interval_ms,
                heartbeat_timeout_ms: self.connection.heartbeat_timeout_ms,
                ..ConnectionConfig::default()
            },
            command_timeout_ms: self.command_timeout_ms,
            reconcile_page_size: self.reconcile_page_size,
            reconcile_max_pages: self.reconcile_max_pages,
            ..SyncConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.command_timeout_ms, 10_000);
        assert_eq!(config.identity.role, Role::Buyer);
        assert!(config.validate().is_ok());
        // No id configured yet.
        assert!(config.identity().is_err());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = AppConfig::from_toml(
            r#"
            ws_url = "wss://shop.example.com/ws"
            command_timeout_ms = 5000

            [identity]
            id = "B1"

            [connection]
            heartbeat_interval_ms = 15000
            "#,
        )
        .unwrap();

        assert_eq!(config.identity().unwrap().room_key(), "buyer:B1");
        assert_eq!(config.connection.heartbeat_interval_ms, 15_000);
        assert_eq!(config.connection.heartbeat_timeout_ms, 10_000);

        let sync = config.sync_config();
        assert_eq!(sync.connection.url, "wss://shop.example.com/ws");
        assert_eq!(sync.command_timeout_ms, 5_000);
        assert_eq!(sync.reconcile_page_size, DEFAULT_PAGE_SIZE);
    }

    #[test]
    fn test_validate_rejects_inverted_backoff() {
        let mut config = AppConfig::default();
        config.connection.reconnect_base_delay_ms = 60_000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let config = AppConfig::from_file("does/not/exist.toml").unwrap();
        assert_eq!(config.reconcile_max_pages, DEFAULT_MAX_PAGES);
    }

    #[test]
    fn test_config_serialization() {
        let toml_str = toml::to_string(&AppConfig::default()).unwrap();
        assert!(toml_str.contains("ws_url"));
        assert!(toml_str.contains("[connection]"));
    }
}
