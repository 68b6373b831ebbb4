//! Runtime configuration for tilelink hosts.
//!
//! The dashboard family configures itself from the runtime environment,
//! not from config files: `API_URL`, `WS_URL`, `MQTT_WS_URL`, and the
//! reconnect/timeout knobs. This crate reads those variables (with the
//! same defaults the hosted dashboard ships with), validates them, and
//! hands `tilelink_core` a ready [`HubConfig`]. It also owns tracing
//! subscriber setup so every host logs the same way.

use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Serialized},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use tilelink_core::{HubConfig, ReconnectConfig};

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── Environment variables ───────────────────────────────────────────

const ENV_KEYS: &[&str] = &[
    "API_URL",
    "WS_URL",
    "MQTT_WS_URL",
    "AUTH_TOKEN",
    "WS_RECONNECT_DELAY",
    "WS_MAX_RECONNECT_ATTEMPTS",
    "API_TIMEOUT",
    "HEALTH_CHECK_INTERVAL",
];

/// Raw runtime settings as read from the environment.
///
/// Durations are in milliseconds, matching how the backend deployment
/// scripts have always expressed them.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RuntimeSettings {
    /// REST base URL.
    pub api_url: String,

    /// Direct-channel WebSocket URL.
    pub ws_url: String,

    /// Bridge-channel WebSocket URL (MQTT proxy).
    pub mqtt_ws_url: String,

    /// Optional bearer token for the REST surface.
    pub auth_token: Option<String>,

    /// Base reconnect delay in milliseconds.
    pub ws_reconnect_delay: u64,

    /// Reconnection attempt ceiling.
    pub ws_max_reconnect_attempts: u32,

    /// REST request timeout in milliseconds.
    pub api_timeout: u64,

    /// Health poll interval in milliseconds. Zero disables polling.
    pub health_check_interval: u64,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:8000".into(),
            ws_url: "ws://localhost:8000/ws".into(),
            mqtt_ws_url: "ws://localhost:8000/mqtt".into(),
            auth_token: None,
            ws_reconnect_delay: 5000,
            ws_max_reconnect_attempts: 10,
            api_timeout: 30_000,
            health_check_interval: 30_000,
        }
    }
}

impl RuntimeSettings {
    /// Load settings: shipped defaults overridden by environment
    /// variables (`API_URL`, `WS_URL`, `MQTT_WS_URL`, ...).
    pub fn load() -> Result<Self, ConfigError> {
        let settings = Figment::from(Serialized::defaults(Self::default()))
            .merge(Env::raw().only(ENV_KEYS))
            .extract()?;
        Ok(settings)
    }

    /// Validate and translate into a [`HubConfig`].
    pub fn into_hub_config(self) -> Result<HubConfig, ConfigError> {
        let parse = |field: &str, value: &str| -> Result<Url, ConfigError> {
            Url::parse(value).map_err(|e| ConfigError::Validation {
                field: field.to_owned(),
                reason: e.to_string(),
            })
        };

        let api_url = parse("api_url", &self.api_url)?;
        let ws_url = parse("ws_url", &self.ws_url)?;
        let bridge_ws_url = parse("mqtt_ws_url", &self.mqtt_ws_url)?;

        if self.ws_max_reconnect_attempts == 0 {
            return Err(ConfigError::Validation {
                field: "ws_max_reconnect_attempts".into(),
                reason: "must be at least 1".into(),
            });
        }

        Ok(HubConfig {
            api_url,
            ws_url,
            bridge_ws_url,
            auth_token: self.auth_token.map(SecretString::from),
            request_timeout: Duration::from_millis(self.api_timeout),
            reconnect: ReconnectConfig {
                base_delay: Duration::from_millis(self.ws_reconnect_delay),
                max_attempts: self.ws_max_reconnect_attempts,
            },
            health_check_interval: Duration::from_millis(self.health_check_interval),
            ..HubConfig::default()
        })
    }
}

/// One-call convenience: environment → validated [`HubConfig`].
pub fn load_hub_config() -> Result<HubConfig, ConfigError> {
    RuntimeSettings::load()?.into_hub_config()
}

// ── Tracing setup ───────────────────────────────────────────────────

/// Initialize the global tracing subscriber.
///
/// Respects `RUST_LOG`; defaults to `info`. Calling it twice is safe --
/// the second call is a no-op.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_shipped_dashboard() {
        let settings = RuntimeSettings::default();
        assert_eq!(settings.api_url, "http://localhost:8000");
        assert_eq!(settings.ws_url, "ws://localhost:8000/ws");
        assert_eq!(settings.mqtt_ws_url, "ws://localhost:8000/mqtt");
        assert_eq!(settings.ws_reconnect_delay, 5000);
        assert_eq!(settings.ws_max_reconnect_attempts, 10);
    }

    #[test]
    fn environment_overrides_defaults() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("API_URL", "https://tiles.example.com");
            jail.set_env("WS_RECONNECT_DELAY", "250");
            jail.set_env("WS_MAX_RECONNECT_ATTEMPTS", "4");

            let settings = RuntimeSettings::load().expect("load");
            assert_eq!(settings.api_url, "https://tiles.example.com");
            assert_eq!(settings.ws_reconnect_delay, 250);
            assert_eq!(settings.ws_max_reconnect_attempts, 4);
            // Untouched vars keep defaults.
            assert_eq!(settings.mqtt_ws_url, "ws://localhost:8000/mqtt");
            Ok(())
        });
    }

    #[test]
    fn hub_config_translation() {
        let settings = RuntimeSettings {
            auth_token: Some("tok".into()),
            ws_reconnect_delay: 1000,
            ..RuntimeSettings::default()
        };

        let config = settings.into_hub_config().expect("config");
        assert_eq!(config.api_url.as_str(), "http://localhost:8000/");
        assert_eq!(config.reconnect.base_delay, Duration::from_millis(1000));
        assert_eq!(config.reconnect.max_attempts, 10);
        assert!(config.auth_token.is_some());
    }

    #[test]
    fn invalid_url_is_rejected_with_field_name() {
        let settings = RuntimeSettings {
            api_url: "not a url".into(),
            ..RuntimeSettings::default()
        };

        match settings.into_hub_config() {
            Err(ConfigError::Validation { field, .. }) => assert_eq!(field, "api_url"),
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn zero_attempt_ceiling_is_rejected() {
        let settings = RuntimeSettings {
            ws_max_reconnect_attempts: 0,
            ..RuntimeSettings::default()
        };
        assert!(settings.into_hub_config().is_err());
    }
}
