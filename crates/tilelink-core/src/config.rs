// ── Runtime connection configuration ──
//
// These types describe *how* to reach the tilelink backend. They carry
// endpoint URLs and connection tuning, but never touch disk -- the host
// application (or tilelink-config, from environment variables) constructs
// a `HubConfig` and hands it in.

use std::time::Duration;

use secrecy::SecretString;
use url::Url;

use tilelink_api::ReconnectConfig;
use tilelink_api::transport::TlsMode;

/// Configuration for one `DataHub` instance.
///
/// Built by the host application, passed to `DataHub::new` -- core never
/// reads config files or the process environment.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// REST base URL (e.g. `http://localhost:8000`).
    pub api_url: Url,
    /// Direct-channel WebSocket URL (typed envelopes).
    pub ws_url: Url,
    /// Bridge-channel WebSocket URL (MQTT tunnelling).
    pub bridge_ws_url: Url,
    /// Optional bearer token for the REST surface.
    pub auth_token: Option<SecretString>,
    /// TLS verification strategy for HTTPS endpoints.
    pub tls: TlsMode,
    /// REST request timeout.
    pub request_timeout: Duration,
    /// Reconnection tuning shared by both WebSocket channels.
    pub reconnect: ReconnectConfig,
    /// How often to poll `GET /health`. Zero disables the poller.
    pub health_check_interval: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            api_url: Url::parse("http://localhost:8000").expect("default api url"),
            ws_url: Url::parse("ws://localhost:8000/ws").expect("default ws url"),
            bridge_ws_url: Url::parse("ws://localhost:8000/mqtt").expect("default bridge url"),
            auth_token: None,
            tls: TlsMode::System,
            request_timeout: Duration::from_secs(30),
            reconnect: ReconnectConfig::default(),
            health_check_interval: Duration::from_secs(30),
        }
    }
}
