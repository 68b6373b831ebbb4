// REST HTTP client
//
// Wraps `reqwest::Client` with backend-specific URL construction, bearer
// auth injection, and status/error mapping. Endpoint groups (resources,
// commands) are implemented as inherent methods via separate files to
// keep this module focused on transport mechanics.

mod commands;
mod resources;

pub use commands::CommandAck;

use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;

use crate::error::Error;
use crate::transport::TransportConfig;

/// HTTP client for the tilelink backend's REST surface.
///
/// Commands and resource reads both flow through here. The backend is the
/// single authoritative store -- this client never caches, retries, or
/// reorders requests.
pub struct RestClient {
    http: reqwest::Client,
    base_url: Url,
    auth_token: Option<SecretString>,
}

impl RestClient {
    /// Create a new REST client from a `TransportConfig`.
    ///
    /// `base_url` should be the backend root (e.g. `http://localhost:8000`).
    /// When `auth_token` is present it is sent as a bearer token on every
    /// request.
    pub fn new(
        base_url: Url,
        auth_token: Option<SecretString>,
        transport: &TransportConfig,
    ) -> Result<Self, Error> {
        let http = transport.build_client()?;
        Ok(Self {
            http,
            base_url,
            auth_token,
        })
    }

    /// Create a REST client with a pre-built `reqwest::Client`.
    pub fn with_client(http: reqwest::Client, base_url: Url) -> Self {
        Self {
            http,
            base_url,
            auth_token: None,
        }
    }

    /// The backend base URL.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    // ── URL builders ─────────────────────────────────────────────────

    /// Build a full URL for a root-level path (e.g. `sites/{id}`).
    pub(crate) fn endpoint(&self, path: &str) -> Url {
        let full = format!(
            "{}/{}",
            self.base_url.as_str().trim_end_matches('/'),
            path.trim_start_matches('/')
        );
        Url::parse(&full).expect("invalid endpoint URL")
    }

    /// Build a full URL under the `/api/v1` namespace.
    pub(crate) fn v1_endpoint(&self, path: &str) -> Url {
        self.endpoint(&format!("api/v1/{}", path.trim_start_matches('/')))
    }

    // ── Request helpers ──────────────────────────────────────────────

    /// Send a GET request and decode the JSON response.
    pub(crate) async fn get<T: DeserializeOwned>(&self, url: Url) -> Result<T, Error> {
        debug!("GET {}", url);

        let request = self.authorize(self.http.get(url));
        let resp = request.send().await.map_err(Error::Transport)?;
        Self::decode(resp).await
    }

    /// Send a POST request with a JSON body and decode the JSON response.
    pub(crate) async fn post<T: DeserializeOwned>(
        &self,
        url: Url,
        body: &impl Serialize,
    ) -> Result<T, Error> {
        debug!("POST {}", url);

        let request = self.authorize(self.http.post(url)).json(body);
        let resp = request.send().await.map_err(Error::Transport)?;
        Self::decode(resp).await
    }

    /// Send a PUT request with a JSON body and decode the JSON response.
    pub(crate) async fn put<T: DeserializeOwned>(
        &self,
        url: Url,
        body: &impl Serialize,
    ) -> Result<T, Error> {
        debug!("PUT {}", url);

        let request = self.authorize(self.http.put(url)).json(body);
        let resp = request.send().await.map_err(Error::Transport)?;
        Self::decode(resp).await
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.auth_token {
            Some(token) => request.bearer_auth(token.expose_secret()),
            None => request,
        }
    }

    /// Map non-success statuses to `Error::Api` and decode success bodies,
    /// keeping the raw body around when deserialization fails.
    async fn decode<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, Error> {
        let status = resp.status();
        let body = resp.text().await.map_err(Error::Transport)?;

        if !status.is_success() {
            return Err(Error::Api {
                message: if body.is_empty() {
                    status.to_string()
                } else {
                    body.trim().to_owned()
                },
                status: status.as_u16(),
            });
        }

        serde_json::from_str(&body).map_err(|e| Error::Deserialization {
            message: e.to_string(),
            body,
        })
    }
}
