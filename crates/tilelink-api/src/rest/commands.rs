// REST command endpoints
//
// The authoritative half of every command: success here is the only
// acknowledgment a caller gets. The optimistic bridge publish lives in
// tilelink-core and never affects these results.

use serde::Serialize;
use serde_json::{Value, json};
use tracing::debug;

use crate::error::Error;
use crate::models::{
    ColorProfileCommand, OtaJob, PairingApproval, RgbwState, SetLightCommand, StartOtaRequest,
};
use crate::rest::RestClient;

/// Ack body returned by the fire-and-forget command endpoints.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct CommandAck {
    pub status: String,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Serialize)]
struct NodeTargetBody<'a> {
    site_id: &'a str,
    node_id: &'a str,
}

impl RestClient {
    /// Set a node's light state.
    ///
    /// `POST /set-light`
    pub async fn set_light(&self, command: &SetLightCommand) -> Result<CommandAck, Error> {
        debug!(node_id = %command.node_id, "setting light");
        self.post(self.endpoint("set-light"), command).await
    }

    /// Apply a color profile to a zone.
    ///
    /// `POST /color-profile`
    pub async fn send_color_profile(
        &self,
        command: &ColorProfileCommand,
    ) -> Result<CommandAck, Error> {
        debug!(zone_id = %command.zone_id, profile = %command.profile, "sending color profile");
        self.post(self.endpoint("color-profile"), command).await
    }

    /// Approve or reject a node pairing request.
    ///
    /// `POST /pairing/approve`
    pub async fn approve_pairing(&self, approval: &PairingApproval) -> Result<CommandAck, Error> {
        debug!(node_id = %approval.node_id, approve = approval.approve, "resolving pairing");
        self.post(self.endpoint("pairing/approve"), approval).await
    }

    // ── OTA ──────────────────────────────────────────────────────────

    /// Start an OTA firmware update.
    ///
    /// `POST /ota/start`
    pub async fn start_ota(&self, request: &StartOtaRequest) -> Result<OtaJob, Error> {
        debug!(target_id = %request.target_id, version = %request.version, "starting OTA");
        self.post(self.endpoint("ota/start"), request).await
    }

    /// Get the status of an OTA job.
    ///
    /// `GET /ota/status?job_id={id}`
    pub async fn ota_status(&self, job_id: &str) -> Result<OtaJob, Error> {
        let mut url = self.endpoint("ota/status");
        url.query_pairs_mut().append_pair("job_id", job_id);
        self.get(url).await
    }

    // ── /api/v1 node commands ────────────────────────────────────────

    /// Assign a node to a zone.
    ///
    /// `PUT /api/v1/node/zone`
    pub async fn set_node_zone(
        &self,
        site_id: &str,
        coordinator_id: &str,
        node_id: &str,
        zone_id: &str,
    ) -> Result<CommandAck, Error> {
        self.put(
            self.v1_endpoint("node/zone"),
            &json!({
                "site_id": site_id,
                "coordinator_id": coordinator_id,
                "node_id": node_id,
                "zone_id": zone_id,
            }),
        )
        .await
    }

    /// Rename a node.
    ///
    /// `PUT /api/v1/node/name`
    pub async fn set_node_name(
        &self,
        site_id: &str,
        coordinator_id: &str,
        node_id: &str,
        name: &str,
    ) -> Result<CommandAck, Error> {
        self.put(
            self.v1_endpoint("node/name"),
            &json!({
                "site_id": site_id,
                "coordinator_id": coordinator_id,
                "node_id": node_id,
                "name": name,
            }),
        )
        .await
    }

    /// Send a test color to a node.
    ///
    /// `POST /api/v1/node/test-color`
    pub async fn send_node_color(
        &self,
        site_id: &str,
        node_id: &str,
        rgbw: RgbwState,
    ) -> Result<CommandAck, Error> {
        self.post(
            self.v1_endpoint("node/test-color"),
            &json!({
                "site_id": site_id,
                "node_id": node_id,
                "r": rgbw.r,
                "g": rgbw.g,
                "b": rgbw.b,
                "w": rgbw.w,
            }),
        )
        .await
    }

    /// Set a node's brightness.
    ///
    /// `POST /api/v1/node/brightness`
    pub async fn set_node_brightness(
        &self,
        site_id: &str,
        node_id: &str,
        brightness: u8,
    ) -> Result<CommandAck, Error> {
        self.post(
            self.v1_endpoint("node/brightness"),
            &json!({
                "site_id": site_id,
                "node_id": node_id,
                "brightness": brightness,
            }),
        )
        .await
    }

    /// Turn a node's light off.
    ///
    /// `POST /api/v1/node/off`
    pub async fn node_off(&self, site_id: &str, node_id: &str) -> Result<CommandAck, Error> {
        self.post(
            self.v1_endpoint("node/off"),
            &NodeTargetBody { site_id, node_id },
        )
        .await
    }

    // ── /api/v1 coordinator commands ─────────────────────────────────

    /// Put a coordinator into pairing mode.
    ///
    /// `POST /api/v1/coordinator/pair`
    pub async fn pair_coordinator(
        &self,
        site_id: &str,
        coord_id: &str,
        enable: bool,
    ) -> Result<CommandAck, Error> {
        self.post(
            self.v1_endpoint("coordinator/pair"),
            &json!({
                "site_id": site_id,
                "coord_id": coord_id,
                "enable": enable,
            }),
        )
        .await
    }

    /// Restart a coordinator.
    ///
    /// `POST /api/v1/coordinator/restart`
    pub async fn restart_coordinator(
        &self,
        site_id: &str,
        coord_id: &str,
    ) -> Result<CommandAck, Error> {
        debug!(coord_id, "restarting coordinator");
        self.post(
            self.v1_endpoint("coordinator/restart"),
            &json!({
                "site_id": site_id,
                "coord_id": coord_id,
            }),
        )
        .await
    }

    /// Update a coordinator's WiFi credentials.
    ///
    /// `POST /api/v1/coordinator/wifi`
    pub async fn set_coordinator_wifi(
        &self,
        site_id: &str,
        coord_id: &str,
        ssid: &str,
        password: &str,
    ) -> Result<CommandAck, Error> {
        self.post(
            self.v1_endpoint("coordinator/wifi"),
            &json!({
                "site_id": site_id,
                "coord_id": coord_id,
                "ssid": ssid,
                "password": password,
            }),
        )
        .await
    }

    // ── /api/v1 settings ─────────────────────────────────────────────

    /// Fetch backend settings as an opaque document.
    ///
    /// `GET /api/v1/settings`
    pub async fn get_settings(&self) -> Result<Value, Error> {
        self.get(self.v1_endpoint("settings")).await
    }

    /// Replace backend settings.
    ///
    /// `PUT /api/v1/settings`
    pub async fn save_settings(&self, settings: &Value) -> Result<CommandAck, Error> {
        self.put(self.v1_endpoint("settings"), settings).await
    }
}
