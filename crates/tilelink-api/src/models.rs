// Wire models shared by the REST surface and both WebSocket channels.
//
// Field names mirror the backend's canonical snake_case JSON. Inbound
// telemetry does NOT always arrive in this shape -- the bridge and the
// direct channel disagree on casing and nesting -- so `tilelink-core`
// normalizes raw payloads into these structs before any business logic
// runs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ── Connectivity / status enums ──────────────────────────────────────

/// Connectivity status of a node or coordinator.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DeviceStatus {
    Online,
    Offline,
    Error,
    Pairing,
}

/// Which kind of device a status event refers to.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum EntityKind {
    Node,
    Coordinator,
}

/// Backend health classification from `GET /health`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
}

// ── REST resources ───────────────────────────────────────────────────

/// A deployment site grouping coordinators and zones.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Site {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub coordinators: Vec<String>,
    #[serde(default)]
    pub zones: Vec<Zone>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// A presence zone within a site, served by one coordinator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Zone {
    #[serde(rename = "_id", default)]
    pub id: Option<String>,
    pub name: String,
    pub site_id: String,
    pub coordinator_id: String,
}

/// A coordinator as the backend stores it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Coordinator {
    #[serde(rename = "_id")]
    pub id: String,
    pub coord_id: String,
    pub site_id: String,
    pub mac_address: String,
    #[serde(default)]
    pub wifi_ssid: Option<String>,
    #[serde(default)]
    pub wifi_rssi: Option<i32>,
    #[serde(default)]
    pub firmware_version: Option<String>,
    pub status: DeviceStatus,
    #[serde(default)]
    pub uptime: Option<u64>,
    #[serde(default)]
    pub heap_free: Option<u64>,
    #[serde(default)]
    pub light_lux: Option<f64>,
    #[serde(default)]
    pub temp_c: Option<f64>,
    #[serde(default)]
    pub last_seen: Option<DateTime<Utc>>,
}

/// A light node as the backend stores it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    #[serde(rename = "_id")]
    pub id: String,
    pub node_id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub site_id: String,
    #[serde(default)]
    pub zone_id: Option<String>,
    pub mac_address: String,
    #[serde(default)]
    pub paired: bool,
    pub status: DeviceStatus,
    #[serde(default)]
    pub rgbw: Option<RgbwState>,
    #[serde(default)]
    pub brightness: Option<u8>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub battery_voltage: Option<f64>,
    #[serde(default)]
    pub battery_percent: Option<f64>,
    #[serde(default)]
    pub firmware_version: Option<String>,
    #[serde(default)]
    pub last_seen: Option<DateTime<Utc>>,
}

/// RGBW channel values for an SK6812-style pixel strip.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RgbwState {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub w: u8,
}

// ── Telemetry (canonical, post-normalization) ────────────────────────

/// Canonical node telemetry. Unset numeric fields stay `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeTelemetry {
    pub node_id: String,
    #[serde(default)]
    pub site_id: Option<String>,
    #[serde(default)]
    pub rgbw: Option<RgbwState>,
    #[serde(default)]
    pub brightness: Option<u8>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub battery_voltage: Option<f64>,
    #[serde(default)]
    pub battery_percent: Option<f64>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Canonical coordinator telemetry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinatorTelemetry {
    pub coord_id: String,
    #[serde(default)]
    pub site_id: Option<String>,
    #[serde(default)]
    pub uptime: Option<u64>,
    #[serde(default)]
    pub heap_free: Option<u64>,
    #[serde(default)]
    pub wifi_rssi: Option<i32>,
    #[serde(default)]
    pub mqtt_connected: Option<bool>,
    #[serde(default)]
    pub light_lux: Option<f64>,
    #[serde(default)]
    pub temp_c: Option<f64>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Occupancy transition for a zone, as published by a coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceEvent {
    pub zone_id: String,
    pub site_id: String,
    pub presence: bool,
    #[serde(default)]
    pub distance: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

/// Connectivity change for a single entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChange {
    pub entity_id: String,
    pub entity_type: EntityKind,
    pub status: DeviceStatus,
}

/// Pairing lifecycle notice for a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairingNotice {
    pub node_id: String,
    pub mac_address: String,
    pub status: PairingPhase,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum PairingPhase {
    Requesting,
    Approved,
    Rejected,
}

// ── mmWave radar frames ──────────────────────────────────────────────

/// One tracked target inside an mmWave frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MmwaveTarget {
    pub id: u32,
    pub distance_mm: f64,
    pub speed_cm_s: f64,
    pub position_x_mm: f64,
    pub position_y_mm: f64,
}

/// A radar frame from a coordinator's mmWave sensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MmwaveFrame {
    pub site_id: String,
    pub coordinator_id: String,
    #[serde(default)]
    pub sensor_id: Option<String>,
    pub presence: bool,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub targets: Vec<MmwaveTarget>,
    pub timestamp: DateTime<Utc>,
}

// ── OTA ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OtaJob {
    #[serde(rename = "_id", default)]
    pub id: Option<String>,
    pub job_id: String,
    pub target_type: EntityKind,
    pub target_id: String,
    pub firmware_url: String,
    pub version: String,
    pub status: OtaStatus,
    #[serde(default)]
    pub progress: Option<f64>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OtaStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartOtaRequest {
    pub target_type: EntityKind,
    pub target_id: String,
    pub firmware_url: String,
    pub version: String,
}

// ── Health ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: HealthState,
    #[serde(default)]
    pub service: Option<String>,
    #[serde(default)]
    pub database: Option<bool>,
    #[serde(default)]
    pub mqtt: Option<bool>,
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        self.status == HealthState::Healthy
    }
}

// ── Command payloads (REST bodies) ───────────────────────────────────

/// `POST /set-light` body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetLightCommand {
    pub node_id: String,
    pub site_id: String,
    #[serde(default)]
    pub rgbw: Option<RgbwState>,
    #[serde(default)]
    pub brightness: Option<u8>,
    #[serde(default)]
    pub fade_duration: Option<u64>,
}

/// `POST /color-profile` body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColorProfileCommand {
    pub zone_id: String,
    pub site_id: String,
    pub profile: ColorProfile,
    #[serde(default)]
    pub rgbw: Option<RgbwState>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ColorProfile {
    Warm,
    Cool,
    Daylight,
    Custom,
}

/// `POST /pairing/approve` body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairingApproval {
    pub node_id: String,
    pub site_id: String,
    #[serde(default)]
    pub zone_id: Option<String>,
    pub approve: bool,
}

// ── Direct-channel envelope ──────────────────────────────────────────

/// Raw envelope from the direct WebSocket channel.
///
/// `payload` stays untyped here; the router fans it out by `kind` and
/// `tilelink-core` normalizes it into the canonical structs above.
#[derive(Debug, Clone, Deserialize)]
pub struct RawEnvelope {
    #[serde(rename = "type")]
    pub kind: String,
    pub payload: Value,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

/// A typed envelope as handed to direct-channel consumers.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub kind: String,
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
}

// ── Bridge-channel frames ────────────────────────────────────────────

/// Raw frame from the bridge WebSocket (server → client).
#[derive(Debug, Clone, Deserialize)]
pub struct BridgeFrame {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub payload: Option<Value>,
    /// Epoch milliseconds; absent on older brokers.
    #[serde(default)]
    pub timestamp: Option<i64>,
}

/// A delivered broker message after demultiplexing.
#[derive(Debug, Clone)]
pub struct BridgeMessage {
    pub topic: String,
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
}

/// A parse failure surfaced on a channel's error stream.
#[derive(Debug, Clone)]
pub struct ChannelError {
    pub message: String,
    pub raw: Option<String>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn device_status_round_trip() {
        let s: DeviceStatus = serde_json::from_str("\"pairing\"").unwrap();
        assert_eq!(s, DeviceStatus::Pairing);
        assert_eq!(s.to_string(), "pairing");
        assert_eq!(serde_json::to_string(&s).unwrap(), "\"pairing\"");
    }

    #[test]
    fn node_deserializes_with_sparse_fields() {
        let json = serde_json::json!({
            "_id": "65a1",
            "node_id": "n1",
            "site_id": "site001",
            "mac_address": "aa:bb:cc:dd:ee:01",
            "status": "online"
        });

        let node: Node = serde_json::from_value(json).unwrap();
        assert_eq!(node.node_id, "n1");
        assert!(!node.paired);
        assert!(node.rgbw.is_none());
        assert!(node.last_seen.is_none());
    }

    #[test]
    fn bridge_frame_without_timestamp() {
        let frame: BridgeFrame = serde_json::from_str(
            r#"{"type":"message","topic":"site/s1/node/n1/telemetry","payload":{"x":1}}"#,
        )
        .unwrap();
        assert_eq!(frame.kind, "message");
        assert_eq!(frame.topic.as_deref(), Some("site/s1/node/n1/telemetry"));
        assert!(frame.timestamp.is_none());
    }

    #[test]
    fn raw_envelope_with_iso_timestamp() {
        let env: RawEnvelope = serde_json::from_str(
            r#"{"type":"status","payload":{"entity_id":"n1"},"timestamp":"2026-03-01T10:00:00Z"}"#,
        )
        .unwrap();
        assert_eq!(env.kind, "status");
        assert!(env.timestamp.is_some());
    }
}
