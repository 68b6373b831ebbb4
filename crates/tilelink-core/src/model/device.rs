// ── Device records ──
//
// One record per node or coordinator, created lazily on first sighting
// and updated in place for the rest of the session. Records are never
// deleted; a device that goes quiet simply stops updating.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tilelink_api::models::{
    Coordinator, CoordinatorTelemetry, DeviceStatus, Node, NodeTelemetry, RgbwState,
};

// ── NodeRecord ───────────────────────────────────────────────────────

/// Canonical cache-owned state of one light node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub node_id: String,
    pub site_id: Option<String>,
    pub zone_id: Option<String>,
    pub name: Option<String>,
    pub mac_address: Option<String>,
    pub paired: bool,
    pub status: DeviceStatus,

    // Light state
    pub rgbw: Option<RgbwState>,
    pub brightness: Option<u8>,

    // Sensor readings
    pub temperature: Option<f64>,
    pub battery_voltage: Option<f64>,
    /// Always clamped to `[0, 100]`.
    pub battery_percent: Option<f64>,

    pub firmware_version: Option<String>,
    pub last_seen: DateTime<Utc>,
}

impl NodeRecord {
    /// Build a fresh record from a first telemetry sighting.
    ///
    /// Unseen ids come online implicitly; fields the frame did not carry
    /// stay unset.
    pub fn from_telemetry(telemetry: &NodeTelemetry, seen_at: DateTime<Utc>) -> Self {
        Self {
            node_id: telemetry.node_id.clone(),
            site_id: telemetry.site_id.clone(),
            zone_id: None,
            name: None,
            mac_address: None,
            paired: false,
            status: DeviceStatus::Online,
            rgbw: telemetry.rgbw,
            brightness: telemetry.brightness,
            temperature: telemetry.temperature,
            battery_voltage: telemetry.battery_voltage,
            battery_percent: telemetry.battery_percent,
            firmware_version: None,
            last_seen: seen_at,
        }
    }

    /// Merge a telemetry frame into this record.
    ///
    /// Telemetry implies the node is online. Fields absent from the frame
    /// keep their previous values.
    pub fn apply_telemetry(&mut self, telemetry: &NodeTelemetry, seen_at: DateTime<Utc>) {
        self.status = DeviceStatus::Online;
        self.last_seen = seen_at;
        if telemetry.site_id.is_some() {
            self.site_id.clone_from(&telemetry.site_id);
        }
        if telemetry.rgbw.is_some() {
            self.rgbw = telemetry.rgbw;
        }
        if telemetry.brightness.is_some() {
            self.brightness = telemetry.brightness;
        }
        if telemetry.temperature.is_some() {
            self.temperature = telemetry.temperature;
        }
        if telemetry.battery_voltage.is_some() {
            self.battery_voltage = telemetry.battery_voltage;
        }
        if telemetry.battery_percent.is_some() {
            self.battery_percent = telemetry.battery_percent;
        }
    }
}

impl From<Node> for NodeRecord {
    fn from(node: Node) -> Self {
        Self {
            node_id: node.node_id,
            site_id: Some(node.site_id),
            zone_id: node.zone_id,
            name: node.name,
            mac_address: Some(node.mac_address),
            paired: node.paired,
            status: node.status,
            rgbw: node.rgbw,
            brightness: node.brightness,
            temperature: node.temperature,
            battery_voltage: node.battery_voltage,
            battery_percent: node.battery_percent.map(|p| p.clamp(0.0, 100.0)),
            firmware_version: node.firmware_version,
            last_seen: node.last_seen.unwrap_or_else(Utc::now),
        }
    }
}

// ── CoordinatorRecord ────────────────────────────────────────────────

/// Canonical cache-owned state of one coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinatorRecord {
    pub coord_id: String,
    pub site_id: Option<String>,
    pub mac_address: Option<String>,
    pub wifi_ssid: Option<String>,
    pub status: DeviceStatus,

    // Sensor readings
    pub wifi_rssi: Option<i32>,
    pub light_lux: Option<f64>,
    pub temp_c: Option<f64>,
    pub heap_free: Option<u64>,
    pub uptime: Option<u64>,

    pub firmware_version: Option<String>,
    pub last_seen: DateTime<Utc>,
}

impl CoordinatorRecord {
    /// Build a fresh record from a first telemetry sighting.
    pub fn from_telemetry(telemetry: &CoordinatorTelemetry, seen_at: DateTime<Utc>) -> Self {
        Self {
            coord_id: telemetry.coord_id.clone(),
            site_id: telemetry.site_id.clone(),
            mac_address: None,
            wifi_ssid: None,
            status: DeviceStatus::Online,
            wifi_rssi: telemetry.wifi_rssi,
            light_lux: telemetry.light_lux,
            temp_c: telemetry.temp_c,
            heap_free: telemetry.heap_free,
            uptime: telemetry.uptime,
            firmware_version: None,
            last_seen: seen_at,
        }
    }

    /// Merge a telemetry frame into this record.
    pub fn apply_telemetry(&mut self, telemetry: &CoordinatorTelemetry, seen_at: DateTime<Utc>) {
        self.status = DeviceStatus::Online;
        self.last_seen = seen_at;
        if telemetry.site_id.is_some() {
            self.site_id.clone_from(&telemetry.site_id);
        }
        if telemetry.wifi_rssi.is_some() {
            self.wifi_rssi = telemetry.wifi_rssi;
        }
        if telemetry.light_lux.is_some() {
            self.light_lux = telemetry.light_lux;
        }
        if telemetry.temp_c.is_some() {
            self.temp_c = telemetry.temp_c;
        }
        if telemetry.heap_free.is_some() {
            self.heap_free = telemetry.heap_free;
        }
        if telemetry.uptime.is_some() {
            self.uptime = telemetry.uptime;
        }
    }
}

impl From<Coordinator> for CoordinatorRecord {
    fn from(coordinator: Coordinator) -> Self {
        Self {
            coord_id: coordinator.coord_id,
            site_id: Some(coordinator.site_id),
            mac_address: Some(coordinator.mac_address),
            wifi_ssid: coordinator.wifi_ssid,
            status: coordinator.status,
            wifi_rssi: coordinator.wifi_rssi,
            light_lux: coordinator.light_lux,
            temp_c: coordinator.temp_c,
            heap_free: coordinator.heap_free,
            uptime: coordinator.uptime,
            firmware_version: coordinator.firmware_version,
            last_seen: coordinator.last_seen.unwrap_or_else(Utc::now),
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn telemetry(node_id: &str) -> NodeTelemetry {
        NodeTelemetry {
            node_id: node_id.into(),
            site_id: Some("site001".into()),
            rgbw: Some(RgbwState { r: 10, g: 20, b: 30, w: 0 }),
            brightness: Some(200),
            temperature: Some(21.0),
            battery_voltage: Some(3.8),
            battery_percent: Some(66.0),
            timestamp: None,
        }
    }

    #[test]
    fn first_sighting_comes_online() {
        let record = NodeRecord::from_telemetry(&telemetry("n1"), Utc::now());
        assert_eq!(record.status, DeviceStatus::Online);
        assert_eq!(record.node_id, "n1");
        assert!(record.zone_id.is_none());
        assert!(!record.paired);
    }

    #[test]
    fn merge_keeps_fields_the_frame_omitted() {
        let mut record = NodeRecord::from_telemetry(&telemetry("n1"), Utc::now());
        record.status = DeviceStatus::Offline;

        let sparse = NodeTelemetry {
            node_id: "n1".into(),
            site_id: None,
            rgbw: None,
            brightness: None,
            temperature: Some(25.5),
            battery_voltage: None,
            battery_percent: None,
            timestamp: None,
        };
        record.apply_telemetry(&sparse, Utc::now());

        assert_eq!(record.status, DeviceStatus::Online);
        assert_eq!(record.temperature, Some(25.5));
        // Untouched by the sparse frame:
        assert_eq!(record.rgbw, Some(RgbwState { r: 10, g: 20, b: 30, w: 0 }));
        assert_eq!(record.battery_percent, Some(66.0));
        assert_eq!(record.site_id.as_deref(), Some("site001"));
    }

    #[test]
    fn rest_seed_clamps_battery_percent() {
        let node = Node {
            id: "x".into(),
            node_id: "n1".into(),
            name: None,
            site_id: "site001".into(),
            zone_id: None,
            mac_address: "aa:bb:cc:dd:ee:01".into(),
            paired: true,
            status: DeviceStatus::Online,
            rgbw: None,
            brightness: None,
            temperature: None,
            battery_voltage: None,
            battery_percent: Some(130.0),
            firmware_version: None,
            last_seen: None,
        };
        let record = NodeRecord::from(node);
        assert_eq!(record.battery_percent, Some(100.0));
    }
}
