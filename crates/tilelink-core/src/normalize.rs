// ── Inbound payload normalization ──
//
// The bridge channel relays payloads exactly as firmware published them
// (snake_case, sometimes raw millivolts), while the direct channel
// re-serializes through the backend (camelCase in places, light state
// nested under `light`). Every known alias is enumerated here, once, and
// mapped to the canonical wire structs before any business logic runs.
// Nothing outside this module reads raw payload fields.

use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;

use tilelink_api::models::{
    CoordinatorTelemetry, DeviceStatus, EntityKind, NodeTelemetry, PairingNotice, PairingPhase,
    PresenceEvent, RgbwState, StatusChange,
};

// ── Battery derivation ───────────────────────────────────────────────

/// Empirical discharge range of the node's LiPo cell, in millivolts.
const BATTERY_EMPTY_MV: f64 = 3000.0;
const BATTERY_FULL_MV: f64 = 4200.0;

/// Linear percentage over the empirical millivolt range, clamped to
/// `[0, 100]`.
pub fn battery_percent_from_mv(millivolts: f64) -> f64 {
    ((millivolts - BATTERY_EMPTY_MV) / (BATTERY_FULL_MV - BATTERY_EMPTY_MV) * 100.0)
        .clamp(0.0, 100.0)
}

// ── Classification ───────────────────────────────────────────────────

/// A telemetry frame after normalization.
#[derive(Debug, Clone, PartialEq)]
pub enum Telemetry {
    Node(NodeTelemetry),
    Coordinator(CoordinatorTelemetry),
}

/// Normalize a raw telemetry payload from either channel.
///
/// Coordinator identity fields win over node identity fields when both
/// could structurally match. Returns `None` when no identity field is
/// present at all.
pub fn normalize_telemetry(raw: &Value) -> Option<Telemetry> {
    if let Some(coordinator) = normalize_coordinator_telemetry(raw) {
        return Some(Telemetry::Coordinator(coordinator));
    }
    normalize_node_telemetry(raw).map(Telemetry::Node)
}

/// Normalize node telemetry. `None` when the node id is missing.
pub fn normalize_node_telemetry(raw: &Value) -> Option<NodeTelemetry> {
    let node_id = str_field(raw, &["node_id", "nodeId"])?;

    let battery_voltage = f64_field(raw, &["battery_voltage", "batteryVoltage"])
        .or_else(|| f64_field(raw, &["vbat_mv", "vbatMv"]).map(|mv| mv / 1000.0));

    let battery_percent = f64_field(raw, &["battery_percent", "batteryPercent"])
        .map(|p| p.clamp(0.0, 100.0))
        .or_else(|| battery_voltage.map(|volts| battery_percent_from_mv(volts * 1000.0)));

    Some(NodeTelemetry {
        node_id: node_id.to_owned(),
        site_id: str_field(raw, &["site_id", "siteId"]).map(str::to_owned),
        rgbw: rgbw_field(raw),
        brightness: u8_field(raw, &["brightness"]),
        temperature: f64_field(raw, &["temperature", "temp_c", "tempC"]),
        battery_voltage,
        battery_percent,
        timestamp: timestamp_field(raw),
    })
}

/// Normalize coordinator telemetry. `None` when the coordinator id is
/// missing.
pub fn normalize_coordinator_telemetry(raw: &Value) -> Option<CoordinatorTelemetry> {
    let coord_id = str_field(raw, &["coord_id", "coordinator_id", "coordId"])?;

    Some(CoordinatorTelemetry {
        coord_id: coord_id.to_owned(),
        site_id: str_field(raw, &["site_id", "siteId"]).map(str::to_owned),
        uptime: u64_field(raw, &["uptime", "uptime_s"]),
        heap_free: u64_field(raw, &["heap_free", "heapFree", "free_heap"]),
        wifi_rssi: i32_field(raw, &["wifi_rssi", "wifiRssi", "rssi"]),
        mqtt_connected: bool_field(raw, &["mqtt_connected", "mqttConnected"]),
        light_lux: f64_field(raw, &["light_lux", "lightLux", "lux"]),
        temp_c: f64_field(raw, &["temp_c", "tempC", "temperature"]),
        timestamp: timestamp_field(raw),
    })
}

/// Normalize a presence event. `None` when zone or site id is missing.
pub fn normalize_presence(raw: &Value) -> Option<PresenceEvent> {
    let zone_id = str_field(raw, &["zone_id", "zoneId"])?;
    let site_id = str_field(raw, &["site_id", "siteId"])?;
    let presence = bool_field(raw, &["presence", "present"])?;

    Some(PresenceEvent {
        zone_id: zone_id.to_owned(),
        site_id: site_id.to_owned(),
        presence,
        distance: f64_field(raw, &["distance", "distance_mm"]),
        timestamp: timestamp_field(raw).unwrap_or_else(Utc::now),
    })
}

/// Normalize a connectivity status change.
pub fn normalize_status(raw: &Value) -> Option<StatusChange> {
    let entity_id = str_field(raw, &["entity_id", "entityId"])?;
    let entity_type = match str_field(raw, &["entity_type", "entityType"])? {
        "node" => EntityKind::Node,
        "coordinator" | "coord" => EntityKind::Coordinator,
        other => {
            tracing::debug!(entity_type = other, "unknown entity type in status event");
            return None;
        }
    };
    let status = match str_field(raw, &["status"])? {
        "online" => DeviceStatus::Online,
        "offline" => DeviceStatus::Offline,
        "error" => DeviceStatus::Error,
        "pairing" => DeviceStatus::Pairing,
        other => {
            tracing::debug!(status = other, "unknown status in status event");
            return None;
        }
    };

    Some(StatusChange {
        entity_id: entity_id.to_owned(),
        entity_type,
        status,
    })
}

/// Normalize a pairing notice.
pub fn normalize_pairing(raw: &Value) -> Option<PairingNotice> {
    let node_id = str_field(raw, &["node_id", "nodeId"])?;
    let mac_address = str_field(raw, &["mac_address", "macAddress", "mac"])?;
    let status = match str_field(raw, &["status"])? {
        "requesting" => PairingPhase::Requesting,
        "approved" => PairingPhase::Approved,
        "rejected" => PairingPhase::Rejected,
        other => {
            tracing::debug!(status = other, "unknown pairing phase");
            return None;
        }
    };

    Some(PairingNotice {
        node_id: node_id.to_owned(),
        mac_address: mac_address.to_owned(),
        status,
    })
}

// ── Field extraction helpers ─────────────────────────────────────────

fn str_field<'a>(raw: &'a Value, aliases: &[&str]) -> Option<&'a str> {
    aliases.iter().find_map(|key| raw.get(key)?.as_str())
}

fn f64_field(raw: &Value, aliases: &[&str]) -> Option<f64> {
    aliases.iter().find_map(|key| raw.get(key)?.as_f64())
}

fn u64_field(raw: &Value, aliases: &[&str]) -> Option<u64> {
    aliases.iter().find_map(|key| raw.get(key)?.as_u64())
}

fn i32_field(raw: &Value, aliases: &[&str]) -> Option<i32> {
    aliases
        .iter()
        .find_map(|key| raw.get(key)?.as_i64())
        .and_then(|v| i32::try_from(v).ok())
}

fn u8_field(raw: &Value, aliases: &[&str]) -> Option<u8> {
    aliases
        .iter()
        .find_map(|key| raw.get(key)?.as_u64())
        .map(|v| u8::try_from(v.min(255)).unwrap_or(u8::MAX))
}

fn bool_field(raw: &Value, aliases: &[&str]) -> Option<bool> {
    aliases.iter().find_map(|key| raw.get(key)?.as_bool())
}

/// RGBW arrives in one of four shapes, checked in order:
/// an `rgbw` object, `light.rgbw`, a `light` object carrying the channels
/// directly, or flat `r`/`g`/`b`/`w` keys at the payload root.
fn rgbw_field(raw: &Value) -> Option<RgbwState> {
    raw.get("rgbw")
        .and_then(rgbw_from_object)
        .or_else(|| raw.get("light").and_then(|l| l.get("rgbw")).and_then(rgbw_from_object))
        .or_else(|| raw.get("light").and_then(rgbw_from_object))
        .or_else(|| rgbw_from_object(raw))
}

fn rgbw_from_object(value: &Value) -> Option<RgbwState> {
    let channel = |key: &str| -> Option<u8> {
        value
            .get(key)?
            .as_u64()
            .map(|v| u8::try_from(v.min(255)).unwrap_or(u8::MAX))
    };
    Some(RgbwState {
        r: channel("r")?,
        g: channel("g")?,
        b: channel("b")?,
        w: channel("w")?,
    })
}

/// Timestamps arrive as ISO-8601 strings or epoch milliseconds.
fn timestamp_field(raw: &Value) -> Option<DateTime<Utc>> {
    let value = raw.get("timestamp").or_else(|| raw.get("ts"))?;
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        Value::Number(n) => n
            .as_i64()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        _ => None,
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    // ── Battery ──────────────────────────────────────────────────────

    #[test]
    fn battery_percent_is_linear_over_range() {
        assert_eq!(battery_percent_from_mv(3600.0), 50.0);
        assert_eq!(battery_percent_from_mv(3000.0), 0.0);
        assert_eq!(battery_percent_from_mv(4200.0), 100.0);
    }

    #[test]
    fn battery_percent_clamps_outside_range() {
        assert_eq!(battery_percent_from_mv(2400.0), 0.0);
        assert_eq!(battery_percent_from_mv(2999.9), 0.0);
        assert_eq!(battery_percent_from_mv(4800.0), 100.0);
    }

    #[test]
    fn battery_percent_derived_from_millivolts_when_absent() {
        let raw = json!({ "node_id": "n1", "vbat_mv": 3600 });
        let t = normalize_node_telemetry(&raw).expect("telemetry");
        assert_eq!(t.battery_voltage, Some(3.6));
        assert_eq!(t.battery_percent, Some(50.0));
    }

    #[test]
    fn explicit_battery_percent_wins_but_is_clamped() {
        let raw = json!({ "node_id": "n1", "vbat_mv": 3600, "battery_percent": 120.0 });
        let t = normalize_node_telemetry(&raw).expect("telemetry");
        assert_eq!(t.battery_percent, Some(100.0));
    }

    // ── Node aliases ─────────────────────────────────────────────────

    #[test]
    fn node_snake_case_shape() {
        let raw = json!({
            "node_id": "n1",
            "site_id": "site001",
            "rgbw": { "r": 255, "g": 0, "b": 0, "w": 0 },
            "temperature": 21.5,
            "battery_voltage": 3.9,
            "battery_percent": 75.0,
            "timestamp": "2026-03-01T10:00:00Z"
        });

        let t = normalize_node_telemetry(&raw).expect("telemetry");
        assert_eq!(t.node_id, "n1");
        assert_eq!(t.site_id.as_deref(), Some("site001"));
        assert_eq!(t.rgbw, Some(RgbwState { r: 255, g: 0, b: 0, w: 0 }));
        assert_eq!(t.temperature, Some(21.5));
        assert!(t.timestamp.is_some());
    }

    #[test]
    fn node_camel_case_shape() {
        let raw = json!({
            "nodeId": "n1",
            "siteId": "site001",
            "batteryVoltage": 3.9,
            "batteryPercent": 75.0,
            "tempC": 19.0
        });

        let t = normalize_node_telemetry(&raw).expect("telemetry");
        assert_eq!(t.node_id, "n1");
        assert_eq!(t.site_id.as_deref(), Some("site001"));
        assert_eq!(t.battery_voltage, Some(3.9));
        assert_eq!(t.temperature, Some(19.0));
    }

    #[test]
    fn rgbw_nested_under_light_object() {
        let raw = json!({
            "node_id": "n1",
            "light": { "rgbw": { "r": 1, "g": 2, "b": 3, "w": 4 }, "brightness": 80 }
        });
        let t = normalize_node_telemetry(&raw).expect("telemetry");
        assert_eq!(t.rgbw, Some(RgbwState { r: 1, g: 2, b: 3, w: 4 }));
    }

    #[test]
    fn rgbw_light_object_with_flat_channels() {
        let raw = json!({
            "node_id": "n1",
            "light": { "r": 5, "g": 6, "b": 7, "w": 8 }
        });
        let t = normalize_node_telemetry(&raw).expect("telemetry");
        assert_eq!(t.rgbw, Some(RgbwState { r: 5, g: 6, b: 7, w: 8 }));
    }

    #[test]
    fn rgbw_flat_at_root() {
        let raw = json!({ "node_id": "n1", "r": 0, "g": 0, "b": 0, "w": 255 });
        let t = normalize_node_telemetry(&raw).expect("telemetry");
        assert_eq!(t.rgbw, Some(RgbwState { r: 0, g: 0, b: 0, w: 255 }));
    }

    #[test]
    fn rgbw_oversized_channels_saturate() {
        let raw = json!({ "node_id": "n1", "rgbw": { "r": 300, "g": 0, "b": 0, "w": 0 } });
        let t = normalize_node_telemetry(&raw).expect("telemetry");
        assert_eq!(t.rgbw.map(|c| c.r), Some(255));
    }

    // ── Classification ───────────────────────────────────────────────

    #[test]
    fn coordinator_identity_wins_over_node_identity() {
        let raw = json!({ "coord_id": "c1", "node_id": "n1", "wifi_rssi": -61 });
        match normalize_telemetry(&raw) {
            Some(Telemetry::Coordinator(c)) => {
                assert_eq!(c.coord_id, "c1");
                assert_eq!(c.wifi_rssi, Some(-61));
            }
            other => panic!("expected coordinator telemetry, got {other:?}"),
        }
    }

    #[test]
    fn coordinator_alias_shapes() {
        for raw in [
            json!({ "coordinator_id": "c1", "heap_free": 43000 }),
            json!({ "coordId": "c1", "heapFree": 43000 }),
            json!({ "coord_id": "c1", "free_heap": 43000 }),
        ] {
            match normalize_telemetry(&raw) {
                Some(Telemetry::Coordinator(c)) => {
                    assert_eq!(c.coord_id, "c1");
                    assert_eq!(c.heap_free, Some(43000));
                }
                other => panic!("expected coordinator telemetry, got {other:?}"),
            }
        }
    }

    #[test]
    fn missing_identity_is_rejected() {
        let raw = json!({ "temperature": 20.0, "rgbw": { "r": 1, "g": 2, "b": 3, "w": 4 } });
        assert!(normalize_telemetry(&raw).is_none());
    }

    #[test]
    fn epoch_millis_timestamp() {
        let raw = json!({ "node_id": "n1", "timestamp": 1_765_000_000_000_i64 });
        let t = normalize_node_telemetry(&raw).expect("telemetry");
        assert_eq!(
            t.timestamp.map(|ts| ts.timestamp_millis()),
            Some(1_765_000_000_000)
        );
    }

    // ── Presence / status / pairing ──────────────────────────────────

    #[test]
    fn presence_both_casings() {
        let snake = json!({ "zone_id": "z1", "site_id": "s1", "presence": true, "distance": 1.8 });
        let camel = json!({ "zoneId": "z1", "siteId": "s1", "present": false });

        let a = normalize_presence(&snake).expect("presence");
        assert!(a.presence);
        assert_eq!(a.distance, Some(1.8));

        let b = normalize_presence(&camel).expect("presence");
        assert!(!b.presence);
        assert!(b.distance.is_none());
    }

    #[test]
    fn status_change_maps_entity_and_status() {
        let raw = json!({ "entity_id": "c1", "entity_type": "coordinator", "status": "offline" });
        let change = normalize_status(&raw).expect("status");
        assert_eq!(change.entity_type, EntityKind::Coordinator);
        assert_eq!(change.status, DeviceStatus::Offline);

        let bad = json!({ "entity_id": "c1", "entity_type": "gateway", "status": "offline" });
        assert!(normalize_status(&bad).is_none());
    }

    #[test]
    fn pairing_notice_with_mac_alias() {
        let raw = json!({ "nodeId": "n9", "mac": "aa:bb:cc:dd:ee:09", "status": "requesting" });
        let notice = normalize_pairing(&raw).expect("pairing");
        assert_eq!(notice.node_id, "n9");
        assert_eq!(notice.status, PairingPhase::Requesting);
    }
}
