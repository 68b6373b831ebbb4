// ── Filter predicates for entity streams ──
//
// Used by dashboard views to filter snapshots without re-querying.

use tilelink_api::models::DeviceStatus;

use crate::model::{CoordinatorRecord, NodeRecord};

/// Filter predicate for node collections.
pub enum NodeFilter {
    All,
    ByStatus(DeviceStatus),
    ByZone(String),
    BySite(String),
    Online,
    Offline,
    LowBattery(f64),
    Custom(Box<dyn Fn(&NodeRecord) -> bool + Send + Sync>),
}

impl NodeFilter {
    pub fn matches(&self, node: &NodeRecord) -> bool {
        match self {
            Self::All => true,
            Self::ByStatus(status) => node.status == *status,
            Self::ByZone(zone_id) => node.zone_id.as_deref() == Some(zone_id),
            Self::BySite(site_id) => node.site_id.as_deref() == Some(site_id),
            Self::Online => node.status == DeviceStatus::Online,
            Self::Offline => node.status == DeviceStatus::Offline,
            Self::LowBattery(threshold) => {
                node.battery_percent.is_some_and(|p| p <= *threshold)
            }
            Self::Custom(f) => f(node),
        }
    }
}

/// Filter predicate for coordinator collections.
pub enum CoordinatorFilter {
    All,
    ByStatus(DeviceStatus),
    BySite(String),
    Online,
    Custom(Box<dyn Fn(&CoordinatorRecord) -> bool + Send + Sync>),
}

impl CoordinatorFilter {
    pub fn matches(&self, coordinator: &CoordinatorRecord) -> bool {
        match self {
            Self::All => true,
            Self::ByStatus(status) => coordinator.status == *status,
            Self::BySite(site_id) => coordinator.site_id.as_deref() == Some(site_id),
            Self::Online => coordinator.status == DeviceStatus::Online,
            Self::Custom(f) => f(coordinator),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn node(status: DeviceStatus, battery: Option<f64>) -> NodeRecord {
        NodeRecord {
            node_id: "n1".into(),
            site_id: Some("site001".into()),
            zone_id: Some("z1".into()),
            name: None,
            mac_address: None,
            paired: true,
            status,
            rgbw: None,
            brightness: None,
            temperature: None,
            battery_voltage: None,
            battery_percent: battery,
            firmware_version: None,
            last_seen: Utc::now(),
        }
    }

    #[test]
    fn status_and_zone_filters() {
        let online = node(DeviceStatus::Online, Some(80.0));
        assert!(NodeFilter::Online.matches(&online));
        assert!(!NodeFilter::Offline.matches(&online));
        assert!(NodeFilter::ByZone("z1".into()).matches(&online));
        assert!(!NodeFilter::ByZone("z2".into()).matches(&online));
    }

    #[test]
    fn low_battery_filter() {
        assert!(NodeFilter::LowBattery(30.0).matches(&node(DeviceStatus::Online, Some(22.0))));
        assert!(!NodeFilter::LowBattery(30.0).matches(&node(DeviceStatus::Online, Some(65.0))));
        assert!(!NodeFilter::LowBattery(30.0).matches(&node(DeviceStatus::Online, None)));
    }

    #[test]
    fn custom_filter() {
        let warm = NodeFilter::Custom(Box::new(|n| n.temperature.is_some_and(|t| t > 30.0)));
        assert!(!warm.matches(&node(DeviceStatus::Online, None)));
    }
}
