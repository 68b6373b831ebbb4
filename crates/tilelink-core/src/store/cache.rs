// ── Reconciling device cache ──
//
// The single process-wide sink for inbound telemetry, presence, and
// status events, from whichever channel happens to deliver them. Records
// are created lazily on first sighting, merged in place afterwards, and
// never deleted for the lifetime of the session.
//
// High-frequency telemetry mostly repeats itself. To keep observers from
// re-rendering on every heartbeat, a merge that changes nothing the UI
// can see only advances the record's `last_seen` and skips the snapshot
// rebuild entirely.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::watch;

use tilelink_api::models::{EntityKind, PresenceEvent, StatusChange};

use super::collection::DeviceCollection;
use crate::model::{CoordinatorRecord, NodeRecord};
use crate::normalize::{Telemetry, normalize_telemetry};

/// Bounded capacity of the presence history ring.
pub const PRESENCE_CAPACITY: usize = 100;

/// Central reactive store for device records and presence history.
pub struct DeviceCache {
    nodes: DeviceCollection<NodeRecord>,
    coordinators: DeviceCollection<CoordinatorRecord>,

    presence: Mutex<VecDeque<PresenceEvent>>,
    presence_snapshot: watch::Sender<Arc<Vec<PresenceEvent>>>,

    last_event: watch::Sender<Option<DateTime<Utc>>>,
}

impl DeviceCache {
    pub fn new() -> Self {
        let (presence_snapshot, _) = watch::channel(Arc::new(Vec::new()));
        let (last_event, _) = watch::channel(None);

        Self {
            nodes: DeviceCollection::new(),
            coordinators: DeviceCollection::new(),
            presence: Mutex::new(VecDeque::with_capacity(PRESENCE_CAPACITY)),
            presence_snapshot,
            last_event,
        }
    }

    // ── Telemetry ingestion ──────────────────────────────────────────

    /// Fold a raw telemetry payload into the cache.
    ///
    /// The payload is normalized first (field aliases, battery
    /// derivation); a coordinator identity wins when both kinds of id are
    /// present. Malformed frames are logged and dropped -- no error ever
    /// propagates out of ingestion.
    pub fn ingest_telemetry(&self, raw: &Value) {
        match normalize_telemetry(raw) {
            Some(Telemetry::Node(telemetry)) => self.merge_node(&telemetry),
            Some(Telemetry::Coordinator(telemetry)) => self.merge_coordinator(&telemetry),
            None => {
                tracing::warn!(payload = %raw, "telemetry frame missing identity field, dropping");
            }
        }
        self.mark_event();
    }

    fn merge_node(&self, telemetry: &tilelink_api::models::NodeTelemetry) {
        let now = Utc::now();

        match self.nodes.get(&telemetry.node_id) {
            None => {
                let record = NodeRecord::from_telemetry(telemetry, now);
                tracing::debug!(node_id = %record.node_id, "first sighting, creating node record");
                self.nodes.upsert(telemetry.node_id.clone(), record);
            }
            Some(existing) => {
                let mut updated = (*existing).clone();
                updated.apply_telemetry(telemetry, now);

                if node_visibly_changed(&existing, &updated) {
                    self.nodes.upsert(telemetry.node_id.clone(), updated);
                } else {
                    // Liveness only: remember the heartbeat, spare the observers.
                    self.nodes.replace_quiet(telemetry.node_id.clone(), updated);
                }
            }
        }
    }

    fn merge_coordinator(&self, telemetry: &tilelink_api::models::CoordinatorTelemetry) {
        let now = Utc::now();

        match self.coordinators.get(&telemetry.coord_id) {
            None => {
                let record = CoordinatorRecord::from_telemetry(telemetry, now);
                tracing::debug!(coord_id = %record.coord_id, "first sighting, creating coordinator record");
                self.coordinators.upsert(telemetry.coord_id.clone(), record);
            }
            Some(existing) => {
                let mut updated = (*existing).clone();
                updated.apply_telemetry(telemetry, now);

                if coordinator_visibly_changed(&existing, &updated) {
                    self.coordinators.upsert(telemetry.coord_id.clone(), updated);
                } else {
                    self.coordinators
                        .replace_quiet(telemetry.coord_id.clone(), updated);
                }
            }
        }
    }

    // ── Presence ingestion ───────────────────────────────────────────

    /// Prepend a presence event to the bounded history ring.
    ///
    /// Newest first; once the ring is full the oldest entries fall off
    /// silently.
    pub fn ingest_presence(&self, event: PresenceEvent) {
        let snapshot = {
            let mut ring = self.presence.lock().expect("presence ring poisoned");
            ring.push_front(event);
            ring.truncate(PRESENCE_CAPACITY);
            Arc::new(ring.iter().cloned().collect::<Vec<_>>())
        };
        self.presence_snapshot.send_modify(|snap| *snap = snapshot);
        self.mark_event();
    }

    // ── Status ingestion ─────────────────────────────────────────────

    /// Apply a connectivity change to an existing record.
    ///
    /// Events for ids the cache has never seen are dropped -- a bare
    /// status event is not enough to synthesize a record.
    pub fn ingest_status(&self, change: &StatusChange) {
        let now = Utc::now();

        match change.entity_type {
            EntityKind::Node => match self.nodes.get(&change.entity_id) {
                Some(existing) => {
                    let mut updated = (*existing).clone();
                    updated.status = change.status;
                    updated.last_seen = now;
                    if existing.status == change.status {
                        self.nodes.replace_quiet(change.entity_id.clone(), updated);
                    } else {
                        self.nodes.upsert(change.entity_id.clone(), updated);
                    }
                }
                None => {
                    tracing::debug!(node_id = %change.entity_id, "status event for unknown node, dropping");
                }
            },
            EntityKind::Coordinator => match self.coordinators.get(&change.entity_id) {
                Some(existing) => {
                    let mut updated = (*existing).clone();
                    updated.status = change.status;
                    updated.last_seen = now;
                    if existing.status == change.status {
                        self.coordinators
                            .replace_quiet(change.entity_id.clone(), updated);
                    } else {
                        self.coordinators.upsert(change.entity_id.clone(), updated);
                    }
                }
                None => {
                    tracing::debug!(coord_id = %change.entity_id, "status event for unknown coordinator, dropping");
                }
            },
        }
        self.mark_event();
    }

    // ── REST seeding ─────────────────────────────────────────────────

    /// Upsert a record loaded from the REST surface (always notifies).
    pub fn apply_node(&self, record: NodeRecord) {
        self.nodes.upsert(record.node_id.clone(), record);
    }

    /// Upsert a coordinator loaded from the REST surface.
    pub fn apply_coordinator(&self, record: CoordinatorRecord) {
        self.coordinators.upsert(record.coord_id.clone(), record);
    }

    // ── Snapshot accessors ───────────────────────────────────────────

    pub fn nodes_snapshot(&self) -> Arc<Vec<Arc<NodeRecord>>> {
        self.nodes.snapshot()
    }

    pub fn coordinators_snapshot(&self) -> Arc<Vec<Arc<CoordinatorRecord>>> {
        self.coordinators.snapshot()
    }

    pub fn presence_snapshot(&self) -> Arc<Vec<PresenceEvent>> {
        self.presence_snapshot.borrow().clone()
    }

    // ── Single-entity lookups ────────────────────────────────────────

    pub fn node(&self, node_id: &str) -> Option<Arc<NodeRecord>> {
        self.nodes.get(node_id)
    }

    pub fn coordinator(&self, coord_id: &str) -> Option<Arc<CoordinatorRecord>> {
        self.coordinators.get(coord_id)
    }

    // ── Count accessors ──────────────────────────────────────────────

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn coordinator_count(&self) -> usize {
        self.coordinators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.coordinators.is_empty()
    }

    // ── Subscriptions ────────────────────────────────────────────────

    pub fn subscribe_nodes(&self) -> watch::Receiver<Arc<Vec<Arc<NodeRecord>>>> {
        self.nodes.subscribe()
    }

    pub fn subscribe_coordinators(&self) -> watch::Receiver<Arc<Vec<Arc<CoordinatorRecord>>>> {
        self.coordinators.subscribe()
    }

    pub fn subscribe_presence(&self) -> watch::Receiver<Arc<Vec<PresenceEvent>>> {
        self.presence_snapshot.subscribe()
    }

    /// One bump per meaningful node change; liveness updates stay quiet.
    pub fn subscribe_node_versions(&self) -> watch::Receiver<u64> {
        self.nodes.subscribe_version()
    }

    pub fn subscribe_coordinator_versions(&self) -> watch::Receiver<u64> {
        self.coordinators.subscribe_version()
    }

    // ── Metadata ─────────────────────────────────────────────────────

    /// When the cache last saw any inbound event.
    pub fn last_event(&self) -> Option<DateTime<Utc>> {
        *self.last_event.borrow()
    }

    fn mark_event(&self) {
        let _ = self.last_event.send(Some(Utc::now()));
    }
}

impl Default for DeviceCache {
    fn default() -> Self {
        Self::new()
    }
}

// ── Change-significance policy ───────────────────────────────────────
//
// The compared field sets are a policy choice, not a law of nature: they
// cover what a dashboard actually renders. Liveness churn (last_seen,
// uptime, heap) is deliberately excluded so heartbeats stay quiet. The
// comparison is total -- plain equality on every listed field.

fn node_visibly_changed(old: &NodeRecord, new: &NodeRecord) -> bool {
    old.rgbw != new.rgbw
        || old.brightness != new.brightness
        || old.temperature != new.temperature
        || old.status != new.status
}

fn coordinator_visibly_changed(old: &CoordinatorRecord, new: &CoordinatorRecord) -> bool {
    old.status != new.status
        || old.wifi_rssi != new.wifi_rssi
        || old.light_lux != new.light_lux
        || old.temp_c != new.temp_c
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;
    use tilelink_api::models::DeviceStatus;

    fn node_frame() -> Value {
        json!({
            "node_id": "n1",
            "site_id": "site001",
            "rgbw": { "r": 255, "g": 0, "b": 0, "w": 0 },
            "temperature": 21.5,
            "vbat_mv": 3900
        })
    }

    #[test]
    fn first_telemetry_creates_online_record() {
        let cache = DeviceCache::new();
        cache.ingest_telemetry(&node_frame());

        let node = cache.node("n1").expect("record created");
        assert_eq!(node.status, DeviceStatus::Online);
        assert_eq!(node.temperature, Some(21.5));
        assert_eq!(node.battery_percent, Some(75.0));
        assert_eq!(cache.node_count(), 1);
        assert!(cache.last_event().is_some());
    }

    #[test]
    fn identical_telemetry_notifies_at_most_once() {
        let cache = DeviceCache::new();
        let versions = cache.subscribe_node_versions();

        cache.ingest_telemetry(&node_frame());
        let after_first = *versions.borrow();
        let snapshot_after_first = cache.nodes_snapshot();
        let seen_after_first = cache.node("n1").unwrap().last_seen;

        cache.ingest_telemetry(&node_frame());

        // Same RGBW, temperature, and status: no new notification...
        assert_eq!(*versions.borrow(), after_first);
        assert!(Arc::ptr_eq(&snapshot_after_first, &cache.nodes_snapshot()));
        // ...but the heartbeat still advanced liveness.
        assert!(cache.node("n1").unwrap().last_seen >= seen_after_first);
    }

    #[test]
    fn changed_rgbw_notifies_again() {
        let cache = DeviceCache::new();
        let versions = cache.subscribe_node_versions();

        cache.ingest_telemetry(&node_frame());
        let mut changed = node_frame();
        changed["rgbw"] = json!({ "r": 0, "g": 255, "b": 0, "w": 0 });
        cache.ingest_telemetry(&changed);

        assert_eq!(*versions.borrow(), 2);
        assert_eq!(cache.node("n1").unwrap().rgbw.map(|c| c.g), Some(255));
    }

    #[test]
    fn offline_node_coming_back_online_notifies() {
        let cache = DeviceCache::new();
        cache.ingest_telemetry(&node_frame());
        cache.ingest_status(&StatusChange {
            entity_id: "n1".into(),
            entity_type: EntityKind::Node,
            status: DeviceStatus::Offline,
        });
        let versions = cache.subscribe_node_versions();
        let before = *versions.borrow();

        // Identical payload, but the transition back to online is visible.
        cache.ingest_telemetry(&node_frame());
        assert_eq!(*versions.borrow(), before + 1);
        assert_eq!(cache.node("n1").unwrap().status, DeviceStatus::Online);
    }

    #[test]
    fn malformed_telemetry_is_dropped_silently() {
        let cache = DeviceCache::new();
        cache.ingest_telemetry(&json!({ "temperature": 19.0 }));
        assert!(cache.is_empty());
    }

    #[test]
    fn coordinator_telemetry_merges_and_dedups() {
        let cache = DeviceCache::new();
        let versions = cache.subscribe_coordinator_versions();
        let frame = json!({
            "coord_id": "c1",
            "site_id": "site001",
            "wifi_rssi": -58,
            "light_lux": 240.0,
            "heap_free": 41000
        });

        cache.ingest_telemetry(&frame);
        assert_eq!(*versions.borrow(), 1);

        // Heap churn alone is liveness, not a visible change.
        let mut heartbeat = frame.clone();
        heartbeat["heap_free"] = json!(40500);
        cache.ingest_telemetry(&heartbeat);
        assert_eq!(*versions.borrow(), 1);
        assert_eq!(cache.coordinator("c1").unwrap().heap_free, Some(40500));

        // RSSI movement is visible.
        let mut moved = frame;
        moved["wifi_rssi"] = json!(-71);
        cache.ingest_telemetry(&moved);
        assert_eq!(*versions.borrow(), 2);
    }

    #[test]
    fn status_for_unknown_entity_is_dropped() {
        let cache = DeviceCache::new();
        cache.ingest_status(&StatusChange {
            entity_id: "ghost".into(),
            entity_type: EntityKind::Node,
            status: DeviceStatus::Error,
        });
        assert!(cache.is_empty());
    }

    #[test]
    fn status_updates_existing_record() {
        let cache = DeviceCache::new();
        cache.ingest_telemetry(&node_frame());

        cache.ingest_status(&StatusChange {
            entity_id: "n1".into(),
            entity_type: EntityKind::Node,
            status: DeviceStatus::Error,
        });

        assert_eq!(cache.node("n1").unwrap().status, DeviceStatus::Error);
    }

    #[test]
    fn repeated_status_stays_quiet() {
        let cache = DeviceCache::new();
        cache.ingest_telemetry(&node_frame());
        let versions = cache.subscribe_node_versions();
        let before = *versions.borrow();

        cache.ingest_status(&StatusChange {
            entity_id: "n1".into(),
            entity_type: EntityKind::Node,
            status: DeviceStatus::Online,
        });

        assert_eq!(*versions.borrow(), before);
    }

    #[test]
    fn presence_ring_is_bounded_and_newest_first() {
        let cache = DeviceCache::new();

        for i in 0..105 {
            cache.ingest_presence(PresenceEvent {
                zone_id: format!("z{i}"),
                site_id: "site001".into(),
                presence: i % 2 == 0,
                distance: None,
                timestamp: Utc::now(),
            });
        }

        let history = cache.presence_snapshot();
        assert_eq!(history.len(), PRESENCE_CAPACITY);
        // Newest first; the first five (z0..z4) fell off the back.
        assert_eq!(history[0].zone_id, "z104");
        assert_eq!(history[99].zone_id, "z5");
    }

    #[test]
    fn rest_seed_always_notifies() {
        let cache = DeviceCache::new();
        let versions = cache.subscribe_node_versions();

        cache.ingest_telemetry(&node_frame());
        let node = (*cache.node("n1").unwrap()).clone();
        cache.apply_node(node);

        assert_eq!(*versions.borrow(), 2);
    }
}
