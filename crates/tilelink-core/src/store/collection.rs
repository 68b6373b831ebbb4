// ── Generic reactive device collection ──
//
// Lock-free concurrent storage with O(1) lookups and push-based change
// notification via `watch` channels. The snapshot is copy-on-write: every
// notifying mutation publishes a fresh `Arc`, so observers detect change
// by reference identity alone.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::watch;

/// A reactive collection for a single device kind, keyed by device id.
pub(crate) struct DeviceCollection<T: Clone + Send + Sync + 'static> {
    by_id: DashMap<String, Arc<T>>,

    /// Version counter, bumped on every notifying mutation.
    version: watch::Sender<u64>,

    /// Full snapshot, rebuilt on notifying mutation.
    snapshot: watch::Sender<Arc<Vec<Arc<T>>>>,
}

impl<T: Clone + Send + Sync + 'static> DeviceCollection<T> {
    pub(crate) fn new() -> Self {
        let (version, _) = watch::channel(0u64);
        let (snapshot, _) = watch::channel(Arc::new(Vec::new()));

        Self {
            by_id: DashMap::new(),
            version,
            snapshot,
        }
    }

    /// Insert or update a record and notify observers.
    /// Returns `true` if the id was new.
    pub(crate) fn upsert(&self, id: String, record: T) -> bool {
        let is_new = !self.by_id.contains_key(&id);
        self.by_id.insert(id, Arc::new(record));

        self.rebuild_snapshot();
        self.bump_version();

        is_new
    }

    /// Replace a record WITHOUT notifying observers.
    ///
    /// Used for liveness-only updates: the stored record advances (e.g.
    /// `last_seen`) but the published snapshot keeps its identity, so
    /// reference-equality change detection downstream stays quiet.
    pub(crate) fn replace_quiet(&self, id: String, record: T) {
        self.by_id.insert(id, Arc::new(record));
    }

    /// Look up a record by device id.
    pub(crate) fn get(&self, id: &str) -> Option<Arc<T>> {
        self.by_id.get(id).map(|r| Arc::clone(r.value()))
    }

    /// Get the current snapshot (cheap `Arc` clone).
    pub(crate) fn snapshot(&self) -> Arc<Vec<Arc<T>>> {
        self.snapshot.borrow().clone()
    }

    /// Subscribe to snapshot changes via a `watch::Receiver`.
    pub(crate) fn subscribe(&self) -> watch::Receiver<Arc<Vec<Arc<T>>>> {
        self.snapshot.subscribe()
    }

    /// Subscribe to the version counter (one bump per meaningful change).
    pub(crate) fn subscribe_version(&self) -> watch::Receiver<u64> {
        self.version.subscribe()
    }

    pub(crate) fn len(&self) -> usize {
        self.by_id.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    // ── Private helpers ──────────────────────────────────────────────

    /// Collect all values into a snapshot vec and broadcast to subscribers.
    fn rebuild_snapshot(&self) {
        let values: Vec<Arc<T>> = self.by_id.iter().map(|r| Arc::clone(r.value())).collect();
        // `send_modify` updates unconditionally, even with zero receivers.
        self.snapshot.send_modify(|snap| *snap = Arc::new(values));
    }

    fn bump_version(&self) {
        self.version.send_modify(|v| *v += 1);
    }
}
