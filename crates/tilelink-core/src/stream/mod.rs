// ── Reactive entity streams ──
//
// Subscription types for consuming device-record changes from the
// DeviceCache. Because the cache suppresses liveness-only updates, every
// item a stream yields corresponds to a change worth re-rendering.

mod filter;

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_core::Stream;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

pub use filter::{CoordinatorFilter, NodeFilter};

/// A subscription to a collection of device records.
///
/// Provides both point-in-time snapshot access and reactive change
/// notification via the `changed()` method or by converting to a `Stream`.
pub struct EntityStream<T: Clone + Send + Sync + 'static> {
    current: Arc<Vec<Arc<T>>>,
    receiver: watch::Receiver<Arc<Vec<Arc<T>>>>,
}

impl<T: Clone + Send + Sync + 'static> EntityStream<T> {
    pub(crate) fn new(receiver: watch::Receiver<Arc<Vec<Arc<T>>>>) -> Self {
        let current = receiver.borrow().clone();
        Self { current, receiver }
    }

    /// Get the snapshot captured at creation time.
    pub fn current(&self) -> &Arc<Vec<Arc<T>>> {
        &self.current
    }

    /// Get the latest snapshot (may have changed since creation).
    pub fn latest(&self) -> Arc<Vec<Arc<T>>> {
        self.receiver.borrow().clone()
    }

    /// Wait for the next change, returning the new snapshot.
    /// Returns `None` if the sender (DeviceCache) has been dropped.
    pub async fn changed(&mut self) -> Option<Arc<Vec<Arc<T>>>> {
        self.receiver.changed().await.ok()?;
        let snap = self.receiver.borrow_and_update().clone();
        self.current = snap.clone();
        Some(snap)
    }

    /// Convert into a `Stream` for use with `StreamExt` combinators.
    pub fn into_stream(self) -> EntityWatchStream<T> {
        EntityWatchStream {
            inner: WatchStream::new(self.receiver),
        }
    }
}

/// `Stream` adapter backed by a `watch::Receiver`.
///
/// Yields a new `Arc<Vec<Arc<T>>>` snapshot each time the underlying
/// collection is meaningfully mutated.
pub struct EntityWatchStream<T: Clone + Send + Sync + 'static> {
    inner: WatchStream<Arc<Vec<Arc<T>>>>,
}

impl<T: Clone + Send + Sync + 'static> Stream for EntityWatchStream<T> {
    type Item = Arc<Vec<Arc<T>>>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        // WatchStream is Unpin when the inner type is Unpin.
        // Arc<Vec<Arc<T>>> is always Unpin, so this is safe.
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::DeviceCache;
    use serde_json::json;
    use std::time::Duration;

    #[tokio::test]
    async fn changed_yields_snapshot_on_meaningful_update() {
        let cache = DeviceCache::new();
        let mut stream = EntityStream::new(cache.subscribe_nodes());
        assert!(stream.current().is_empty());

        cache.ingest_telemetry(&json!({ "node_id": "n1", "temperature": 20.0 }));

        let snap = stream.changed().await.expect("cache alive");
        assert_eq!(snap.len(), 1);
        assert_eq!(stream.latest().len(), 1);
    }

    #[tokio::test]
    async fn heartbeat_does_not_wake_the_stream() {
        let cache = DeviceCache::new();
        let frame = json!({ "node_id": "n1", "temperature": 20.0 });
        cache.ingest_telemetry(&frame);

        let mut stream = EntityStream::new(cache.subscribe_nodes());
        // Identical frame: liveness only, no snapshot replacement.
        cache.ingest_telemetry(&frame);

        let woken = tokio::time::timeout(Duration::from_millis(100), stream.changed()).await;
        assert!(woken.is_err(), "liveness-only update must not wake observers");
    }
}
