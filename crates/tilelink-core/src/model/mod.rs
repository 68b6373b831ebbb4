// ── Cache-owned domain model ──
//
// Long-lived device records reconciled from REST seeds and live
// telemetry. Wire shapes live in `tilelink_api::models`; these are what
// the cache owns and consumers observe.

mod device;

pub use device::{CoordinatorRecord, NodeRecord};
