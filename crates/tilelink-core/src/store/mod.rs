// ── Central reactive device store ──
//
// Thread-safe storage for node and coordinator records plus the recent
// presence history. Mutations that change observable state are broadcast
// to subscribers via `watch` channels; liveness-only updates stay quiet.

mod cache;
mod collection;

pub use cache::{DeviceCache, PRESENCE_CAPACITY};
