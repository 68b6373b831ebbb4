// tilelink-api: Async Rust client for the tilelink backend (REST + WebSocket channels)

pub mod bridge;
pub mod direct;
pub mod error;
pub mod models;
pub mod reconnect;
pub mod rest;
pub mod topic;
pub mod transport;

pub use error::Error;
pub use reconnect::{ChannelState, ReconnectConfig};
pub use rest::RestClient;
