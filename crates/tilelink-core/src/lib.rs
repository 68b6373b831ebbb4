// tilelink-core: Reactive data layer between tilelink-api and consumers.

pub mod command;
pub mod config;
pub mod error;
pub mod hub;
pub mod model;
pub mod normalize;
pub mod store;
pub mod stream;

// ── Primary re-exports ──────────────────────────────────────────────
pub use command::{Command, CommandResult};
pub use config::HubConfig;
pub use error::CoreError;
pub use hub::{DataHub, SystemHealth};
pub use store::DeviceCache;
pub use stream::EntityStream;

// Re-export model types at the crate root for ergonomics.
pub use model::{CoordinatorRecord, NodeRecord};

// Wire types consumers routinely touch.
pub use tilelink_api::models::{
    ColorProfile, ColorProfileCommand, Coordinator, CoordinatorTelemetry, DeviceStatus,
    EntityKind, HealthState, HealthStatus, MmwaveFrame, MmwaveTarget, Node, NodeTelemetry,
    OtaJob, OtaStatus, PairingApproval, PairingNotice, PairingPhase, PresenceEvent, RgbwState,
    SetLightCommand, Site, StartOtaRequest, StatusChange, Zone,
};
pub use tilelink_api::{ChannelState, ReconnectConfig};
