// ── Command API ──
//
// All write operations flow through a unified `Command` enum. The hub
// routes each variant to its REST endpoint -- the backend is the source
// of truth for acknowledgment -- and, when the bridge channel happens to
// be connected, mirrors light-control commands as best-effort broker
// publishes for lower-latency feedback. No command retries.

use tilelink_api::models::{
    ColorProfileCommand, OtaJob, PairingApproval, RgbwState, SetLightCommand, StartOtaRequest,
};

/// All write operations against the tilelink backend.
#[derive(Debug, Clone)]
pub enum Command {
    // ── Light control ────────────────────────────────────────────────
    SetLight(SetLightCommand),
    SetColorProfile(ColorProfileCommand),
    SetNodeColor {
        site_id: String,
        node_id: String,
        rgbw: RgbwState,
    },
    SetNodeBrightness {
        site_id: String,
        node_id: String,
        brightness: u8,
    },
    NodeOff {
        site_id: String,
        node_id: String,
    },

    // ── Device management ────────────────────────────────────────────
    ApprovePairing(PairingApproval),
    SetNodeZone {
        site_id: String,
        coordinator_id: String,
        node_id: String,
        zone_id: String,
    },
    SetNodeName {
        site_id: String,
        coordinator_id: String,
        node_id: String,
        name: String,
    },
    PairCoordinator {
        site_id: String,
        coord_id: String,
        enable: bool,
    },
    RestartCoordinator {
        site_id: String,
        coord_id: String,
    },
    SetCoordinatorWifi {
        site_id: String,
        coord_id: String,
        ssid: String,
        password: String,
    },

    // ── Firmware ─────────────────────────────────────────────────────
    StartOta(StartOtaRequest),
}

/// Result of a command execution.
#[derive(Debug)]
pub enum CommandResult {
    Ok,
    Ota(OtaJob),
}
