//! Connection state and reconnection policy shared by both WebSocket channels.
//!
//! The delay curve is linear with a hard cap, not exponential:
//! `delay = base_delay * min(attempts, 5)`. The dashboard family of tools
//! has always reconnected on this curve and operators time their
//! expectations around it, so it is preserved verbatim.

use std::time::Duration;

// ── ChannelState ─────────────────────────────────────────────────────

/// Observable state of one WebSocket channel.
///
/// Owned by the channel's run loop; consumers watch it through a
/// `tokio::sync::watch` receiver. Reset to the connected form (attempts
/// zeroed, error cleared) on every successful open.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelState {
    pub connected: bool,
    pub connecting: bool,
    pub last_error: Option<String>,
    pub reconnect_attempts: u32,
}

impl ChannelState {
    /// Tri-state summary for connection widgets: connected beats
    /// connecting beats errored/idle.
    pub fn is_usable(&self) -> bool {
        self.connected
    }
}

// ── ReconnectConfig ──────────────────────────────────────────────────

/// Reconnection tuning for a WebSocket channel.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Base delay unit; the first retry waits exactly this long. Default: 5s.
    pub base_delay: Duration,

    /// Ceiling on reconnection attempts before the channel gives up
    /// and surfaces a terminal error. Default: 10.
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(5000),
            max_attempts: 10,
        }
    }
}

// ── Delay curve ──────────────────────────────────────────────────────

/// Delay before reconnection attempt number `attempt` (1-based).
///
/// Linear growth capped at five times the base delay.
pub(crate) fn reconnect_delay(attempt: u32, config: &ReconnectConfig) -> Duration {
    config.base_delay * attempt.min(5)
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = ReconnectConfig::default();
        assert_eq!(config.base_delay, Duration::from_millis(5000));
        assert_eq!(config.max_attempts, 10);
    }

    #[test]
    fn delay_grows_linearly_for_first_five_attempts() {
        let config = ReconnectConfig {
            base_delay: Duration::from_millis(100),
            max_attempts: 10,
        };

        for attempt in 1..=5 {
            assert_eq!(
                reconnect_delay(attempt, &config),
                Duration::from_millis(100) * attempt,
                "attempt {attempt}"
            );
        }
    }

    #[test]
    fn delay_caps_at_five_times_base() {
        let config = ReconnectConfig {
            base_delay: Duration::from_millis(100),
            max_attempts: 20,
        };

        assert_eq!(reconnect_delay(6, &config), Duration::from_millis(500));
        assert_eq!(reconnect_delay(19, &config), Duration::from_millis(500));
    }

    #[test]
    fn default_state_is_idle() {
        let state = ChannelState::default();
        assert!(!state.connected);
        assert!(!state.connecting);
        assert!(state.last_error.is_none());
        assert_eq!(state.reconnect_attempts, 0);
        assert!(!state.is_usable());
    }
}
