//! Observable connection state.

use serde::Serialize;

use overlay_chat_protocol::Presence;

/// Connection state of the gateway client.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Not connected, and not trying to connect
    #[default]
    Disconnected,
    /// `connect` was called and the first handshake has not finished
    Connecting,
    /// Handshake accepted by the gateway
    Connected,
}

impl ConnectionState {
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything an observer can read about the client at one instant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewaySnapshot {
    pub state: ConnectionState,
    /// Human-readable description of the most recent failure or disconnect.
    pub last_error: Option<String>,
    pub presence: Presence,
    /// Reconnect attempts since the last successful connect (0 when healthy).
    pub reconnect_attempt: u32,
}

impl GatewaySnapshot {
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn is_connecting(&self) -> bool {
        self.state == ConnectionState::Connecting
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_snapshot_is_idle() {
        let snapshot = GatewaySnapshot::default();
        assert_eq!(snapshot.state, ConnectionState::Disconnected);
        assert_eq!(snapshot.last_error, None);
        assert_eq!(snapshot.presence, Presence::default());
        assert!(!snapshot.is_connected());
        assert!(!snapshot.is_connecting());
    }

    #[test]
    fn state_helpers() {
        let snapshot = GatewaySnapshot {
            state: ConnectionState::Connecting,
            ..GatewaySnapshot::default()
        };
        assert!(snapshot.is_connecting());
        assert_eq!(ConnectionState::Connected.to_string(), "connected");
    }

    #[test]
    fn serializes_for_ui_bindings() {
        let snapshot = GatewaySnapshot {
            state: ConnectionState::Connected,
            last_error: None,
            presence: Presence::new(3, 5_000),
            reconnect_attempt: 0,
        };
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["state"], "connected");
        assert_eq!(json["presence"]["participantCount"], 3);
        assert_eq!(json["reconnectAttempt"], 0);
    }
}
