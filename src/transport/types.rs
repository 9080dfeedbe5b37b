//! Types shared by the transport backends and the session.

use serde::{Deserialize, Serialize};

/// Why a session ended without an external stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureReason {
    /// No link established within the connection timeout
    Timeout,
    /// The notify characteristic could not be subscribed
    SubscribeFailed,
    /// The notification stream ended while listening
    LinkLost,
}

/// Where a transport session is in its lifecycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    #[default]
    Idle,
    Scanning,
    Connecting,
    Connected,
    Listening,
    Failed(FailureReason),
    Stopped,
}

impl ConnectionState {
    /// Human-readable status line for this state.
    pub fn status_message(&self) -> &'static str {
        match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Scanning => "scanning for device",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Listening => "listening for sensor data",
            ConnectionState::Failed(FailureReason::Timeout) => "connection timed out",
            ConnectionState::Failed(FailureReason::SubscribeFailed) => {
                "failed to subscribe to sensor notifications"
            }
            ConnectionState::Failed(FailureReason::LinkLost) => "device disconnected",
            ConnectionState::Stopped => "stopped",
        }
    }

    /// True for states a session never leaves.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionState::Failed(_) | ConnectionState::Stopped)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.status_message())
    }
}

/// A device seen during a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    /// Advertised local name, if any
    pub name: Option<String>,
    /// Backend-specific identifier used to connect
    pub id: String,
}

impl Advertisement {
    pub fn matches(&self, name: &str) -> bool {
        self.name.as_deref() == Some(name)
    }
}

/// Errors reported by a transport backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    NoAdapter,
    Scan(String),
    Connect(String),
    Subscribe(String),
    Disconnect(String),
    Runtime(String),
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportError::NoAdapter => write!(f, "No Bluetooth adapter found"),
            TransportError::Scan(e) => write!(f, "Scan failed: {e}"),
            TransportError::Connect(e) => write!(f, "Connect failed: {e}"),
            TransportError::Subscribe(e) => write!(f, "Subscribe failed: {e}"),
            TransportError::Disconnect(e) => write!(f, "Disconnect failed: {e}"),
            TransportError::Runtime(e) => write!(f, "Runtime error: {e}"),
        }
    }
}

impl std::error::Error for TransportError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(ConnectionState::Stopped.is_terminal());
        assert!(ConnectionState::Failed(FailureReason::LinkLost).is_terminal());
        assert!(!ConnectionState::Listening.is_terminal());
        assert!(!ConnectionState::default().is_terminal());
    }

    #[test]
    fn test_advertisement_matches_exact_name() {
        let adv = Advertisement {
            name: Some("Q31(ID-B4F7)".into()),
            id: "aa".into(),
        };
        assert!(adv.matches("Q31(ID-B4F7)"));
        assert!(!adv.matches("Q31"));

        let anonymous = Advertisement {
            name: None,
            id: "bb".into(),
        };
        assert!(!anonymous.matches(""));
    }

    #[test]
    fn test_state_serializes() {
        let json = serde_json::to_string(&ConnectionState::Failed(FailureReason::Timeout)).unwrap();
        assert_eq!(json, r#"{"Failed":"Timeout"}"#);
    }
}
