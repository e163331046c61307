use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of one managed server process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerState {
    Booting,
    Available,
    Starting,
    Started,
    Stopping,
    Stopped,
    Failed,
    MaxFailed,
}

impl ServerState {
    /// Whether a server reconnecting in this state should be launched again
    pub fn is_restart_on_reconnect(self) -> bool {
        matches!(
            self,
            ServerState::Booting
                | ServerState::Available
                | ServerState::Starting
                | ServerState::Failed
        )
    }

    /// STOPPED and MAX_FAILED end an incarnation
    pub fn is_terminal(self) -> bool {
        matches!(self, ServerState::Stopped | ServerState::MaxFailed)
    }

    /// Status reported for a tracked server in this state
    pub fn status(self) -> ServerStatus {
        match self {
            ServerState::Booting | ServerState::Available | ServerState::Starting => {
                ServerStatus::Starting
            }
            ServerState::Started => ServerStatus::Started,
            ServerState::Stopping => ServerStatus::Stopping,
            ServerState::Stopped => ServerStatus::Stopped,
            ServerState::Failed | ServerState::MaxFailed => ServerStatus::Failed,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ServerState::Booting => "BOOTING",
            ServerState::Available => "AVAILABLE",
            ServerState::Starting => "STARTING",
            ServerState::Started => "STARTED",
            ServerState::Stopping => "STOPPING",
            ServerState::Stopped => "STOPPED",
            ServerState::Failed => "FAILED",
            ServerState::MaxFailed => "MAX_FAILED",
        }
    }
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse status reported to operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerStatus {
    DoesNotExist,
    Disabled,
    Stopped,
    Starting,
    Started,
    Stopping,
    Failed,
}

impl fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ServerStatus::DoesNotExist => "DOES_NOT_EXIST",
            ServerStatus::Disabled => "DISABLED",
            ServerStatus::Stopped => "STOPPED",
            ServerStatus::Starting => "STARTING",
            ServerStatus::Started => "STARTED",
            ServerStatus::Stopping => "STOPPING",
            ServerStatus::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [ServerState; 8] = [
        ServerState::Booting,
        ServerState::Available,
        ServerState::Starting,
        ServerState::Started,
        ServerState::Stopping,
        ServerState::Stopped,
        ServerState::Failed,
        ServerState::MaxFailed,
    ];

    #[test]
    fn test_restart_on_reconnect_flags() {
        let restartable: Vec<_> = ALL
            .iter()
            .copied()
            .filter(|s| s.is_restart_on_reconnect())
            .collect();
        assert_eq!(
            restartable,
            vec![
                ServerState::Booting,
                ServerState::Available,
                ServerState::Starting,
                ServerState::Failed
            ]
        );
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(ServerState::Booting.status(), ServerStatus::Starting);
        assert_eq!(ServerState::Available.status(), ServerStatus::Starting);
        assert_eq!(ServerState::Starting.status(), ServerStatus::Starting);
        assert_eq!(ServerState::Started.status(), ServerStatus::Started);
        assert_eq!(ServerState::Stopping.status(), ServerStatus::Stopping);
        assert_eq!(ServerState::Stopped.status(), ServerStatus::Stopped);
        assert_eq!(ServerState::Failed.status(), ServerStatus::Failed);
        assert_eq!(ServerState::MaxFailed.status(), ServerStatus::Failed);
    }

    #[test]
    fn test_state_serializes_in_upper_case() {
        let encoded = serde_json::to_string(&ServerState::MaxFailed).unwrap();
        assert_eq!(encoded, "\"MAX_FAILED\"");
        assert_eq!(ServerState::MaxFailed.to_string(), "MAX_FAILED");
        assert!(ServerState::Stopped.is_terminal());
        assert!(!ServerState::Failed.is_terminal());
    }
}
