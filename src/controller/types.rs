use crate::server::ServerState;

/// Why the host controller is going down
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownReason {
    Signal(String),
    /// The supervisor asked for shutdown, or `stop()` was called directly
    Stopped,
}

// States each notification expects the server to be in
pub(super) const EXPECT_AVAILABLE: &[ServerState] = &[ServerState::Booting];
pub(super) const EXPECT_STARTED: &[ServerState] = &[ServerState::Starting];
pub(super) const EXPECT_STOPPED: &[ServerState] = &[ServerState::Stopping];
pub(super) const EXPECT_RECONNECT: &[ServerState] = &[
    ServerState::Failed,
    ServerState::MaxFailed,
    ServerState::Stopped,
];
pub(super) const EXPECT_OPERATOR_STOP: &[ServerState] = &[
    ServerState::Starting,
    ServerState::Started,
    ServerState::Booting,
    ServerState::Available,
];
pub(super) const EXPECT_CONNECTION_CLOSED: &[ServerState] = &[
    ServerState::Stopping,
    ServerState::Stopped,
    ServerState::MaxFailed,
];
