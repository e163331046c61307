use crate::error::EventBusError;
use crate::server::ServerState;
use crate::supervisor::ProcessIncarnation;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// One process known to the supervisor, as reported in an inventory snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessInfo {
    pub name: String,
    pub running: bool,
}

/// Notifications published by the process supervisor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SupervisorEvent {
    /// A process was registered with the supervisor
    ProcessAdded { process_name: String },
    /// A registered process was launched
    ProcessStarted { process_name: String },
    /// A process exited
    ProcessStopped {
        process_name: String,
        incarnation: ProcessIncarnation,
        uptime: Duration,
    },
    /// A process was unregistered
    ProcessRemoved { process_name: String },
    /// Snapshot of every process the supervisor knows about
    Inventory { processes: Vec<ProcessInfo> },
    /// The supervisor asked the host controller to shut down
    ConnectionShutdown,
    /// The channel to the supervisor failed
    ConnectionFailure { cause: String },
    /// The channel to the supervisor was closed
    ConnectionFinished,

    /// A server process came up and is ready to be started
    ServerAvailable { process_name: String },
    /// A server finished booting
    ServerStarted { process_name: String },
    /// A server failed to boot
    ServerStartFailed { process_name: String },
    /// A server finished stopping
    ServerStopped { process_name: String },
    /// A server re-established its connection and reported its state
    ServerReconnected {
        process_name: String,
        state: ServerState,
    },
    /// A server process went away unexpectedly
    ServerDown { process_name: String },
    /// A server closed its connection to the host
    ServerConnectionClosed { process_name: String },
}

impl SupervisorEvent {
    /// Process the event is about, if any
    pub fn process_name(&self) -> Option<&str> {
        match self {
            SupervisorEvent::ProcessAdded { process_name }
            | SupervisorEvent::ProcessStarted { process_name }
            | SupervisorEvent::ProcessStopped { process_name, .. }
            | SupervisorEvent::ProcessRemoved { process_name }
            | SupervisorEvent::ServerAvailable { process_name }
            | SupervisorEvent::ServerStarted { process_name }
            | SupervisorEvent::ServerStartFailed { process_name }
            | SupervisorEvent::ServerStopped { process_name }
            | SupervisorEvent::ServerReconnected { process_name, .. }
            | SupervisorEvent::ServerDown { process_name }
            | SupervisorEvent::ServerConnectionClosed { process_name } => Some(process_name),
            SupervisorEvent::Inventory { .. }
            | SupervisorEvent::ConnectionShutdown
            | SupervisorEvent::ConnectionFailure { .. }
            | SupervisorEvent::ConnectionFinished => None,
        }
    }

    /// Get a human-readable description of the event
    pub fn description(&self) -> String {
        match self {
            SupervisorEvent::ProcessAdded { process_name } => {
                format!("Process {} added", process_name)
            }
            SupervisorEvent::ProcessStarted { process_name } => {
                format!("Process {} started", process_name)
            }
            SupervisorEvent::ProcessStopped {
                process_name,
                incarnation,
                uptime,
            } => format!(
                "Process {} (incarnation {}) stopped after {} ms",
                process_name,
                incarnation,
                uptime.as_millis()
            ),
            SupervisorEvent::ProcessRemoved { process_name } => {
                format!("Process {} removed", process_name)
            }
            SupervisorEvent::Inventory { processes } => {
                format!("Inventory of {} processes", processes.len())
            }
            SupervisorEvent::ConnectionShutdown => "Supervisor requested shutdown".to_string(),
            SupervisorEvent::ConnectionFailure { cause } => {
                format!("Supervisor connection failed: {}", cause)
            }
            SupervisorEvent::ConnectionFinished => "Supervisor connection closed".to_string(),
            SupervisorEvent::ServerAvailable { process_name } => {
                format!("Server {} available", process_name)
            }
            SupervisorEvent::ServerStarted { process_name } => {
                format!("Server {} started", process_name)
            }
            SupervisorEvent::ServerStartFailed { process_name } => {
                format!("Server {} failed to start", process_name)
            }
            SupervisorEvent::ServerStopped { process_name } => {
                format!("Server {} stopped", process_name)
            }
            SupervisorEvent::ServerReconnected {
                process_name,
                state,
            } => format!("Server {} reconnected in state {}", process_name, state),
            SupervisorEvent::ServerDown { process_name } => {
                format!("Server {} down", process_name)
            }
            SupervisorEvent::ServerConnectionClosed { process_name } => {
                format!("Server {} closed its connection", process_name)
            }
        }
    }

    /// Get the event type as a string for filtering
    pub fn event_type(&self) -> &'static str {
        match self {
            SupervisorEvent::ProcessAdded { .. } => "process_added",
            SupervisorEvent::ProcessStarted { .. } => "process_started",
            SupervisorEvent::ProcessStopped { .. } => "process_stopped",
            SupervisorEvent::ProcessRemoved { .. } => "process_removed",
            SupervisorEvent::Inventory { .. } => "inventory",
            SupervisorEvent::ConnectionShutdown => "connection_shutdown",
            SupervisorEvent::ConnectionFailure { .. } => "connection_failure",
            SupervisorEvent::ConnectionFinished => "connection_finished",
            SupervisorEvent::ServerAvailable { .. } => "server_available",
            SupervisorEvent::ServerStarted { .. } => "server_started",
            SupervisorEvent::ServerStartFailed { .. } => "server_start_failed",
            SupervisorEvent::ServerStopped { .. } => "server_stopped",
            SupervisorEvent::ServerReconnected { .. } => "server_reconnected",
            SupervisorEvent::ServerDown { .. } => "server_down",
            SupervisorEvent::ServerConnectionClosed { .. } => "server_connection_closed",
        }
    }
}

/// Async event bus carrying supervisor notifications to the host controller
pub struct EventBus {
    sender: broadcast::Sender<SupervisorEvent>,
}

impl EventBus {
    /// Create a new event bus with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to events and get a receiver
    pub fn subscribe(&self) -> broadcast::Receiver<SupervisorEvent> {
        self.sender.subscribe()
    }

    /// Subscribe with a filter
    pub fn receiver(&self, filter: EventFilter, name: &str) -> EventReceiver {
        EventReceiver::new(self.sender.subscribe(), filter, name.to_string())
    }

    /// Publish an event to all subscribers
    pub async fn publish(&self, event: SupervisorEvent) -> Result<usize, EventBusError> {
        match &event {
            SupervisorEvent::ConnectionFailure { cause } => {
                error!("Supervisor connection failure: {}", cause);
            }
            SupervisorEvent::ConnectionShutdown => {
                info!("Supervisor requested shutdown");
            }
            SupervisorEvent::ServerDown { process_name } => {
                warn!("Server process {} is down", process_name);
            }
            _ => debug!("Publishing event: {}", event.description()),
        }

        self.sender
            .send(event)
            .map_err(|e| EventBusError::PublishFailed {
                details: e.to_string(),
            })
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// Event filter for selective event handling
#[derive(Debug, Clone)]
pub enum EventFilter {
    /// Accept all events
    All,
    /// Accept only specific event types
    EventTypes(Vec<&'static str>),
    /// Accept events about specific processes
    Processes(Vec<String>),
}

impl EventFilter {
    /// Check if an event passes this filter
    pub fn matches(&self, event: &SupervisorEvent) -> bool {
        match self {
            EventFilter::All => true,
            EventFilter::EventTypes(types) => types.contains(&event.event_type()),
            EventFilter::Processes(processes) => event
                .process_name()
                .map(|name| processes.iter().any(|p| p == name))
                .unwrap_or(false),
        }
    }
}

/// Event receiver with filtering
pub struct EventReceiver {
    receiver: broadcast::Receiver<SupervisorEvent>,
    filter: EventFilter,
    name: String,
}

impl EventReceiver {
    /// Create a new event receiver with a filter
    pub fn new(
        receiver: broadcast::Receiver<SupervisorEvent>,
        filter: EventFilter,
        name: String,
    ) -> Self {
        Self {
            receiver,
            filter,
            name,
        }
    }

    /// Receive the next filtered event
    pub async fn recv(&mut self) -> Result<SupervisorEvent, EventBusError> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => {
                    if self.filter.matches(&event) {
                        debug!(
                            "Receiver '{}' received event: {}",
                            self.name,
                            event.description()
                        );
                        return Ok(event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Receiver '{}' lagged behind by {} events", self.name, n);
                    return Err(EventBusError::Lagged { count: n });
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Event bus closed for receiver '{}'", self.name);
                    return Err(EventBusError::ChannelClosed);
                }
            }
        }
    }

    /// Try to receive an event without blocking
    pub fn try_recv(&mut self) -> Result<Option<SupervisorEvent>, EventBusError> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if self.filter.matches(&event) {
                        return Ok(Some(event));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => {
                    return Ok(None);
                }
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    warn!("Receiver '{}' lagged behind by {} events", self.name, n);
                    return Err(EventBusError::Lagged { count: n });
                }
                Err(broadcast::error::TryRecvError::Closed) => {
                    return Err(EventBusError::ChannelClosed);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{timeout, Duration};

    fn started(name: &str) -> SupervisorEvent {
        SupervisorEvent::ServerStarted {
            process_name: name.to_string(),
        }
    }

    #[tokio::test]
    async fn test_event_bus_basic_operations() {
        let event_bus = EventBus::new(10);
        let mut receiver = event_bus.subscribe();

        let subscriber_count = event_bus.publish(started("Server:one")).await.unwrap();
        assert_eq!(subscriber_count, 1);

        let received = receiver.recv().await.unwrap();
        assert_eq!(received, started("Server:one"));
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_fails() {
        let event_bus = EventBus::new(10);
        let result = event_bus.publish(SupervisorEvent::ConnectionFinished).await;
        assert!(matches!(result, Err(EventBusError::PublishFailed { .. })));
    }

    #[tokio::test]
    async fn test_multiple_subscribers() {
        let event_bus = EventBus::new(10);
        let mut receiver1 = event_bus.subscribe();
        let mut receiver2 = event_bus.subscribe();

        assert_eq!(event_bus.subscriber_count(), 2);

        event_bus
            .publish(SupervisorEvent::ConnectionShutdown)
            .await
            .unwrap();

        let _ = timeout(Duration::from_millis(100), receiver1.recv())
            .await
            .unwrap()
            .unwrap();
        let _ = timeout(Duration::from_millis(100), receiver2.recv())
            .await
            .unwrap()
            .unwrap();
    }

    #[test]
    fn test_event_filter() {
        let by_type = EventFilter::EventTypes(vec!["server_started", "server_down"]);
        let by_process = EventFilter::Processes(vec!["Server:one".to_string()]);

        let inventory = SupervisorEvent::Inventory {
            processes: Vec::new(),
        };

        assert!(by_type.matches(&started("Server:two")));
        assert!(!by_type.matches(&inventory));
        assert!(by_process.matches(&started("Server:one")));
        assert!(!by_process.matches(&started("Server:two")));
        assert!(!by_process.matches(&inventory));
    }

    #[tokio::test]
    async fn test_filtered_receiver() {
        let event_bus = EventBus::new(10);
        let mut filtered = event_bus.receiver(
            EventFilter::EventTypes(vec!["server_reconnected"]),
            "test",
        );

        event_bus.publish(started("Server:one")).await.unwrap();
        event_bus
            .publish(SupervisorEvent::ServerReconnected {
                process_name: "Server:one".to_string(),
                state: ServerState::Failed,
            })
            .await
            .unwrap();

        let received = timeout(Duration::from_millis(100), filtered.recv())
            .await
            .unwrap()
            .unwrap();
        match received {
            SupervisorEvent::ServerReconnected { state, .. } => {
                assert_eq!(state, ServerState::Failed);
            }
            other => panic!("Unexpected event: {:?}", other),
        }
        assert_eq!(filtered.try_recv().unwrap(), None);
    }

    #[tokio::test]
    async fn test_lagged_receiver_reports_count() {
        let event_bus = EventBus::new(2);
        let mut receiver = event_bus.receiver(EventFilter::All, "slow");

        for i in 0..5 {
            event_bus
                .publish(started(&format!("Server:{}", i)))
                .await
                .unwrap();
        }

        assert_eq!(
            receiver.recv().await,
            Err(EventBusError::Lagged { count: 3 })
        );
        // The receiver resumes with the oldest retained event
        assert_eq!(receiver.recv().await.unwrap(), started("Server:3"));
    }

    #[test]
    fn test_event_properties() {
        let event = SupervisorEvent::ProcessStopped {
            process_name: "Server:one".to_string(),
            incarnation: 3,
            uptime: Duration::from_millis(1500),
        };

        assert_eq!(event.event_type(), "process_stopped");
        assert_eq!(event.process_name(), Some("Server:one"));
        assert!(event.description().contains("1500 ms"));
        assert_eq!(SupervisorEvent::ConnectionShutdown.process_name(), None);
    }
}
