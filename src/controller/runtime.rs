use super::{HostController, ShutdownReason};
use crate::error::{EventBusError, HostControllerError, Result};
use crate::events::{EventFilter, ProcessInfo, SupervisorEvent};
use crate::identity::server_name_from_process;
use crate::server::ServerState;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

impl HostController {
    /// Wait for a signal or for the controller to stop, then stop it.
    ///
    /// Supervisor events are handled by [`Self::spawn_event_loop`], which the
    /// caller starts before `start()` so no notification is missed.
    pub async fn run(&self) -> Result<ShutdownReason> {
        info!("Host controller {} is running", self.host_name());

        let (shutdown_sender, shutdown_receiver) = oneshot::channel();
        Self::setup_signal_handlers(shutdown_sender);

        let reason = tokio::select! {
            reason = shutdown_receiver => reason.map_err(|_| {
                HostControllerError::system("Shutdown channel closed unexpectedly")
            })?,
            _ = self.cancellation_token.cancelled() => ShutdownReason::Stopped,
        };

        info!("Shutdown initiated: {:?}", reason);
        self.stop().await;

        info!("Host controller shutdown complete");
        Ok(reason)
    }

    /// Dispatch supervisor events until the controller stops.
    ///
    /// The subscription exists when this returns.
    pub fn spawn_event_loop(self: &Arc<Self>) -> JoinHandle<()> {
        let controller = Arc::clone(self);
        let mut receiver = self.event_bus.receiver(EventFilter::All, "host-controller");
        let token = self.cancellation_token.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        debug!("Event loop cancelled");
                        break;
                    }
                    event = receiver.recv() => match event {
                        Ok(event) => controller.handle_event(event).await,
                        Err(EventBusError::Lagged { count }) => {
                            warn!("Host controller missed {} supervisor events", count);
                        }
                        Err(EventBusError::ChannelClosed) => {
                            debug!("Event bus closed");
                            break;
                        }
                        Err(e) => warn!("Event bus error: {}", e),
                    }
                }
            }
        })
    }

    /// Route one supervisor event to its callback
    pub async fn handle_event(&self, event: SupervisorEvent) {
        match event {
            SupervisorEvent::ServerAvailable { process_name } => {
                self.available_server(&process_name).await
            }
            SupervisorEvent::ServerStarted { process_name } => {
                self.started_server(&process_name).await
            }
            SupervisorEvent::ServerStartFailed { process_name } => {
                self.failed_start_server(&process_name).await
            }
            SupervisorEvent::ServerStopped { process_name } => {
                self.stopped_server(&process_name).await
            }
            SupervisorEvent::ServerReconnected {
                process_name,
                state,
            } => self.reconnected_server(&process_name, state).await,
            SupervisorEvent::ServerDown { process_name } => {
                self.down_server(&process_name).await
            }
            SupervisorEvent::ServerConnectionClosed { process_name } => {
                self.connection_closed(&process_name).await
            }
            SupervisorEvent::ProcessStopped {
                process_name,
                incarnation,
                uptime,
            } => {
                let Some(server) = self.servers.get(&process_name) else {
                    debug!("Exit of untracked process {}", process_name);
                    return;
                };
                // A restart may have registered the name again already
                if !server.owns_incarnation(incarnation) {
                    debug!(
                        "Ignoring exit of earlier incarnation {} of {}",
                        incarnation, process_name
                    );
                    return;
                }
                let unexpected =
                    !matches!(server.state(), ServerState::Stopping | ServerState::Stopped);
                if unexpected {
                    info!(
                        "Process {} exited after {} ms",
                        process_name,
                        uptime.as_millis()
                    );
                    self.down_server(&process_name).await;
                }
            }
            SupervisorEvent::Inventory { processes } => self.reconcile_inventory(&processes),
            SupervisorEvent::ConnectionShutdown => {
                self.stop().await;
            }
            SupervisorEvent::ConnectionFailure { cause } => {
                if !self.is_stopping() {
                    error!("Connection to the supervisor failed: {}", cause);
                }
            }
            SupervisorEvent::ConnectionFinished => {
                info!("Connection to the supervisor closed");
            }
            other @ (SupervisorEvent::ProcessAdded { .. }
            | SupervisorEvent::ProcessStarted { .. }
            | SupervisorEvent::ProcessRemoved { .. }) => {
                debug!("{}", other.description());
            }
        }
    }

    /// Log differences between tracked servers and the supervisor's processes
    pub fn reconcile_inventory(&self, processes: &[ProcessInfo]) {
        let known: BTreeSet<&str> = processes.iter().map(|p| p.name.as_str()).collect();

        for process_name in self.servers.process_names() {
            if !known.contains(process_name.as_str()) {
                warn!(
                    "Server {} is tracked but has no process at the supervisor",
                    process_name
                );
            }
        }

        for process in processes {
            if server_name_from_process(&process.name).is_some()
                && !self.servers.contains(&process.name)
            {
                info!(
                    "Supervisor runs {} which this host does not track (running: {})",
                    process.name, process.running
                );
            }
        }

        debug!("Reconciled inventory of {} processes", processes.len());
    }

    /// Set up signal handlers for graceful shutdown
    fn setup_signal_handlers(shutdown_sender: oneshot::Sender<ShutdownReason>) {
        let shutdown_sender = Arc::new(Mutex::new(Some(shutdown_sender)));

        // Handle SIGTERM - Unix only
        #[cfg(unix)]
        {
            let shutdown_sender_sigterm = Arc::clone(&shutdown_sender);
            tokio::spawn(async move {
                let mut sigterm =
                    match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                        Ok(sigterm) => sigterm,
                        Err(e) => {
                            error!("Failed to register SIGTERM handler: {}", e);
                            return;
                        }
                    };
                if let Some(()) = sigterm.recv().await {
                    info!("Received SIGTERM signal");
                    if let Some(sender) = shutdown_sender_sigterm.lock().await.take() {
                        let _ = sender.send(ShutdownReason::Signal("SIGTERM".to_string()));
                    }
                }
            });
        }

        // Handle SIGINT (Ctrl+C) - Cross-platform
        let shutdown_sender_sigint = Arc::clone(&shutdown_sender);
        tokio::spawn(async move {
            if let Ok(()) = signal::ctrl_c().await {
                info!("Received SIGINT signal (Ctrl+C)");
                if let Some(sender) = shutdown_sender_sigint.lock().await.take() {
                    let _ = sender.send(ShutdownReason::Signal("SIGINT".to_string()));
                }
            }
        });
    }
}
