//! Callbacks driven by supervisor notifications.

use super::types::{
    EXPECT_AVAILABLE, EXPECT_CONNECTION_CLOSED, EXPECT_RECONNECT, EXPECT_STARTED,
    EXPECT_STOPPED,
};
use super::HostController;
use crate::config::BootMode;
use crate::error::HostControllerError;
use crate::identity::server_name_from_process;
use crate::recovery::RecoveryAction;
use crate::server::{ManagedServer, ServerState};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

impl HostController {
    /// The server process connected and is ready for its start command
    pub async fn available_server(&self, process_name: &str) {
        let Some(server) = self.tracked_server(process_name, "available") else {
            return;
        };
        server.check_state(EXPECT_AVAILABLE, "available");

        server.set_state(ServerState::Available);
        info!("Sending start to server {}", process_name);
        match server.start_server_process().await {
            Ok(()) => server.set_state(ServerState::Starting),
            Err(e) => self.log_process_error(process_name, "start", &e),
        }
    }

    pub async fn started_server(&self, process_name: &str) {
        let Some(server) = self.tracked_server(process_name, "started") else {
            return;
        };
        server.check_state(EXPECT_STARTED, "started");
        server.set_state(ServerState::Started);
        self.recovery.lock().reset_retry_count(process_name);
        info!("Server {} started", process_name);
    }

    pub async fn failed_start_server(&self, process_name: &str) {
        let Some(server) = self.tracked_server(process_name, "start failed") else {
            return;
        };
        server.check_state(EXPECT_STARTED, "start failed");
        server.set_state(ServerState::Failed);
        warn!("Server {} failed to start", process_name);
    }

    /// The server finished stopping; release its process
    pub async fn stopped_server(&self, process_name: &str) {
        let Some(server) = self.tracked_server(process_name, "stopped") else {
            return;
        };
        server.check_state(EXPECT_STOPPED, "stopped");
        server.set_state(ServerState::Stopped);

        if let Err(e) = self.supervisor.stop_process(process_name).await {
            self.log_process_error(process_name, "stop", &e);
        }
        if let Err(e) = server.remove_server_process().await {
            self.log_process_error(process_name, "remove", &e);
        }
    }

    /// A server re-established its connection after this host restarted
    pub async fn reconnected_server(&self, process_name: &str, state: ServerState) {
        if self.is_stopping() {
            return;
        }

        let server = match self.servers.get(process_name) {
            Some(server) => {
                server.check_state(EXPECT_RECONNECT, "reconnect");
                server
            }
            None => match self.recognize_server(process_name, state) {
                Some(server) => server,
                None => {
                    error!("No server found for reconnected server {}", process_name);
                    return;
                }
            },
        };

        server.set_state(state);

        if state.is_restart_on_reconnect() {
            info!(
                "Relaunching reconnected server {} reported in state {}",
                process_name, state
            );
            if let Err(e) = server.start_server_process().await {
                self.log_process_error(process_name, "start reconnected", &e);
            }
        }
    }

    /// The server process went away
    pub async fn down_server(&self, process_name: &str) {
        let Some(server) = self.tracked_server(process_name, "down") else {
            return;
        };

        let host = &self.config.host;
        if host.boot_mode == BootMode::Restart
            && server.state() == ServerState::Booting
            && host.controller_port == 0
        {
            // Went down while this host was restarting; the ephemeral controller
            // port changed, so the process is registered again from scratch
            info!("Re-registering server {} after host restart", process_name);
            if let Err(e) = self.relaunch(&server).await {
                error!("Error removing and adding process {}: {}", process_name, e);
            }
            return;
        }

        server.set_state(ServerState::Failed);
        warn!("Server {} is down", process_name);

        if self.config.lifecycle.auto_restart {
            self.schedule_restart(server);
        }
    }

    /// The server closed its connection to this host
    pub async fn connection_closed(&self, process_name: &str) {
        let Some(server) = self.tracked_server(process_name, "connection closed") else {
            return;
        };

        if server.check_state(EXPECT_CONNECTION_CLOSED, "connection closed") {
            debug!(
                "Ignoring closed connection for server {} in the {} state",
                process_name,
                server.state()
            );
        }
    }

    /// Look up the server a notification is about; no-op once stopping
    fn tracked_server(&self, process_name: &str, notification: &str) -> Option<Arc<ManagedServer>> {
        if self.stopping.load(Ordering::SeqCst) {
            debug!(
                "Ignoring {} notification for {} while stopping",
                notification, process_name
            );
            return None;
        }

        let server = self.servers.get(process_name);
        if server.is_none() {
            warn!(
                "No server called {} exists for {} notification",
                process_name, notification
            );
        }
        server
    }

    /// Track a configured server first seen through a reconnect
    fn recognize_server(&self, process_name: &str, state: ServerState) -> Option<Arc<ManagedServer>> {
        let server_name = server_name_from_process(process_name)?;
        let config = self.host_model.server(server_name)?;

        let server = Arc::new(ManagedServer::with_state(
            self.host_name(),
            config,
            Arc::clone(&self.supervisor),
            Arc::clone(&self.executor),
            state,
        ));
        server.record_diagnostic("recognized after reconnect");

        match self.servers.insert(Arc::clone(&server)) {
            Ok(()) => {
                info!("Recognized server {} after reconnect", process_name);
                Some(server)
            }
            // Tracked concurrently by another notification
            Err(_) => self.servers.get(process_name),
        }
    }

    /// Remove, re-add and start the process of a tracked server
    pub(super) async fn relaunch(&self, server: &ManagedServer) -> crate::error::Result<()> {
        server.remove_server_process().await?;
        server.add_server_process().await?;
        server.start_server_process().await
    }

    fn schedule_restart(&self, server: Arc<ManagedServer>) {
        let action = self.recovery.lock().handle_failure(server.process_name());

        match action {
            RecoveryAction::GiveUp => {
                server.set_state(ServerState::MaxFailed);
                server.record_diagnostic("restart attempts exhausted");
            }
            RecoveryAction::RetryAfterDelay(delay) => {
                let Some(controller) = self.self_ref.upgrade() else {
                    return;
                };
                let token = self.cancellation_token.clone();

                tokio::spawn(async move {
                    tokio::select! {
                        _ = token.cancelled() => return,
                        _ = tokio::time::sleep(delay) => {}
                    }

                    let process_name = server.process_name().to_string();
                    let still_tracked = controller
                        .servers
                        .get(&process_name)
                        .map(|current| Arc::ptr_eq(&current, &server))
                        .unwrap_or(false);
                    if controller.is_stopping()
                        || !still_tracked
                        || server.state() != ServerState::Failed
                    {
                        debug!("Skipping restart of {}", process_name);
                        return;
                    }

                    info!("Restarting server {}", process_name);
                    if let Err(e) = controller.relaunch(&server).await {
                        controller.log_process_error(&process_name, "restart", &e);
                    }
                });
            }
        }
    }

    /// Supervisor I/O failures are expected once stopping
    pub(super) fn log_process_error(
        &self,
        process_name: &str,
        operation: &str,
        e: &HostControllerError,
    ) {
        if self.is_stopping() {
            debug!(
                "Ignoring {} failure for {} while stopping: {}",
                operation, process_name, e
            );
        } else {
            error!("Could not {} server {}: {}", operation, process_name, e);
        }
    }
}
