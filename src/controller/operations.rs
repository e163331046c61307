//! Operator requests against single servers, and status reporting.

use super::types::EXPECT_OPERATOR_STOP;
use super::HostController;
use crate::config::ServerConfig;
use crate::error::{HostControllerError, Result};
use crate::identity::{server_process_name, ServerIdentity};
use crate::server::{ManagedServer, ServerSnapshot, ServerState, ServerStatus};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

impl HostController {
    /// Start a server and wait, bounded, while it reports STARTING
    pub async fn start_server(&self, server_name: &str) -> ServerStatus {
        if let Err(e) = self.try_start_server(server_name).await {
            error!("Failed to start server {}: {}", server_name, e);
        }
        self.poll_while_starting(server_name).await
    }

    /// Stop a server immediately and forget it.
    ///
    /// A non-negative `graceful_timeout_millis` asks for a graceful shutdown,
    /// which is not supported; the server is stopped immediately instead.
    pub async fn stop_server(&self, server_name: &str, graceful_timeout_millis: i64) -> ServerStatus {
        let process_name = server_process_name(server_name);
        if let Some(server) = self.servers.get(&process_name) {
            if graceful_timeout_millis > -1 {
                warn!(
                    "Graceful shutdown of server {} was requested but is not supported. \
                     Falling back to immediate shutdown.",
                    server_name
                );
            }
            if let Err(e) = self.stop_immediately(&server).await {
                error!("Failed to stop server {}: {}", server_name, e);
            }
        }

        self.determine_server_status(server_name)
    }

    /// Stop then start; the two steps are not atomic
    pub async fn restart_server(&self, server_name: &str, graceful_timeout_millis: i64) -> ServerStatus {
        self.stop_server(server_name, graceful_timeout_millis).await;
        self.start_server(server_name).await
    }

    /// Status of every configured server
    pub fn server_statuses(&self) -> BTreeMap<ServerIdentity, ServerStatus> {
        self.host_model
            .servers()
            .iter()
            .map(|config| {
                (
                    self.host_model.server_identity(config),
                    self.status_of(config),
                )
            })
            .collect()
    }

    pub fn determine_server_status(&self, server_name: &str) -> ServerStatus {
        match self.host_model.server(server_name) {
            Some(config) => self.status_of(&config),
            None => ServerStatus::DoesNotExist,
        }
    }

    /// Read-only view of every tracked server
    pub fn servers(&self) -> Vec<ServerSnapshot> {
        self.servers.snapshot()
    }

    pub fn server(&self, server_name: &str) -> Option<ServerSnapshot> {
        self.servers
            .get(&server_process_name(server_name))
            .map(|server| server.snapshot())
    }

    /// Configuration of a tracked server
    pub fn server_model(&self, server_name: &str) -> Option<ServerConfig> {
        match self.servers.get(&server_process_name(server_name)) {
            Some(server) => Some(server.config().clone()),
            None => {
                debug!("Received server model request for unknown server {}", server_name);
                None
            }
        }
    }

    fn status_of(&self, config: &ServerConfig) -> ServerStatus {
        match self.servers.get(&server_process_name(&config.name)) {
            Some(server) => server.state().status(),
            None if config.auto_start => ServerStatus::Stopped,
            None => ServerStatus::Disabled,
        }
    }

    async fn try_start_server(&self, server_name: &str) -> Result<()> {
        let process_name = server_process_name(server_name);
        if let Some(existing) = self.servers.get(&process_name) {
            if existing.state() != ServerState::Stopped {
                warn!(
                    "Received request to start server {} but it is not stopped; server state is {}",
                    server_name,
                    existing.state()
                );
                return Ok(());
            }
            existing.remove_server_process().await?;
            self.servers.remove_if_same(&process_name, &existing);
        }

        self.launch_server(server_name).await
    }

    /// Track a new incarnation of a configured server and launch its process
    pub(super) async fn launch_server(&self, server_name: &str) -> Result<()> {
        let config = self
            .host_model
            .server(server_name)
            .ok_or_else(|| HostControllerError::unknown_server(server_name))?;

        let server = Arc::new(ManagedServer::new(
            self.host_name(),
            config,
            Arc::clone(&self.supervisor),
            Arc::clone(&self.executor),
        ));
        self.servers.insert(Arc::clone(&server))?;

        info!("Launching server {}", server.identity());
        if let Err(e) = server.add_server_process().await {
            // Never registered, so no notification will ever move it out of BOOTING
            self.servers.remove_if_same(server.process_name(), &server);
            return Err(e);
        }
        server.start_server_process().await
    }

    async fn stop_immediately(&self, server: &Arc<ManagedServer>) -> Result<()> {
        server.check_state(EXPECT_OPERATOR_STOP, "stop");
        server.stop_server_process().await?;
        server.remove_server_process().await?;
        server.set_state(ServerState::Stopped);
        self.servers.remove_if_same(server.process_name(), server);
        info!("Server {} stopped", server.identity());
        Ok(())
    }

    async fn poll_while_starting(&self, server_name: &str) -> ServerStatus {
        let lifecycle = &self.config.lifecycle;
        let mut status = self.determine_server_status(server_name);

        for _ in 0..lifecycle.start_poll_attempts {
            status = self.determine_server_status(server_name);
            if status != ServerStatus::Starting {
                break;
            }
            tokio::time::sleep(lifecycle.start_poll_interval()).await;
        }

        status
    }
}
