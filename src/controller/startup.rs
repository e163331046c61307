use super::HostController;
use crate::config::BootMode;
use crate::error::{HostControllerError, Result};
use std::sync::atomic::Ordering;
use tracing::{error, info};

impl HostController {
    /// Bring the host controller up: take the supervisor inventory, register
    /// with the domain controller, then launch the auto-start servers
    pub async fn start(&self) -> Result<()> {
        info!("Starting host controller {}", self.host_name());

        self.supervisor.request_inventory().await.map_err(|e| {
            error!("Supervisor inventory request failed: {}", e);
            HostControllerError::startup(format!("supervisor unavailable: {}", e))
        })?;

        if let Some(connection) = &self.domain_connection {
            connection.register(self.host_name()).await.map_err(|e| {
                error!("Failed to register with the domain controller: {}", e);
                HostControllerError::startup(format!("registration failed: {}", e))
            })?;
            info!("Registered host {} with the domain controller", self.host_name());
        }

        self.start_servers().await;
        Ok(())
    }

    /// Launch configured servers. Only the first call has any effect.
    pub async fn start_servers(&self) {
        if self
            .servers_started
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        if self.config.host.boot_mode == BootMode::Restart {
            info!("Host controller restarted; waiting for servers to reconnect");
            return;
        }

        for server in self.host_model.servers() {
            if server.auto_start {
                info!("Starting server {}", server.name);
                if let Err(e) = self.launch_server(&server.name).await {
                    error!("Failed to start server {}: {}", server.name, e);
                }
            } else {
                info!("Server {} is configured to not be started", server.name);
            }
        }
    }
}
