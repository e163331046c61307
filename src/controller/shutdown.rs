use super::HostController;
use std::sync::atomic::Ordering;
use tracing::{info, warn};

impl HostController {
    /// Stop the host controller. Returns false if it was already stopping.
    pub async fn stop(&self) -> bool {
        if self
            .stopping
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }

        info!("Stopping host controller {}", self.host_name());

        if let Some(connection) = &self.domain_connection {
            if let Err(e) = connection.unregister().await {
                warn!("Failed to unregister from the domain controller: {}", e);
            }
        }

        if let Err(e) = self.supervisor.shutdown().await {
            warn!("Error closing the supervisor channel: {}", e);
        }

        self.cancellation_token.cancel();
        info!("Host controller stopped");
        true
    }
}
