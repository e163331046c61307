//! The host's own configuration model.

use crate::config::ServerConfig;
use crate::identity::ServerIdentity;
use crate::update::{HostModelUpdate, HostUpdateApplierResponse, UpdateFailure, UpdateScope};
use parking_lot::RwLock;
use tracing::debug;

/// Configuration of this host as seen by the host controller
pub trait HostModel: Send + Sync {
    fn host_name(&self) -> &str;

    fn server(&self, server_name: &str) -> Option<ServerConfig>;

    /// Every configured server, in configuration order
    fn servers(&self) -> Vec<ServerConfig>;

    /// Apply updates to the host model, one response per update in order
    fn apply_host_model_updates(&self, updates: &[HostModelUpdate])
        -> Vec<HostUpdateApplierResponse>;

    fn server_identity(&self, config: &ServerConfig) -> ServerIdentity {
        ServerIdentity::new(self.host_name(), config.group.clone(), config.name.clone())
    }
}

/// Host model held in memory, built from the loaded configuration
pub struct InMemoryHostModel {
    host_name: String,
    servers: Vec<ServerConfig>,
    applied: RwLock<Vec<HostModelUpdate>>,
}

impl InMemoryHostModel {
    pub fn new<S: Into<String>>(host_name: S, servers: Vec<ServerConfig>) -> Self {
        Self {
            host_name: host_name.into(),
            servers,
            applied: RwLock::new(Vec::new()),
        }
    }

    /// Updates accepted so far
    pub fn applied_updates(&self) -> Vec<HostModelUpdate> {
        self.applied.read().clone()
    }

    fn resolve(&self, update: &HostModelUpdate) -> HostUpdateApplierResponse {
        match update.scope() {
            UpdateScope::Host => HostUpdateApplierResponse::affecting(Vec::new()),
            UpdateScope::ServerGroup(group) => HostUpdateApplierResponse::affecting(
                self.servers
                    .iter()
                    .filter(|server| &server.group == group)
                    .map(|server| self.server_identity(server))
                    .collect(),
            ),
            UpdateScope::Server(name) => match self.servers.iter().find(|s| &s.name == name) {
                Some(server) => {
                    HostUpdateApplierResponse::affecting(vec![self.server_identity(server)])
                }
                None => HostUpdateApplierResponse::failed(UpdateFailure::new(format!(
                    "No server named {} is configured on host {}",
                    name, self.host_name
                ))),
            },
        }
    }
}

impl HostModel for InMemoryHostModel {
    fn host_name(&self) -> &str {
        &self.host_name
    }

    fn server(&self, server_name: &str) -> Option<ServerConfig> {
        self.servers.iter().find(|s| s.name == server_name).cloned()
    }

    fn servers(&self) -> Vec<ServerConfig> {
        self.servers.clone()
    }

    fn apply_host_model_updates(
        &self,
        updates: &[HostModelUpdate],
    ) -> Vec<HostUpdateApplierResponse> {
        let responses: Vec<_> = updates.iter().map(|u| self.resolve(u)).collect();

        let mut applied = self.applied.write();
        for (update, response) in updates.iter().zip(&responses) {
            if response.host_failure().is_none() {
                debug!(
                    "Host model accepted {} affecting {} servers",
                    update.operation(),
                    response.servers().len()
                );
                applied.push(update.clone());
            }
        }

        responses
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model() -> InMemoryHostModel {
        InMemoryHostModel::new(
            "local",
            vec![
                ServerConfig::new("server-one", "main-server-group"),
                ServerConfig::new("server-two", "main-server-group"),
                ServerConfig::new("server-three", "other-server-group").with_auto_start(false),
            ],
        )
    }

    #[test]
    fn test_scope_resolution() {
        let model = model();
        let responses = model.apply_host_model_updates(&[
            HostModelUpdate::new("write-attribute", UpdateScope::Host),
            HostModelUpdate::new(
                "deploy",
                UpdateScope::ServerGroup("main-server-group".to_string()),
            ),
            HostModelUpdate::new("restart", UpdateScope::Server("server-three".to_string())),
            HostModelUpdate::new("restart", UpdateScope::Server("missing".to_string())),
        ]);

        assert_eq!(responses.len(), 4);
        assert!(responses[0].servers().is_empty());
        assert_eq!(
            responses[1].servers(),
            &[
                ServerIdentity::new("local", "main-server-group", "server-one"),
                ServerIdentity::new("local", "main-server-group", "server-two"),
            ]
        );
        assert_eq!(
            responses[2].servers(),
            &[ServerIdentity::new("local", "other-server-group", "server-three")]
        );
        assert!(responses[3].host_failure().is_some());

        // Rejected updates are not recorded
        assert_eq!(model.applied_updates().len(), 3);
    }

    #[test]
    fn test_server_lookup() {
        let model = model();
        assert_eq!(model.host_name(), "local");
        assert_eq!(model.servers().len(), 3);
        assert!(!model.server("server-three").unwrap().auto_start);
        assert!(model.server("missing").is_none());
    }
}
