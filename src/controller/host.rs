use super::DomainControllerConnection;
use crate::config::HostControllerConfig;
use crate::error::{HostControllerError, Result};
use crate::events::EventBus;
use crate::executor::{DetachedUpdateExecutor, ServerUpdateExecutor};
use crate::model::{HostModel, InMemoryHostModel};
use crate::recovery::{RecoveryConfig, RecoveryManager};
use crate::server::ServerRegistry;
use crate::supervisor::ProcessSupervisor;
use parking_lot::Mutex;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Weak};
use tokio_util::sync::CancellationToken;

/// Top-level coordinator of the servers on this host
pub struct HostController {
    pub(super) config: HostControllerConfig,
    pub(super) host_model: Arc<dyn HostModel>,
    pub(super) supervisor: Arc<dyn ProcessSupervisor>,
    pub(super) executor: Arc<dyn ServerUpdateExecutor>,
    pub(super) domain_connection: Option<Arc<dyn DomainControllerConnection>>,
    pub(super) event_bus: Arc<EventBus>,

    pub(super) servers: ServerRegistry,
    pub(super) recovery: Mutex<RecoveryManager>,

    // Lifecycle management
    pub(super) stopping: AtomicBool,
    pub(super) servers_started: AtomicBool,
    pub(super) cancellation_token: CancellationToken,
    pub(super) self_ref: Weak<HostController>,
}

impl HostController {
    pub fn builder() -> HostControllerBuilder {
        HostControllerBuilder::new()
    }

    pub fn host_name(&self) -> &str {
        self.host_model.host_name()
    }

    pub fn config(&self) -> &HostControllerConfig {
        &self.config
    }

    pub fn event_bus(&self) -> Arc<EventBus> {
        Arc::clone(&self.event_bus)
    }

    pub fn is_stopping(&self) -> bool {
        self.stopping.load(std::sync::atomic::Ordering::SeqCst)
    }

    /// Token cancelled once the controller has stopped
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }
}

/// Builder for [`HostController`]
pub struct HostControllerBuilder {
    config: Option<HostControllerConfig>,
    host_model: Option<Arc<dyn HostModel>>,
    supervisor: Option<Arc<dyn ProcessSupervisor>>,
    executor: Option<Arc<dyn ServerUpdateExecutor>>,
    domain_connection: Option<Arc<dyn DomainControllerConnection>>,
    event_bus: Option<Arc<EventBus>>,
}

impl HostControllerBuilder {
    pub fn new() -> Self {
        Self {
            config: None,
            host_model: None,
            supervisor: None,
            executor: None,
            domain_connection: None,
            event_bus: None,
        }
    }

    pub fn config(mut self, config: HostControllerConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Host model to use instead of one built from the configuration
    pub fn host_model(mut self, host_model: Arc<dyn HostModel>) -> Self {
        self.host_model = Some(host_model);
        self
    }

    pub fn supervisor(mut self, supervisor: Arc<dyn ProcessSupervisor>) -> Self {
        self.supervisor = Some(supervisor);
        self
    }

    pub fn executor(mut self, executor: Arc<dyn ServerUpdateExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn domain_connection(mut self, connection: Arc<dyn DomainControllerConnection>) -> Self {
        self.domain_connection = Some(connection);
        self
    }

    /// Bus the supervisor publishes on
    pub fn event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn build(self) -> Result<Arc<HostController>> {
        let config = self.config.unwrap_or_default();
        config.validate()?;

        let supervisor = self.supervisor.ok_or_else(|| {
            HostControllerError::system("A process supervisor must be specified")
        })?;
        let host_model = self.host_model.unwrap_or_else(|| {
            Arc::new(InMemoryHostModel::new(
                config.host.name.clone(),
                config.servers.clone(),
            ))
        });
        let executor = self
            .executor
            .unwrap_or_else(|| Arc::new(DetachedUpdateExecutor));
        let event_bus = self
            .event_bus
            .unwrap_or_else(|| Arc::new(EventBus::new(config.system.event_bus_capacity)));
        let recovery = RecoveryManager::with_config(RecoveryConfig::from(&config.lifecycle));

        Ok(Arc::new_cyclic(|self_ref| HostController {
            config,
            host_model,
            supervisor,
            executor,
            domain_connection: self.domain_connection,
            event_bus,
            servers: ServerRegistry::new(),
            recovery: Mutex::new(recovery),
            stopping: AtomicBool::new(false),
            servers_started: AtomicBool::new(false),
            cancellation_token: CancellationToken::new(),
            self_ref: self_ref.clone(),
        }))
    }
}

impl Default for HostControllerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
