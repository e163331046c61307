//! Send side of the channel to the process supervisor.
//!
//! Notifications travel the other way on the [`EventBus`](crate::events::EventBus).

mod local;
mod mock;

pub use local::LocalProcessSupervisor;
pub use mock::{MockSupervisor, SupervisorCall};

use crate::config::ServerConfig;
use crate::error::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Identifies one registration of a process name at the supervisor.
///
/// A name that is removed and added again gets a new incarnation, so exit
/// notifications of the earlier process can be told apart.
pub type ProcessIncarnation = u64;

/// How to launch one server process
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LaunchSpec {
    pub command: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub env: BTreeMap<String, String>,
}

impl LaunchSpec {
    pub fn from_server_config(config: &ServerConfig) -> Self {
        Self {
            command: config.command.clone(),
            working_dir: config.working_dir.as_ref().map(PathBuf::from),
            env: config.env.clone(),
        }
    }
}

/// Commands the host controller sends to the process supervisor
#[async_trait]
pub trait ProcessSupervisor: Send + Sync {
    /// Register a process under `process_name`
    async fn add_process(
        &self,
        process_name: &str,
        launch: &LaunchSpec,
    ) -> Result<ProcessIncarnation>;

    /// Launch a registered process, or acknowledge that it finished booting
    async fn start_process(&self, process_name: &str) -> Result<()>;

    async fn stop_process(&self, process_name: &str) -> Result<()>;

    async fn remove_process(&self, process_name: &str) -> Result<()>;

    /// Ask for an inventory snapshot, delivered as an event
    async fn request_inventory(&self) -> Result<()>;

    /// Close the channel
    async fn shutdown(&self) -> Result<()>;
}
