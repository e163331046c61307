pub mod config;
pub mod controller;
pub mod distributor;
pub mod error;
pub mod events;
pub mod executor;
pub mod identity;
pub mod model;
pub mod recovery;
pub mod server;
pub mod supervisor;
pub mod update;

pub use config::{BootMode, HostControllerConfig, ServerConfig};
pub use controller::{
    DomainControllerConnection, HostController, HostControllerBuilder, MockDomainConnection,
    ShutdownReason,
};
pub use distributor::UpdateDistributor;
pub use error::{EventBusError, HostControllerError, Result};
pub use events::{EventBus, EventFilter, EventReceiver, ProcessInfo, SupervisorEvent};
pub use executor::{DetachedUpdateExecutor, MockUpdateExecutor, ServerUpdateExecutor};
pub use identity::ServerIdentity;
pub use model::{HostModel, InMemoryHostModel};
pub use recovery::{RecoveryAction, RecoveryConfig, RecoveryManager};
pub use server::{ManagedServer, ServerRegistry, ServerSnapshot, ServerState, ServerStatus};
pub use supervisor::{
    LaunchSpec, LocalProcessSupervisor, MockSupervisor, ProcessIncarnation, ProcessSupervisor,
};
pub use update::{
    HostModelUpdate, HostUpdateApplierResponse, HostUpdateResult, ServerModelUpdate,
    UpdateFailure, UpdateResultHandlerResponse, UpdateScope,
};
