use super::ServerState;
use crate::config::ServerConfig;
use crate::error::Result;
use crate::executor::ServerUpdateExecutor;
use crate::identity::ServerIdentity;
use crate::supervisor::{LaunchSpec, ProcessIncarnation, ProcessSupervisor};
use crate::update::{ServerModelUpdate, UpdateFailure, UpdateResultHandlerResponse};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, warn};

/// Diagnostics kept per server
const MAX_DIAGNOSTICS: usize = 32;

/// Something unexpected observed about a server, kept for operators
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateDiagnostic {
    pub at: DateTime<Utc>,
    pub state: ServerState,
    pub message: String,
}

/// Read-only view of a managed server
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServerSnapshot {
    pub identity: ServerIdentity,
    pub process_name: String,
    pub state: ServerState,
    pub since: DateTime<Utc>,
    pub diagnostics: Vec<StateDiagnostic>,
}

#[derive(Debug, Clone, Copy)]
struct StateRecord {
    state: ServerState,
    since: DateTime<Utc>,
}

/// Host-side handle on one server process.
///
/// State is only changed by the host controller; the handle itself never
/// reacts to supervisor notifications.
pub struct ManagedServer {
    identity: ServerIdentity,
    process_name: String,
    config: ServerConfig,
    supervisor: Arc<dyn ProcessSupervisor>,
    executor: Arc<dyn ServerUpdateExecutor>,
    state: RwLock<StateRecord>,
    diagnostics: Mutex<VecDeque<StateDiagnostic>>,
    incarnation: Mutex<Option<ProcessIncarnation>>,
    update_lock: tokio::sync::Mutex<()>,
}

impl ManagedServer {
    /// Create a handle in the BOOTING state
    pub fn new(
        host_name: &str,
        config: ServerConfig,
        supervisor: Arc<dyn ProcessSupervisor>,
        executor: Arc<dyn ServerUpdateExecutor>,
    ) -> Self {
        Self::with_state(host_name, config, supervisor, executor, ServerState::Booting)
    }

    /// Create a handle for a server whose state is already known
    pub fn with_state(
        host_name: &str,
        config: ServerConfig,
        supervisor: Arc<dyn ProcessSupervisor>,
        executor: Arc<dyn ServerUpdateExecutor>,
        state: ServerState,
    ) -> Self {
        let identity = ServerIdentity::new(host_name, config.group.clone(), config.name.clone());
        let process_name = identity.process_name();
        Self {
            identity,
            process_name,
            config,
            supervisor,
            executor,
            state: RwLock::new(StateRecord {
                state,
                since: Utc::now(),
            }),
            diagnostics: Mutex::new(VecDeque::with_capacity(MAX_DIAGNOSTICS)),
            incarnation: Mutex::new(None),
            update_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn identity(&self) -> &ServerIdentity {
        &self.identity
    }

    pub fn process_name(&self) -> &str {
        &self.process_name
    }

    pub fn server_name(&self) -> &str {
        self.identity.server_name()
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Registration this handle made at the supervisor, if any
    pub fn incarnation(&self) -> Option<ProcessIncarnation> {
        *self.incarnation.lock()
    }

    /// Whether a notification about `incarnation` concerns this handle's process.
    ///
    /// A handle that never registered a process (one recognized on reconnect)
    /// accepts every incarnation.
    pub fn owns_incarnation(&self, incarnation: ProcessIncarnation) -> bool {
        self.incarnation().map_or(true, |own| own == incarnation)
    }

    pub fn state(&self) -> ServerState {
        self.state.read().state
    }

    /// When the current state was entered
    pub fn since(&self) -> DateTime<Utc> {
        self.state.read().since
    }

    pub fn set_state(&self, state: ServerState) {
        let mut record = self.state.write();
        if record.state != state {
            debug!(
                "Server {} state {} -> {}",
                self.process_name, record.state, state
            );
        }
        *record = StateRecord {
            state,
            since: Utc::now(),
        };
    }

    /// Compare the current state against the states `operation` expects.
    ///
    /// A mismatch is logged and recorded; the caller proceeds either way.
    pub fn check_state(&self, expected: &[ServerState], operation: &str) -> bool {
        let current = self.state();
        if expected.contains(&current) {
            return true;
        }

        let expected_names: Vec<&str> = expected.iter().map(|s| s.as_str()).collect();
        let message = format!(
            "{} in state {}, expected {}",
            operation,
            current,
            expected_names.join(" or ")
        );
        warn!("Server {}: {}", self.process_name, message);
        self.record_diagnostic(message);
        false
    }

    pub fn record_diagnostic<S: Into<String>>(&self, message: S) {
        let diagnostic = StateDiagnostic {
            at: Utc::now(),
            state: self.state(),
            message: message.into(),
        };

        let mut diagnostics = self.diagnostics.lock();
        diagnostics.push_back(diagnostic);
        while diagnostics.len() > MAX_DIAGNOSTICS {
            diagnostics.pop_front();
        }
    }

    pub fn diagnostics(&self) -> Vec<StateDiagnostic> {
        self.diagnostics.lock().iter().cloned().collect()
    }

    pub fn snapshot(&self) -> ServerSnapshot {
        let record = *self.state.read();
        ServerSnapshot {
            identity: self.identity.clone(),
            process_name: self.process_name.clone(),
            state: record.state,
            since: record.since,
            diagnostics: self.diagnostics(),
        }
    }

    /// Register the process with the supervisor; the server is BOOTING again
    pub async fn add_server_process(&self) -> Result<()> {
        self.set_state(ServerState::Booting);
        let incarnation = self
            .supervisor
            .add_process(&self.process_name, &LaunchSpec::from_server_config(&self.config))
            .await?;
        *self.incarnation.lock() = Some(incarnation);
        Ok(())
    }

    pub async fn start_server_process(&self) -> Result<()> {
        self.supervisor.start_process(&self.process_name).await
    }

    /// Move to STOPPING and ask the supervisor to stop the process
    pub async fn stop_server_process(&self) -> Result<()> {
        self.set_state(ServerState::Stopping);
        self.supervisor.stop_process(&self.process_name).await
    }

    pub async fn remove_server_process(&self) -> Result<()> {
        self.supervisor.remove_process(&self.process_name).await
    }

    /// Apply a batch in order, one response per update.
    ///
    /// Batches for the same server never overlap.
    pub async fn apply_updates(
        &self,
        updates: &[ServerModelUpdate],
        allow_overall_rollback: bool,
    ) -> Vec<UpdateResultHandlerResponse> {
        if updates.is_empty() {
            return Vec::new();
        }

        let _guard = self.update_lock.lock().await;
        debug!(
            "Applying {} updates to server {}",
            updates.len(),
            self.identity
        );

        match self
            .executor
            .apply(&self.identity, updates, allow_overall_rollback)
            .await
        {
            Ok(mut responses) => {
                if responses.len() != updates.len() {
                    warn!(
                        "Server {} answered {} updates with {} responses",
                        self.identity,
                        updates.len(),
                        responses.len()
                    );
                    let cause = UpdateFailure::new(format!(
                        "server {} returned no response for this update",
                        self.identity
                    ));
                    responses.resize(
                        updates.len(),
                        UpdateResultHandlerResponse::failure(cause),
                    );
                }
                responses
            }
            Err(e) => {
                warn!("Failed to apply updates to server {}: {}", self.identity, e);
                let cause = UpdateFailure::new(e.to_string());
                UpdateResultHandlerResponse::failures(updates.len(), &cause)
            }
        }
    }
}

impl std::fmt::Debug for ManagedServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedServer")
            .field("identity", &self.identity)
            .field("process_name", &self.process_name)
            .field("state", &self.state())
            .finish()
    }
}
