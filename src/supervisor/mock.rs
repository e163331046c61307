use super::{LaunchSpec, ProcessIncarnation, ProcessSupervisor};
use crate::error::{HostControllerError, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// A command received by [`MockSupervisor`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorCall {
    Add(String),
    Start(String),
    Stop(String),
    Remove(String),
    RequestInventory,
    Shutdown,
}

/// Supervisor that records commands instead of running processes
#[derive(Default)]
pub struct MockSupervisor {
    calls: Mutex<Vec<SupervisorCall>>,
    failing: Mutex<HashSet<String>>,
    inventory_fails: Mutex<bool>,
    incarnations: AtomicU64,
}

impl MockSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every command addressed to `process_name` fail
    pub fn fail_process(&self, process_name: &str) {
        self.failing.lock().insert(process_name.to_string());
    }

    pub fn recover_process(&self, process_name: &str) {
        self.failing.lock().remove(process_name);
    }

    pub fn fail_inventory(&self) {
        *self.inventory_fails.lock() = true;
    }

    pub fn calls(&self) -> Vec<SupervisorCall> {
        self.calls.lock().clone()
    }

    /// Commands addressed to one process, in order
    pub fn calls_for(&self, process_name: &str) -> Vec<SupervisorCall> {
        self.calls
            .lock()
            .iter()
            .filter(|call| match call {
                SupervisorCall::Add(p)
                | SupervisorCall::Start(p)
                | SupervisorCall::Stop(p)
                | SupervisorCall::Remove(p) => p == process_name,
                _ => false,
            })
            .cloned()
            .collect()
    }

    pub fn shutdown_count(&self) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|call| **call == SupervisorCall::Shutdown)
            .count()
    }

    pub fn clear(&self) {
        self.calls.lock().clear();
    }

    fn record(&self, call: SupervisorCall, process_name: &str) -> Result<()> {
        debug!("Mock supervisor received {:?}", call);
        self.calls.lock().push(call);
        if self.failing.lock().contains(process_name) {
            return Err(HostControllerError::supervisor(
                process_name,
                "injected failure",
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl ProcessSupervisor for MockSupervisor {
    async fn add_process(
        &self,
        process_name: &str,
        _launch: &LaunchSpec,
    ) -> Result<ProcessIncarnation> {
        self.record(SupervisorCall::Add(process_name.to_string()), process_name)?;
        Ok(self.incarnations.fetch_add(1, Ordering::Relaxed) + 1)
    }

    async fn start_process(&self, process_name: &str) -> Result<()> {
        self.record(SupervisorCall::Start(process_name.to_string()), process_name)
    }

    async fn stop_process(&self, process_name: &str) -> Result<()> {
        self.record(SupervisorCall::Stop(process_name.to_string()), process_name)
    }

    async fn remove_process(&self, process_name: &str) -> Result<()> {
        self.record(SupervisorCall::Remove(process_name.to_string()), process_name)
    }

    async fn request_inventory(&self) -> Result<()> {
        self.calls.lock().push(SupervisorCall::RequestInventory);
        if *self.inventory_fails.lock() {
            return Err(HostControllerError::supervisor(
                "inventory",
                "supervisor unreachable",
            ));
        }
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        self.calls.lock().push(SupervisorCall::Shutdown);
        Ok(())
    }
}
