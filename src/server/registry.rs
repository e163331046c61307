use super::{ManagedServer, ServerSnapshot};
use crate::error::{HostControllerError, Result};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Servers tracked by the host, keyed by process name
#[derive(Debug, Default)]
pub struct ServerRegistry {
    servers: Mutex<BTreeMap<String, Arc<ManagedServer>>>,
}

impl ServerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a server. Fails if its process name is already tracked.
    pub fn insert(&self, server: Arc<ManagedServer>) -> Result<()> {
        let mut servers = self.servers.lock();
        if servers.contains_key(server.process_name()) {
            return Err(HostControllerError::AlreadyRegistered {
                process: server.process_name().to_string(),
            });
        }
        servers.insert(server.process_name().to_string(), server);
        Ok(())
    }

    pub fn remove(&self, process_name: &str) -> Option<Arc<ManagedServer>> {
        self.servers.lock().remove(process_name)
    }

    /// Remove `process_name` only if it is still tracked as `server`
    pub fn remove_if_same(&self, process_name: &str, server: &Arc<ManagedServer>) -> bool {
        let mut servers = self.servers.lock();
        match servers.get(process_name) {
            Some(current) if Arc::ptr_eq(current, server) => {
                servers.remove(process_name);
                true
            }
            _ => false,
        }
    }

    pub fn get(&self, process_name: &str) -> Option<Arc<ManagedServer>> {
        self.servers.lock().get(process_name).cloned()
    }

    pub fn contains(&self, process_name: &str) -> bool {
        self.servers.lock().contains_key(process_name)
    }

    pub fn len(&self) -> usize {
        self.servers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.lock().is_empty()
    }

    pub fn process_names(&self) -> Vec<String> {
        self.servers.lock().keys().cloned().collect()
    }

    /// Handles on every tracked server, ordered by process name
    pub fn handles(&self) -> Vec<Arc<ManagedServer>> {
        self.servers.lock().values().cloned().collect()
    }

    pub fn snapshot(&self) -> Vec<ServerSnapshot> {
        self.handles().iter().map(|s| s.snapshot()).collect()
    }
}
