use crate::error::{HostControllerError, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Connection from this host to the domain controller
#[async_trait]
pub trait DomainControllerConnection: Send + Sync {
    async fn register(&self, host_name: &str) -> Result<()>;

    async fn unregister(&self) -> Result<()>;
}

/// Domain connection that records registrations
#[derive(Default)]
pub struct MockDomainConnection {
    registered: Mutex<Vec<String>>,
    unregister_count: AtomicUsize,
    refuse_registration: Mutex<bool>,
}

impl MockDomainConnection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn refuse_registration(&self) {
        *self.refuse_registration.lock() = true;
    }

    /// Host names registered so far
    pub fn registered(&self) -> Vec<String> {
        self.registered.lock().clone()
    }

    pub fn unregister_count(&self) -> usize {
        self.unregister_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DomainControllerConnection for MockDomainConnection {
    async fn register(&self, host_name: &str) -> Result<()> {
        if *self.refuse_registration.lock() {
            return Err(HostControllerError::DomainConnection {
                message: format!("registration of {} refused", host_name),
            });
        }
        self.registered.lock().push(host_name.to_string());
        Ok(())
    }

    async fn unregister(&self) -> Result<()> {
        self.unregister_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
