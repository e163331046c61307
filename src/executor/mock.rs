use super::ServerUpdateExecutor;
use crate::error::{HostControllerError, Result};
use crate::identity::ServerIdentity;
use crate::update::{ServerModelUpdate, UpdateResultHandlerResponse};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// One batch received by [`MockUpdateExecutor`]
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutorCall {
    pub server: ServerIdentity,
    pub operations: Vec<String>,
    pub allow_overall_rollback: bool,
}

/// Executor with scripted per-server responses.
///
/// Unscripted updates succeed with `{"operation": <name>}`.
#[derive(Default)]
pub struct MockUpdateExecutor {
    calls: Mutex<Vec<ExecutorCall>>,
    scripted: Mutex<HashMap<String, VecDeque<UpdateResultHandlerResponse>>>,
    unreachable: Mutex<HashSet<String>>,
    delay: Option<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockUpdateExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold each batch for `delay` before answering
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Queue responses returned, in order, for updates sent to `server_name`
    pub fn script<I>(&self, server_name: &str, responses: I)
    where
        I: IntoIterator<Item = UpdateResultHandlerResponse>,
    {
        self.scripted
            .lock()
            .entry(server_name.to_string())
            .or_default()
            .extend(responses);
    }

    /// Make batches for `server_name` fail before reaching the server
    pub fn make_unreachable(&self, server_name: &str) {
        self.unreachable.lock().insert(server_name.to_string());
    }

    pub fn calls(&self) -> Vec<ExecutorCall> {
        self.calls.lock().clone()
    }

    pub fn calls_for(&self, server_name: &str) -> Vec<ExecutorCall> {
        self.calls
            .lock()
            .iter()
            .filter(|call| call.server.server_name() == server_name)
            .cloned()
            .collect()
    }

    /// Highest number of batches that were being applied at the same time
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ServerUpdateExecutor for MockUpdateExecutor {
    async fn apply(
        &self,
        server: &ServerIdentity,
        updates: &[ServerModelUpdate],
        allow_overall_rollback: bool,
    ) -> Result<Vec<UpdateResultHandlerResponse>> {
        self.calls.lock().push(ExecutorCall {
            server: server.clone(),
            operations: updates.iter().map(|u| u.operation().to_string()).collect(),
            allow_overall_rollback,
        });

        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.unreachable.lock().contains(server.server_name()) {
            return Err(HostControllerError::system(format!(
                "connection to {} refused",
                server
            )));
        }

        let mut scripted = self.scripted.lock();
        let queue = scripted.entry(server.server_name().to_string()).or_default();
        Ok(updates
            .iter()
            .map(|update| {
                queue.pop_front().unwrap_or_else(|| {
                    UpdateResultHandlerResponse::success(json!({
                        "operation": update.operation()
                    }))
                })
            })
            .collect())
    }
}
