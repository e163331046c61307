//! Execution of server-level updates inside a running server.

mod mock;

pub use mock::{ExecutorCall, MockUpdateExecutor};

use crate::error::Result;
use crate::identity::ServerIdentity;
use crate::update::{ServerModelUpdate, UpdateFailure, UpdateResultHandlerResponse};
use async_trait::async_trait;

/// Round-trip to one server that applies a batch of updates in order.
///
/// A successful call returns one response per submitted update. An `Err`
/// means the batch never reached the server.
#[async_trait]
pub trait ServerUpdateExecutor: Send + Sync {
    async fn apply(
        &self,
        server: &ServerIdentity,
        updates: &[ServerModelUpdate],
        allow_overall_rollback: bool,
    ) -> Result<Vec<UpdateResultHandlerResponse>>;
}

/// Executor for hosts without a management channel to their servers.
/// Every update fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct DetachedUpdateExecutor;

#[async_trait]
impl ServerUpdateExecutor for DetachedUpdateExecutor {
    async fn apply(
        &self,
        server: &ServerIdentity,
        updates: &[ServerModelUpdate],
        _allow_overall_rollback: bool,
    ) -> Result<Vec<UpdateResultHandlerResponse>> {
        let cause = UpdateFailure::new(format!(
            "server {} has no management channel",
            server
        ));
        Ok(UpdateResultHandlerResponse::failures(updates.len(), &cause))
    }
}
