use super::HostController;
use crate::distributor::UpdateDistributor;
use crate::identity::{server_process_name, ServerIdentity};
use crate::update::{
    HostModelUpdate, HostUpdateApplierResponse, HostUpdateResult, ServerModelUpdate,
    UpdateFailure, UpdateResultHandlerResponse,
};
use tracing::debug;

impl HostController {
    /// Apply host updates to the host model, then push their server
    /// projections out. One result per update, in input order.
    pub async fn apply_host_updates(&self, updates: &[HostModelUpdate]) -> Vec<HostUpdateResult> {
        let host_results = self.host_model.apply_host_model_updates(updates);
        self.apply_updates_to_servers(
            updates,
            &host_results,
            self.config.updates.allow_overall_rollback,
        )
        .await
    }

    /// Push already-applied host updates out to the servers they affect
    pub async fn apply_updates_to_servers(
        &self,
        updates: &[HostModelUpdate],
        host_results: &[HostUpdateApplierResponse],
        allow_overall_rollback: bool,
    ) -> Vec<HostUpdateResult> {
        self.distributor()
            .apply_updates_to_servers(updates, host_results, allow_overall_rollback)
            .await
    }

    pub async fn apply_updates_to_server(
        &self,
        server: &ServerIdentity,
        updates: &[ServerModelUpdate],
        allow_overall_rollback: bool,
    ) -> Vec<UpdateResultHandlerResponse> {
        self.distributor()
            .apply_updates_to_server(server, updates, allow_overall_rollback)
            .await
    }

    /// Apply updates to a server by name; an untracked server fails every update
    pub async fn apply_server_updates(
        &self,
        server_name: &str,
        updates: &[ServerModelUpdate],
        allow_overall_rollback: bool,
    ) -> Vec<UpdateResultHandlerResponse> {
        match self.servers.get(&server_process_name(server_name)) {
            Some(server) => server.apply_updates(updates, allow_overall_rollback).await,
            None => {
                debug!("Cannot apply updates to unknown server {}", server_name);
                UpdateResultHandlerResponse::failures(
                    updates.len(),
                    &UpdateFailure::no_server_available(server_name),
                )
            }
        }
    }

    fn distributor(&self) -> UpdateDistributor<'_> {
        UpdateDistributor::new(&self.servers).concurrent(self.config.updates.concurrent_servers)
    }
}
