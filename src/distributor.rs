//! Fans a batch of host updates out to the affected servers and folds the
//! per-server responses back into one result per host update.

use crate::identity::ServerIdentity;
use crate::server::ServerRegistry;
use crate::update::{
    HostModelUpdate, HostUpdateApplierResponse, HostUpdateResult, ServerModelUpdate,
    UpdateFailure, UpdateResultHandlerResponse,
};
use futures::future::join_all;
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, info_span, warn, Instrument};
use uuid::Uuid;

/// Position of a host update within its batch
pub type UpdateToken = usize;

/// Ordered server updates for one server, each tagged with its host update
pub type ServerBatch<'u> = Vec<(UpdateToken, &'u ServerModelUpdate)>;

/// Updates grouped per server plus the results of updates that reach no server
pub struct DistributionPlan<'u> {
    pub by_server: BTreeMap<ServerIdentity, ServerBatch<'u>>,
    pub results: Vec<HostUpdateResult>,
}

/// Group server projections by affected server.
///
/// Each update's projection is taken once. Updates rejected by the host model
/// carry their host failure and are not pushed anywhere; updates without a
/// projection keep the neutral result.
pub fn plan_distribution<'u>(
    updates: &'u [HostModelUpdate],
    host_results: &[HostUpdateApplierResponse],
) -> DistributionPlan<'u> {
    if host_results.len() != updates.len() {
        warn!(
            "Host model returned {} responses for {} updates",
            host_results.len(),
            updates.len()
        );
    }

    let mut results = vec![HostUpdateResult::default(); updates.len()];
    let mut by_server: BTreeMap<ServerIdentity, ServerBatch<'u>> = BTreeMap::new();

    for (token, update) in updates.iter().enumerate() {
        let Some(host_result) = host_results.get(token) else {
            continue;
        };

        if let Some(cause) = host_result.host_failure() {
            results[token] = HostUpdateResult::with_host_failure(cause.clone());
            continue;
        }

        let Some(server_update) = update.server_update() else {
            continue;
        };

        let mut seen = HashSet::new();
        for server in host_result.servers() {
            if seen.insert(server) {
                by_server
                    .entry(server.clone())
                    .or_default()
                    .push((token, server_update));
            }
        }
    }

    DistributionPlan { by_server, results }
}

/// Pushes planned sub-batches to the servers tracked in a registry
pub struct UpdateDistributor<'r> {
    registry: &'r ServerRegistry,
    concurrent: bool,
}

impl<'r> UpdateDistributor<'r> {
    pub fn new(registry: &'r ServerRegistry) -> Self {
        Self {
            registry,
            concurrent: false,
        }
    }

    /// Push to different servers at the same time
    pub fn concurrent(mut self, concurrent: bool) -> Self {
        self.concurrent = concurrent;
        self
    }

    /// One result per host update, in input order
    pub async fn apply_updates_to_servers(
        &self,
        updates: &[HostModelUpdate],
        host_results: &[HostUpdateApplierResponse],
        allow_overall_rollback: bool,
    ) -> Vec<HostUpdateResult> {
        let batch_id = Uuid::new_v4();
        let span = info_span!("distribute", batch = %batch_id, updates = updates.len());

        async move {
            let DistributionPlan {
                by_server,
                mut results,
            } = plan_distribution(updates, host_results);

            debug!("Distributing to {} servers", by_server.len());

            let responses: Vec<(&ServerIdentity, &ServerBatch<'_>, Vec<UpdateResultHandlerResponse>)> =
                if self.concurrent {
                    join_all(by_server.iter().map(|(server, batch)| async move {
                        let responses = self
                            .apply_batch(server, batch, allow_overall_rollback)
                            .await;
                        (server, batch, responses)
                    }))
                    .await
                } else {
                    let mut collected = Vec::with_capacity(by_server.len());
                    for (server, batch) in &by_server {
                        let responses = self
                            .apply_batch(server, batch, allow_overall_rollback)
                            .await;
                        collected.push((server, batch, responses));
                    }
                    collected
                };

            for (server, batch, responses) in responses {
                for ((token, _), response) in batch.iter().zip(responses) {
                    let accumulated = std::mem::take(&mut results[*token]);
                    results[*token] = accumulated.with_added_response(server.clone(), response);
                }
            }

            results
        }
        .instrument(span)
        .await
    }

    /// Apply updates to one server; an untracked server fails every update
    pub async fn apply_updates_to_server(
        &self,
        server: &ServerIdentity,
        updates: &[ServerModelUpdate],
        allow_overall_rollback: bool,
    ) -> Vec<UpdateResultHandlerResponse> {
        match self.registry.get(&server.process_name()) {
            Some(handle) => handle.apply_updates(updates, allow_overall_rollback).await,
            None => {
                debug!("Cannot apply updates to unknown server {}", server);
                UpdateResultHandlerResponse::failures(
                    updates.len(),
                    &UpdateFailure::unknown_server(server),
                )
            }
        }
    }

    async fn apply_batch(
        &self,
        server: &ServerIdentity,
        batch: &ServerBatch<'_>,
        allow_overall_rollback: bool,
    ) -> Vec<UpdateResultHandlerResponse> {
        let updates: Vec<ServerModelUpdate> =
            batch.iter().map(|(_, update)| (*update).clone()).collect();
        self.apply_updates_to_server(server, &updates, allow_overall_rollback)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::executor::{MockUpdateExecutor, ServerUpdateExecutor};
    use crate::server::ManagedServer;
    use crate::supervisor::MockSupervisor;
    use crate::update::UpdateScope;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    fn identity(name: &str) -> ServerIdentity {
        ServerIdentity::new("local", "main-server-group", name)
    }

    fn registry_with(names: &[&str], executor: Arc<MockUpdateExecutor>) -> ServerRegistry {
        let registry = ServerRegistry::new();
        let supervisor = Arc::new(MockSupervisor::new());
        let executor: Arc<dyn ServerUpdateExecutor> = executor;
        for name in names {
            registry
                .insert(Arc::new(ManagedServer::new(
                    "local",
                    ServerConfig::new(*name, "main-server-group"),
                    supervisor.clone(),
                    Arc::clone(&executor),
                )))
                .unwrap();
        }
        registry
    }

    fn projected(operation: &str) -> HostModelUpdate {
        HostModelUpdate::new(operation, UpdateScope::ServerGroup("main-server-group".into()))
            .with_server_update(ServerModelUpdate::new(operation))
    }

    #[test]
    fn test_plan_groups_by_server_in_order() {
        let updates = vec![projected("u0"), projected("u1"), projected("u2")];
        let host_results = vec![
            HostUpdateApplierResponse::affecting(vec![identity("a"), identity("b")]),
            HostUpdateApplierResponse::affecting(vec![identity("b")]),
            HostUpdateApplierResponse::affecting(vec![identity("a"), identity("a")]),
        ];

        let plan = plan_distribution(&updates, &host_results);

        let tokens = |name: &str| -> Vec<UpdateToken> {
            plan.by_server[&identity(name)]
                .iter()
                .map(|(token, _)| *token)
                .collect()
        };
        // A server listed twice for the same update is counted once
        assert_eq!(tokens("a"), vec![0, 2]);
        assert_eq!(tokens("b"), vec![0, 1]);
        assert!(plan.results.iter().all(|r| r.is_neutral()));
    }

    #[test]
    fn test_plan_keeps_host_failures() {
        let updates = vec![projected("u0"), projected("u1")];
        let host_results = vec![
            HostUpdateApplierResponse::failed(UpdateFailure::new("rejected")),
            HostUpdateApplierResponse::affecting(vec![identity("a")]),
        ];

        let plan = plan_distribution(&updates, &host_results);
        assert_eq!(
            plan.results[0].host_failure().map(|f| f.message()),
            Some("rejected")
        );
        assert_eq!(plan.by_server.len(), 1);
        assert_eq!(plan.by_server[&identity("a")][0].0, 1);
    }

    #[tokio::test]
    async fn test_update_without_projection_is_neutral() {
        let executor = Arc::new(MockUpdateExecutor::new());
        let registry = registry_with(&["a"], executor.clone());

        let updates = vec![
            projected("u0"),
            HostModelUpdate::new("host-only", UpdateScope::Host),
            projected("u2"),
        ];
        let host_results = vec![
            HostUpdateApplierResponse::affecting(vec![identity("a")]),
            HostUpdateApplierResponse::affecting(vec![identity("a")]),
            HostUpdateApplierResponse::affecting(vec![identity("a")]),
        ];

        let results = UpdateDistributor::new(&registry)
            .apply_updates_to_servers(&updates, &host_results, true)
            .await;

        assert_eq!(results.len(), 3);
        assert!(!results[0].is_neutral());
        assert!(results[1].is_neutral());
        assert_eq!(results[2].server_count(), 1);

        // The server saw only the projected updates, in order
        assert_eq!(executor.calls()[0].operations, vec!["u0", "u2"]);
    }

    #[tokio::test]
    async fn test_outcomes_fold_into_their_update() {
        let executor = Arc::new(MockUpdateExecutor::new());
        executor.script(
            "a",
            vec![
                UpdateResultHandlerResponse::success(json!("a0")),
                UpdateResultHandlerResponse::Cancelled,
            ],
        );
        executor.script(
            "b",
            vec![
                UpdateResultHandlerResponse::TimedOut,
                UpdateResultHandlerResponse::RolledBack,
            ],
        );
        let registry = registry_with(&["a", "b"], executor.clone());

        let updates = vec![projected("u0"), projected("u1")];
        let host_results = vec![
            HostUpdateApplierResponse::affecting(vec![identity("a"), identity("b")]),
            HostUpdateApplierResponse::affecting(vec![identity("a"), identity("b")]),
        ];

        let results = UpdateDistributor::new(&registry)
            .apply_updates_to_servers(&updates, &host_results, false)
            .await;

        assert_eq!(results[0].server_count(), 2);
        assert_eq!(
            results[0].outcome(&identity("a")).unwrap().success_result(),
            Some(&json!("a0"))
        );
        assert!(results[0].outcome(&identity("b")).unwrap().is_timed_out());
        assert_eq!(results[1].cancelled_servers(), vec![&identity("a")]);
        assert_eq!(results[1].rolled_back_servers(), vec![&identity("b")]);

        assert!(executor.calls().iter().all(|c| !c.allow_overall_rollback));
    }

    #[tokio::test]
    async fn test_unknown_server_fails_each_update() {
        let executor = Arc::new(MockUpdateExecutor::new());
        let registry = registry_with(&["a"], executor.clone());

        let updates = vec![projected("u0"), projected("u1")];
        let host_results = vec![
            HostUpdateApplierResponse::affecting(vec![identity("a"), identity("ghost")]),
            HostUpdateApplierResponse::affecting(vec![identity("ghost")]),
        ];

        let results = UpdateDistributor::new(&registry)
            .apply_updates_to_servers(&updates, &host_results, true)
            .await;

        assert_eq!(results[0].server_count(), 2);
        assert!(results[0].server_failures().contains_key(&identity("ghost")));
        assert!(results[0].outcome(&identity("a")).unwrap().is_succeeded());
        assert_eq!(results[1].server_failures().len(), 1);
        assert!(executor.calls_for("ghost").is_empty());
    }

    #[tokio::test]
    async fn test_short_host_response_list() {
        let executor = Arc::new(MockUpdateExecutor::new());
        let registry = registry_with(&["a"], executor);

        let updates = vec![projected("u0"), projected("u1")];
        let host_results = vec![HostUpdateApplierResponse::affecting(vec![identity("a")])];

        let results = UpdateDistributor::new(&registry)
            .apply_updates_to_servers(&updates, &host_results, true)
            .await;

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].server_count(), 1);
        assert!(results[1].is_neutral());
    }

    #[tokio::test]
    async fn test_concurrent_dispatch_reaches_every_server() {
        let executor =
            Arc::new(MockUpdateExecutor::new().with_delay(Duration::from_millis(20)));
        let registry = registry_with(&["a", "b", "c"], executor.clone());

        let updates = vec![projected("u0")];
        let host_results = vec![HostUpdateApplierResponse::affecting(vec![
            identity("a"),
            identity("b"),
            identity("c"),
        ])];

        let results = UpdateDistributor::new(&registry)
            .concurrent(true)
            .apply_updates_to_servers(&updates, &host_results, true)
            .await;

        assert_eq!(results[0].server_count(), 3);
        assert_eq!(results[0].server_results().len(), 3);
        assert!(executor.max_in_flight() > 1);
    }
}
