//! Update value types exchanged between the host model, the distributor and
//! the servers.

use crate::identity::ServerIdentity;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

/// Which part of the host configuration a host update addresses
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "name", rename_all = "snake_case")]
pub enum UpdateScope {
    /// The host's own configuration only
    Host,
    /// Every server of a server group configured on this host
    ServerGroup(String),
    /// A single server configured on this host
    Server(String),
}

/// A change applied inside a server process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerModelUpdate {
    operation: String,
    #[serde(default)]
    payload: Value,
}

impl ServerModelUpdate {
    pub fn new<S: Into<String>>(operation: S) -> Self {
        Self {
            operation: operation.into(),
            payload: Value::Null,
        }
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }
}

/// A change to the host's configuration, optionally implying one server change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostModelUpdate {
    operation: String,
    scope: UpdateScope,
    #[serde(default)]
    payload: Value,
    #[serde(default)]
    server_update: Option<ServerModelUpdate>,
}

impl HostModelUpdate {
    pub fn new<S: Into<String>>(operation: S, scope: UpdateScope) -> Self {
        Self {
            operation: operation.into(),
            scope,
            payload: Value::Null,
            server_update: None,
        }
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_server_update(mut self, server_update: ServerModelUpdate) -> Self {
        self.server_update = Some(server_update);
        self
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    pub fn scope(&self) -> &UpdateScope {
        &self.scope
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    /// The server-level projection of this update, if it affects servers at all
    pub fn server_update(&self) -> Option<&ServerModelUpdate> {
        self.server_update.as_ref()
    }
}

/// Cause attached to a failed update
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{message}")]
pub struct UpdateFailure {
    message: String,
}

impl UpdateFailure {
    pub fn new<S: Into<String>>(message: S) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn unknown_server(server: &ServerIdentity) -> Self {
        Self::new(format!("unknown server {}", server))
    }

    pub fn no_server_available(server_name: &str) -> Self {
        Self::new(format!("No server available with name {}", server_name))
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Outcome of one update on one server. Exactly one variant applies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum UpdateResultHandlerResponse {
    Succeeded(Value),
    Failed(UpdateFailure),
    RolledBack,
    Cancelled,
    TimedOut,
}

impl UpdateResultHandlerResponse {
    pub fn success(value: Value) -> Self {
        Self::Succeeded(value)
    }

    pub fn failure(cause: UpdateFailure) -> Self {
        Self::Failed(cause)
    }

    /// One identical failure response per submitted update
    pub fn failures(count: usize, cause: &UpdateFailure) -> Vec<Self> {
        (0..count).map(|_| Self::Failed(cause.clone())).collect()
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    pub fn is_timed_out(&self) -> bool {
        matches!(self, Self::TimedOut)
    }

    pub fn is_rolled_back(&self) -> bool {
        matches!(self, Self::RolledBack)
    }

    pub fn is_succeeded(&self) -> bool {
        matches!(self, Self::Succeeded(_))
    }

    pub fn failure_result(&self) -> Option<&UpdateFailure> {
        match self {
            Self::Failed(cause) => Some(cause),
            _ => None,
        }
    }

    pub fn success_result(&self) -> Option<&Value> {
        match self {
            Self::Succeeded(value) => Some(value),
            _ => None,
        }
    }

    pub fn outcome_name(&self) -> &'static str {
        match self {
            Self::Succeeded(_) => "succeeded",
            Self::Failed(_) => "failed",
            Self::RolledBack => "rolled_back",
            Self::Cancelled => "cancelled",
            Self::TimedOut => "timed_out",
        }
    }
}

/// What the host model reports after applying one host update
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct HostUpdateApplierResponse {
    servers: Vec<ServerIdentity>,
    host_failure: Option<UpdateFailure>,
}

impl HostUpdateApplierResponse {
    pub fn affecting(servers: Vec<ServerIdentity>) -> Self {
        Self {
            servers,
            host_failure: None,
        }
    }

    pub fn failed(cause: UpdateFailure) -> Self {
        Self {
            servers: Vec::new(),
            host_failure: Some(cause),
        }
    }

    pub fn servers(&self) -> &[ServerIdentity] {
        &self.servers
    }

    pub fn host_failure(&self) -> Option<&UpdateFailure> {
        self.host_failure.as_ref()
    }
}

/// Folded outcome of one host update across every server it reached.
///
/// Each `with_added_*` call consumes the accumulator and returns the next one.
/// The default value is the neutral result of an update that reached no server.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct HostUpdateResult {
    host_failure: Option<UpdateFailure>,
    outcomes: BTreeMap<ServerIdentity, UpdateResultHandlerResponse>,
}

impl HostUpdateResult {
    pub fn new() -> Self {
        Self::default()
    }

    /// Result of an update the host model itself rejected
    pub fn with_host_failure(cause: UpdateFailure) -> Self {
        Self {
            host_failure: Some(cause),
            outcomes: BTreeMap::new(),
        }
    }

    pub fn with_added_result(self, server: ServerIdentity, value: Value) -> Self {
        self.with_outcome(server, UpdateResultHandlerResponse::Succeeded(value))
    }

    pub fn with_added_failure(self, server: ServerIdentity, cause: UpdateFailure) -> Self {
        self.with_outcome(server, UpdateResultHandlerResponse::Failed(cause))
    }

    pub fn with_added_rollback(self, server: ServerIdentity) -> Self {
        self.with_outcome(server, UpdateResultHandlerResponse::RolledBack)
    }

    pub fn with_added_cancellation(self, server: ServerIdentity) -> Self {
        self.with_outcome(server, UpdateResultHandlerResponse::Cancelled)
    }

    pub fn with_added_timeout(self, server: ServerIdentity) -> Self {
        self.with_outcome(server, UpdateResultHandlerResponse::TimedOut)
    }

    /// Fold one server response into the matching outcome category
    pub fn with_added_response(
        self,
        server: ServerIdentity,
        response: UpdateResultHandlerResponse,
    ) -> Self {
        match response {
            UpdateResultHandlerResponse::Cancelled => self.with_added_cancellation(server),
            UpdateResultHandlerResponse::TimedOut => self.with_added_timeout(server),
            UpdateResultHandlerResponse::RolledBack => self.with_added_rollback(server),
            UpdateResultHandlerResponse::Failed(cause) => self.with_added_failure(server, cause),
            UpdateResultHandlerResponse::Succeeded(value) => self.with_added_result(server, value),
        }
    }

    fn with_outcome(mut self, server: ServerIdentity, outcome: UpdateResultHandlerResponse) -> Self {
        self.outcomes.insert(server, outcome);
        self
    }

    pub fn host_failure(&self) -> Option<&UpdateFailure> {
        self.host_failure.as_ref()
    }

    pub fn outcome(&self, server: &ServerIdentity) -> Option<&UpdateResultHandlerResponse> {
        self.outcomes.get(server)
    }

    pub fn outcomes(&self) -> impl Iterator<Item = (&ServerIdentity, &UpdateResultHandlerResponse)> {
        self.outcomes.iter()
    }

    /// Number of servers that reported an outcome
    pub fn server_count(&self) -> usize {
        self.outcomes.len()
    }

    /// True for an update that neither failed on the host nor reached a server
    pub fn is_neutral(&self) -> bool {
        self.host_failure.is_none() && self.outcomes.is_empty()
    }

    pub fn server_results(&self) -> BTreeMap<&ServerIdentity, &Value> {
        self.outcomes
            .iter()
            .filter_map(|(server, outcome)| outcome.success_result().map(|v| (server, v)))
            .collect()
    }

    pub fn server_failures(&self) -> BTreeMap<&ServerIdentity, &UpdateFailure> {
        self.outcomes
            .iter()
            .filter_map(|(server, outcome)| outcome.failure_result().map(|f| (server, f)))
            .collect()
    }

    pub fn rolled_back_servers(&self) -> Vec<&ServerIdentity> {
        self.servers_matching(UpdateResultHandlerResponse::is_rolled_back)
    }

    pub fn cancelled_servers(&self) -> Vec<&ServerIdentity> {
        self.servers_matching(UpdateResultHandlerResponse::is_cancelled)
    }

    pub fn timed_out_servers(&self) -> Vec<&ServerIdentity> {
        self.servers_matching(UpdateResultHandlerResponse::is_timed_out)
    }

    fn servers_matching(
        &self,
        predicate: fn(&UpdateResultHandlerResponse) -> bool,
    ) -> Vec<&ServerIdentity> {
        self.outcomes
            .iter()
            .filter(|(_, outcome)| predicate(outcome))
            .map(|(server, _)| server)
            .collect()
    }

    /// Whether anything short of success was recorded, on the host or any server
    pub fn requires_rollback(&self) -> bool {
        self.host_failure.is_some() || self.outcomes.values().any(|o| !o.is_succeeded())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn server(name: &str) -> ServerIdentity {
        ServerIdentity::new("local", "main-group", name)
    }

    #[test]
    fn test_neutral_result() {
        let result = HostUpdateResult::default();
        assert!(result.is_neutral());
        assert_eq!(result.server_count(), 0);
        assert!(!result.requires_rollback());
    }

    #[test]
    fn test_accumulates_one_outcome_per_server() {
        let result = HostUpdateResult::new()
            .with_added_result(server("a"), json!({"applied": true}))
            .with_added_failure(server("b"), UpdateFailure::new("boom"))
            .with_added_rollback(server("c"))
            .with_added_cancellation(server("d"))
            .with_added_timeout(server("e"));

        assert_eq!(result.server_count(), 5);
        assert_eq!(result.server_results().len(), 1);
        assert_eq!(
            result.server_failures().get(&server("b")).map(|f| f.message()),
            Some("boom")
        );
        assert_eq!(result.rolled_back_servers(), vec![&server("c")]);
        assert_eq!(result.cancelled_servers(), vec![&server("d")]);
        assert_eq!(result.timed_out_servers(), vec![&server("e")]);
        assert!(result.requires_rollback());
    }

    #[test]
    fn test_with_added_response_routes_by_category() {
        let responses = vec![
            UpdateResultHandlerResponse::Cancelled,
            UpdateResultHandlerResponse::TimedOut,
            UpdateResultHandlerResponse::RolledBack,
            UpdateResultHandlerResponse::Failed(UpdateFailure::new("nope")),
            UpdateResultHandlerResponse::Succeeded(json!(1)),
        ];

        let mut result = HostUpdateResult::new();
        for (i, response) in responses.into_iter().enumerate() {
            result = result.with_added_response(server(&format!("s{}", i)), response);
        }

        assert!(result.outcome(&server("s0")).unwrap().is_cancelled());
        assert!(result.outcome(&server("s1")).unwrap().is_timed_out());
        assert!(result.outcome(&server("s2")).unwrap().is_rolled_back());
        assert!(result.outcome(&server("s3")).unwrap().failure_result().is_some());
        assert_eq!(
            result.outcome(&server("s4")).unwrap().success_result(),
            Some(&json!(1))
        );
    }

    #[test]
    fn test_response_categories_are_exclusive() {
        let responses = vec![
            UpdateResultHandlerResponse::Cancelled,
            UpdateResultHandlerResponse::TimedOut,
            UpdateResultHandlerResponse::RolledBack,
            UpdateResultHandlerResponse::Failed(UpdateFailure::new("x")),
            UpdateResultHandlerResponse::Succeeded(Value::Null),
        ];

        for response in responses {
            let flags = [
                response.is_cancelled(),
                response.is_timed_out(),
                response.is_rolled_back(),
                response.failure_result().is_some(),
                response.is_succeeded(),
            ];
            assert_eq!(flags.iter().filter(|f| **f).count(), 1, "{:?}", response);
        }
    }

    #[test]
    fn test_host_failure_result() {
        let result = HostUpdateResult::with_host_failure(UpdateFailure::new("bad address"));
        assert!(!result.is_neutral());
        assert!(result.requires_rollback());
        assert_eq!(result.host_failure().map(|f| f.message()), Some("bad address"));
    }

    #[test]
    fn test_update_serializes_with_projection() {
        let update = HostModelUpdate::new("add-system-property", UpdateScope::Host)
            .with_payload(json!({"name": "test-property"}))
            .with_server_update(ServerModelUpdate::new("add-system-property"));

        let encoded = serde_json::to_string(&update).unwrap();
        let decoded: HostModelUpdate = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, update);
        assert_eq!(
            decoded.server_update().map(|u| u.operation()),
            Some("add-system-property")
        );
    }
}
