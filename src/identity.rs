use serde::{Deserialize, Serialize};
use std::fmt;

/// Prefix the host uses when naming server processes at the supervisor
pub const SERVER_PROCESS_PREFIX: &str = "Server:";

/// Identifies one server: the host it runs on, its group and its name
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ServerIdentity {
    host_name: String,
    server_group_name: String,
    server_name: String,
}

impl ServerIdentity {
    pub fn new<H, G, S>(host_name: H, server_group_name: G, server_name: S) -> Self
    where
        H: Into<String>,
        G: Into<String>,
        S: Into<String>,
    {
        Self {
            host_name: host_name.into(),
            server_group_name: server_group_name.into(),
            server_name: server_name.into(),
        }
    }

    pub fn host_name(&self) -> &str {
        &self.host_name
    }

    pub fn server_group_name(&self) -> &str {
        &self.server_group_name
    }

    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    /// Supervisor process name for this server
    pub fn process_name(&self) -> String {
        server_process_name(&self.server_name)
    }
}

impl fmt::Display for ServerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.host_name, self.server_group_name, self.server_name
        )
    }
}

/// Derive the supervisor process name of a server
pub fn server_process_name(server_name: &str) -> String {
    format!("{}{}", SERVER_PROCESS_PREFIX, server_name)
}

/// Recover the server name from a supervisor process name, if it names a server
pub fn server_name_from_process(process_name: &str) -> Option<&str> {
    process_name
        .strip_prefix(SERVER_PROCESS_PREFIX)
        .filter(|name| !name.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_process_name_round_trip() {
        let name = server_process_name("server-one");
        assert_eq!(name, "Server:server-one");
        assert_eq!(server_name_from_process(&name), Some("server-one"));
        assert_eq!(server_name_from_process("HostController"), None);
        assert_eq!(server_name_from_process("Server:"), None);
    }

    #[test]
    fn test_identity_equality_uses_all_fields() {
        let a = ServerIdentity::new("host", "main-group", "server-one");
        let b = ServerIdentity::new("host", "main-group", "server-one");
        let other_group = ServerIdentity::new("host", "other-group", "server-one");
        let other_host = ServerIdentity::new("elsewhere", "main-group", "server-one");

        assert_eq!(a, b);
        assert_ne!(a, other_group);
        assert_ne!(a, other_host);

        let set: HashSet<_> = [a.clone(), b, other_group, other_host].into_iter().collect();
        assert_eq!(set.len(), 3);
        assert_eq!(a.process_name(), "Server:server-one");
        assert_eq!(a.to_string(), "host/main-group/server-one");
    }
}
