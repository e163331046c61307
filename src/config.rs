use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct HostControllerConfig {
    pub host: HostConfig,
    pub lifecycle: LifecycleConfig,
    pub updates: UpdateConfig,
    pub system: SystemConfig,
    #[serde(default)]
    pub servers: Vec<ServerConfig>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct HostConfig {
    /// Name this host registers under with the domain controller
    #[serde(default = "default_host_name")]
    pub name: String,

    /// Whether this process is a fresh boot or a restart of a previous host controller
    #[serde(default)]
    pub boot_mode: BootMode,

    /// Port the host controller listens on for its servers (0 = ephemeral)
    #[serde(default = "default_controller_port")]
    pub controller_port: u16,
}

/// How the host controller came up, decided once at construction
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum BootMode {
    /// First boot: launch auto-start servers
    #[default]
    Fresh,
    /// Restarted host controller: servers are expected to reconnect
    Restart,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LifecycleConfig {
    /// How many times `start_server` re-checks a server still STARTING
    #[serde(default = "default_start_poll_attempts")]
    pub start_poll_attempts: u32,

    /// Delay between those checks in milliseconds
    #[serde(default = "default_start_poll_interval_ms")]
    pub start_poll_interval_ms: u64,

    /// Relaunch servers the supervisor reports as down
    #[serde(default)]
    pub auto_restart: bool,

    /// Relaunch attempts before a server is marked MAX_FAILED
    #[serde(default = "default_max_restarts")]
    pub max_restarts: u32,

    /// Base delay for exponential restart backoff in milliseconds
    #[serde(default = "default_restart_base_delay_ms")]
    pub restart_base_delay_ms: u64,

    /// Upper bound for the restart delay in milliseconds
    #[serde(default = "default_restart_max_delay_ms")]
    pub restart_max_delay_ms: u64,
}

impl LifecycleConfig {
    pub fn start_poll_interval(&self) -> Duration {
        Duration::from_millis(self.start_poll_interval_ms)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct UpdateConfig {
    /// Let a server roll back its already-applied updates when a later one fails
    #[serde(default = "default_allow_overall_rollback")]
    pub allow_overall_rollback: bool,

    /// Push sub-batches to different servers concurrently
    #[serde(default)]
    pub concurrent_servers: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SystemConfig {
    /// Event bus capacity
    #[serde(default = "default_event_bus_capacity")]
    pub event_bus_capacity: usize,
}

/// A server configured on this host
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ServerConfig {
    pub name: String,

    /// Server group the server belongs to
    pub group: String,

    /// Launch this server when the host boots
    #[serde(default = "default_auto_start")]
    pub auto_start: bool,

    /// Command line used to launch the server process
    #[serde(default)]
    pub command: Vec<String>,

    #[serde(default)]
    pub working_dir: Option<String>,

    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl ServerConfig {
    pub fn new<N: Into<String>, G: Into<String>>(name: N, group: G) -> Self {
        Self {
            name: name.into(),
            group: group.into(),
            auto_start: default_auto_start(),
            command: Vec::new(),
            working_dir: None,
            env: BTreeMap::new(),
        }
    }

    pub fn with_auto_start(mut self, auto_start: bool) -> Self {
        self.auto_start = auto_start;
        self
    }

    pub fn with_command<I, S>(mut self, command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.command = command.into_iter().map(Into::into).collect();
        self
    }
}

impl HostControllerConfig {
    /// Load configuration from a specific file path
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().to_string_lossy();
        debug!("Loading configuration from: {}", path_str);

        let settings = Config::builder()
            .set_default("host.name", default_host_name())?
            .set_default("host.boot_mode", "fresh")?
            .set_default("host.controller_port", default_controller_port() as i64)?
            .set_default(
                "lifecycle.start_poll_attempts",
                default_start_poll_attempts() as i64,
            )?
            .set_default(
                "lifecycle.start_poll_interval_ms",
                default_start_poll_interval_ms() as i64,
            )?
            .set_default("lifecycle.auto_restart", false)?
            .set_default("lifecycle.max_restarts", default_max_restarts() as i64)?
            .set_default(
                "lifecycle.restart_base_delay_ms",
                default_restart_base_delay_ms() as i64,
            )?
            .set_default(
                "lifecycle.restart_max_delay_ms",
                default_restart_max_delay_ms() as i64,
            )?
            .set_default(
                "updates.allow_overall_rollback",
                default_allow_overall_rollback(),
            )?
            .set_default("updates.concurrent_servers", false)?
            .set_default(
                "system.event_bus_capacity",
                default_event_bus_capacity() as i64,
            )?
            .set_default("servers", Vec::<String>::new())?
            // Add configuration file (optional)
            .add_source(File::with_name(&path_str).required(false))
            // Environment variables such as HOSTCTL_HOST__NAME
            .add_source(
                Environment::with_prefix("HOSTCTL")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: HostControllerConfig = settings.try_deserialize()?;

        info!("Configuration loaded successfully");
        debug!("Final configuration: {:#?}", config);

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.name.trim().is_empty() {
            return Err(ConfigError::Message(
                "Host name must not be empty".to_string(),
            ));
        }

        if self.lifecycle.start_poll_attempts == 0 {
            return Err(ConfigError::Message(
                "Lifecycle start_poll_attempts must be greater than 0".to_string(),
            ));
        }

        if self.lifecycle.restart_base_delay_ms > self.lifecycle.restart_max_delay_ms {
            return Err(ConfigError::Message(
                "Lifecycle restart_base_delay_ms must not exceed restart_max_delay_ms".to_string(),
            ));
        }

        if self.system.event_bus_capacity == 0 {
            return Err(ConfigError::Message(
                "Event bus capacity must be greater than 0".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for server in &self.servers {
            if server.name.trim().is_empty() {
                return Err(ConfigError::Message(
                    "Server name must not be empty".to_string(),
                ));
            }
            if server.group.trim().is_empty() {
                return Err(ConfigError::Message(format!(
                    "Server {} must belong to a server group",
                    server.name
                )));
            }
            if !seen.insert(server.name.as_str()) {
                return Err(ConfigError::Message(format!(
                    "Server {} is configured more than once",
                    server.name
                )));
            }
        }

        Ok(())
    }

    /// Render the configuration as TOML
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

impl Default for HostControllerConfig {
    fn default() -> Self {
        Self {
            host: HostConfig {
                name: default_host_name(),
                boot_mode: BootMode::default(),
                controller_port: default_controller_port(),
            },
            lifecycle: LifecycleConfig {
                start_poll_attempts: default_start_poll_attempts(),
                start_poll_interval_ms: default_start_poll_interval_ms(),
                auto_restart: false,
                max_restarts: default_max_restarts(),
                restart_base_delay_ms: default_restart_base_delay_ms(),
                restart_max_delay_ms: default_restart_max_delay_ms(),
            },
            updates: UpdateConfig {
                allow_overall_rollback: default_allow_overall_rollback(),
                concurrent_servers: false,
            },
            system: SystemConfig {
                event_bus_capacity: default_event_bus_capacity(),
            },
            servers: Vec::new(),
        }
    }
}

// Default value functions
fn default_host_name() -> String {
    "local".to_string()
}
fn default_controller_port() -> u16 {
    9999
}

fn default_start_poll_attempts() -> u32 {
    50
}
fn default_start_poll_interval_ms() -> u64 {
    100
}
fn default_max_restarts() -> u32 {
    5
}
fn default_restart_base_delay_ms() -> u64 {
    1000
}
fn default_restart_max_delay_ms() -> u64 {
    60_000
}

fn default_allow_overall_rollback() -> bool {
    true
}

fn default_event_bus_capacity() -> usize {
    256
}

fn default_auto_start() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_default_config() {
        let config = HostControllerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.host.boot_mode, BootMode::Fresh);
        assert_eq!(config.lifecycle.start_poll_interval(), Duration::from_millis(100));
        assert!(config.updates.allow_overall_rollback);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("host.toml");
        fs::write(
            &path,
            r#"
[host]
name = "node-a"
boot_mode = "restart"
controller_port = 0

[updates]
concurrent_servers = true

[[servers]]
name = "server-one"
group = "main-server-group"
command = ["/opt/app/bin/server", "--name", "server-one"]

[[servers]]
name = "server-two"
group = "other-server-group"
auto_start = false
"#,
        )
        .unwrap();

        let config = HostControllerConfig::load_from_file(&path).unwrap();
        assert_eq!(config.host.name, "node-a");
        assert_eq!(config.host.boot_mode, BootMode::Restart);
        assert_eq!(config.host.controller_port, 0);
        assert!(config.updates.concurrent_servers);
        assert!(config.updates.allow_overall_rollback);
        assert_eq!(config.lifecycle.start_poll_attempts, 50);
        assert_eq!(config.servers.len(), 2);
        assert!(config.servers[0].auto_start);
        assert_eq!(config.servers[0].command.len(), 3);
        assert!(!config.servers[1].auto_start);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = HostControllerConfig::load_from_file(dir.path().join("absent.toml")).unwrap();
        assert!(config.servers.is_empty());
        assert_eq!(config.system.event_bus_capacity, 256);
    }

    #[test]
    fn test_config_validation() {
        let mut config = HostControllerConfig::default();
        config.servers.push(ServerConfig::new("server-one", "main-server-group"));
        config.servers.push(ServerConfig::new("server-one", "other-server-group"));

        // Duplicate server names are rejected
        assert!(config.validate().is_err());

        config.servers.pop();
        assert!(config.validate().is_ok());

        config.lifecycle.start_poll_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_round_trip() {
        let mut config = HostControllerConfig::default();
        config
            .servers
            .push(ServerConfig::new("server-one", "main-server-group").with_command(["sleep", "60"]));

        let rendered = config.to_toml().unwrap();
        let parsed: HostControllerConfig = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed.servers, config.servers);
        assert_eq!(parsed.host.name, "local");
    }
}
