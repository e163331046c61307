use thiserror::Error;

#[derive(Error, Debug)]
pub enum HostControllerError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("Deserialization error: {0}")]
    Deserialization(#[from] toml::de::Error),

    #[error("System error: {message}")]
    System { message: String },

    #[error("Process supervisor error for {process}: {message}")]
    Supervisor { process: String, message: String },

    #[error("No server named {name} is configured on this host")]
    UnknownServer { name: String },

    #[error("Server process {process} is already registered")]
    AlreadyRegistered { process: String },

    #[error("Domain controller connection error: {message}")]
    DomainConnection { message: String },

    #[error("Host controller startup failed: {message}")]
    Startup { message: String },

    #[error("Event bus error: {0}")]
    EventBus(#[from] EventBusError),
}

impl HostControllerError {
    pub fn system<S: Into<String>>(message: S) -> Self {
        Self::System {
            message: message.into(),
        }
    }

    pub fn supervisor<P: Into<String>, S: Into<String>>(process: P, message: S) -> Self {
        Self::Supervisor {
            process: process.into(),
            message: message.into(),
        }
    }

    pub fn unknown_server<S: Into<String>>(name: S) -> Self {
        Self::UnknownServer { name: name.into() }
    }

    pub fn startup<S: Into<String>>(message: S) -> Self {
        Self::Startup {
            message: message.into(),
        }
    }
}

/// Errors raised by the event bus
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EventBusError {
    #[error("Event bus channel closed")]
    ChannelClosed,

    #[error("Receiver lagged behind by {count} events")]
    Lagged { count: u64 },

    #[error("Failed to publish event: {details}")]
    PublishFailed { details: String },
}

pub type Result<T> = std::result::Result<T, HostControllerError>;
