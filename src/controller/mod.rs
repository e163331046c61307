//! The host controller: tracks the servers of one host, drives their
//! lifecycle from supervisor notifications and routes model updates to them.

mod domain;
mod host;
mod lifecycle;
mod operations;
mod runtime;
mod shutdown;
mod startup;
mod types;
mod updates;


pub use domain::{DomainControllerConnection, MockDomainConnection};
pub use host::{HostController, HostControllerBuilder};
pub use types::ShutdownReason;
