mod managed;
mod registry;
mod state;


pub use managed::{ManagedServer, ServerSnapshot, StateDiagnostic};
pub use registry::ServerRegistry;
pub use state::{ServerState, ServerStatus};
