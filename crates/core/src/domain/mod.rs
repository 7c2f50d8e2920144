// Domain Layer - Pure model of services, states and failures

pub mod command;
pub mod error;
pub mod failure;
pub mod service;
pub mod state;

// Re-exports
pub use command::CommandSpec;
pub use error::DomainError;
pub use failure::{Detection, FailureDetector, FailureKind, FailurePattern, SyncOutcome};
pub use service::{
    RemoteEndpoint, ServiceName, ServiceSpec, SupervisionSettings, ToolPaths, WatchSettings,
};
pub use state::{ServiceState, ServiceStatus};
