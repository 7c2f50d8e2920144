// Port Layer - Interfaces for external dependencies

pub mod id_provider; // For deterministic run ids in tests
pub mod process_runner;
pub mod reachability;
pub mod time_provider;

// Re-exports
pub use id_provider::IdProvider;
pub use process_runner::{
    ExecutionError, ExecutionResult, ExecutionStatus, OutputLine, ProcessRunner, SpawnedProcess,
};
pub use reachability::{Reachability, ReachabilityProbe};
pub use time_provider::TimeProvider;
