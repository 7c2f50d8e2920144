// Application Layer - Supervision use cases

pub mod events;
pub mod fleet;
pub mod restart;
pub mod supervisor;
pub mod sync_worker;
pub mod watchdog;

// Re-exports
pub use events::{EventBus, EventKind, StatusBoard, SupervisorEvent, SyncTrigger};
pub use fleet::{Fleet, ServiceCheck, SyncOnceReport};
pub use restart::{RestartDecision, RestartPolicy};
pub use supervisor::{
    shutdown_channel, ShutdownSender, ShutdownToken, Supervisor, SupervisorContext,
};
pub use sync_worker::{Batch, SyncReport, SyncWorker};
pub use watchdog::{Watchdog, WatchdogVerdict};
