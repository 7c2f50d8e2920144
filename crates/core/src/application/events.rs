//! Supervisor events and the shared status board
//!
//! Supervisors publish every state change and sync result on an [`EventBus`]
//! (for live terminal output) and keep a [`StatusBoard`] entry current (for
//! snapshots and the status file).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast;

use crate::application::supervisor::constants::EVENT_CHANNEL_CAPACITY;
use crate::domain::{FailureKind, ServiceState, ServiceStatus};

/// Why a sync ran
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncTrigger {
    /// First full sync of a pipeline run
    Initial,
    /// Change batch reported by the watcher
    Change,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    StateChanged {
        from: ServiceState,
        to: ServiceState,
    },
    SyncCompleted {
        duration_ms: i64,
        trigger: SyncTrigger,
        /// rsync partial-transfer exit code, if any
        partial: Option<i32>,
    },
    SyncFailed {
        kind: FailureKind,
        reason: String,
    },
    RemoteUnreachable {
        reason: String,
    },
    Restarting {
        attempt: u32,
        delay_ms: u64,
    },
    GaveUp {
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupervisorEvent {
    pub service: String,
    pub run_id: Option<String>,
    pub at: i64, // epoch ms
    pub kind: EventKind,
}

/// Broadcast fan-out of supervisor events
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SupervisorEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Publish an event; silently dropped when nobody subscribes
    pub fn publish(&self, event: SupervisorEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SupervisorEvent> {
        self.tx.subscribe()
    }
}

/// Latest status per service
#[derive(Clone, Default)]
pub struct StatusBoard {
    inner: Arc<RwLock<BTreeMap<String, ServiceStatus>>>,
}

impl StatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&self, status: ServiceStatus) {
        let mut map = self.inner.write().unwrap_or_else(|e| e.into_inner());
        map.insert(status.name.clone(), status);
    }

    pub fn get(&self, service: &str) -> Option<ServiceStatus> {
        let map = self.inner.read().unwrap_or_else(|e| e.into_inner());
        map.get(service).cloned()
    }

    /// All statuses, ordered by service name
    pub fn snapshot(&self) -> Vec<ServiceStatus> {
        let map = self.inner.read().unwrap_or_else(|e| e.into_inner());
        map.values().cloned().collect()
    }
}
