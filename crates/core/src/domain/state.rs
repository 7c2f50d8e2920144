// Service State Machine

use serde::{Deserialize, Serialize};

use crate::domain::error::{DomainError, Result};

/// Lifecycle state of a supervised service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServiceState {
    Stopped,
    WaitingForRemote,
    /// Initial full sync of a pipeline run
    Syncing,
    Watching,
    Restarting,
    Failed,
}

impl std::fmt::Display for ServiceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceState::Stopped => write!(f, "STOPPED"),
            ServiceState::WaitingForRemote => write!(f, "WAITING_FOR_REMOTE"),
            ServiceState::Syncing => write!(f, "SYNCING"),
            ServiceState::Watching => write!(f, "WATCHING"),
            ServiceState::Restarting => write!(f, "RESTARTING"),
            ServiceState::Failed => write!(f, "FAILED"),
        }
    }
}

impl ServiceState {
    /// Whether `self -> next` is a legal transition
    pub fn can_transition_to(self, next: ServiceState) -> bool {
        use ServiceState::*;
        matches!(
            (self, next),
            (Stopped, WaitingForRemote)
                | (WaitingForRemote, Syncing)
                | (WaitingForRemote, Stopped)
                | (Syncing, Watching)
                | (Syncing, Restarting)
                | (Syncing, Failed)
                | (Syncing, Stopped)
                | (Watching, Restarting)
                | (Watching, Failed)
                | (Watching, Stopped)
                | (Restarting, WaitingForRemote)
                | (Restarting, Failed)
                | (Restarting, Stopped)
                | (Failed, Stopped)
        )
    }

    /// Move to `next`, leaving `self` untouched on an illegal transition
    pub fn transition_to(&mut self, next: ServiceState) -> Result<()> {
        if !self.can_transition_to(next) {
            return Err(DomainError::InvalidStateTransition {
                from: self.to_string(),
                to: next.to_string(),
            });
        }
        *self = next;
        Ok(())
    }

    /// Terminal for a supervision loop
    pub fn is_terminal(self) -> bool {
        matches!(self, ServiceState::Stopped | ServiceState::Failed)
    }
}

/// Point-in-time view of one service, as published on the status board
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub name: String,
    pub state: ServiceState,
    pub restarts: u32,
    pub last_sync_at: Option<i64>, // epoch ms
    pub last_error: Option<String>,
    pub run_id: Option<String>,
    pub updated_at: i64, // epoch ms
}

impl ServiceStatus {
    pub fn new(name: impl Into<String>, now_millis: i64) -> Self {
        Self {
            name: name.into(),
            state: ServiceState::Stopped,
            restarts: 0,
            last_sync_at: None,
            last_error: None,
            run_id: None,
            updated_at: now_millis,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_transitions() {
        let mut state = ServiceState::Stopped;
        state.transition_to(ServiceState::WaitingForRemote).unwrap();
        state.transition_to(ServiceState::Syncing).unwrap();
        state.transition_to(ServiceState::Watching).unwrap();
        state.transition_to(ServiceState::Restarting).unwrap();
        state.transition_to(ServiceState::WaitingForRemote).unwrap();
        state.transition_to(ServiceState::Stopped).unwrap();
        assert_eq!(state, ServiceState::Stopped);
    }

    #[test]
    fn test_illegal_transition_keeps_state() {
        let mut state = ServiceState::Stopped;
        let err = state.transition_to(ServiceState::Watching).unwrap_err();

        assert_eq!(
            err,
            DomainError::InvalidStateTransition {
                from: "STOPPED".to_string(),
                to: "WATCHING".to_string(),
            }
        );
        assert_eq!(state, ServiceState::Stopped);
    }

    #[test]
    fn test_failed_only_leads_to_stopped() {
        let mut state = ServiceState::Failed;
        assert!(state.transition_to(ServiceState::WaitingForRemote).is_err());
        assert!(state.transition_to(ServiceState::Stopped).is_ok());
    }

    #[test]
    fn test_terminal_states() {
        assert!(ServiceState::Stopped.is_terminal());
        assert!(ServiceState::Failed.is_terminal());
        assert!(!ServiceState::Watching.is_terminal());
    }

    #[test]
    fn test_state_serializes_screaming_snake_case() {
        let json = serde_json::to_string(&ServiceState::WaitingForRemote).unwrap();
        assert_eq!(json, "\"WAITING_FOR_REMOTE\"");
    }
}
