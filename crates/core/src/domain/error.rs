// Domain Error Types

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    #[error("Invalid service state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Invalid service '{service}': {reason}")]
    InvalidService { service: String, reason: String },

    #[error("Validation error: {0}")]
    ValidationError(String),
}

pub type Result<T> = std::result::Result<T, DomainError>;
