use thiserror::Error;
use ulid::Ulid;

use crate::model::{Action, Status};

#[derive(Debug, Error)]
pub enum EngineError {
    /// Malformed or out-of-range input.
    #[error("invalid input: {0}")]
    Validation(String),
    #[error("unknown user: {0}")]
    UnknownUser(Ulid),
    #[error("not found: {0}")]
    NotFound(Ulid),
    #[error("already exists: {0}")]
    AlreadyExists(Ulid),
    #[error("cannot {action} an appointment that is {from}")]
    InvalidTransition { from: Status, action: Action },
    #[error("user {actor} may not {action}")]
    Forbidden { actor: Ulid, action: &'static str },
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    /// The write-ahead log could not be written. Nothing was applied; safe to retry.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),
}

impl EngineError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::StoreUnavailable(_))
    }
}
