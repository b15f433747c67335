//! Error types for the alarm engine.

use reveille_core::error::ReveilleError;
use reveille_core::pattern::PatternError;
use reveille_core::types::{EntityRef, ItemId};

use crate::session::SessionState;

/// Errors returned by the command surface and its collaborators.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Item not found: {0}")]
    NotFound(ItemId),
    #[error("Invalid state: {0}")]
    InvalidState(String),
    #[error("Entity not in activation allow-list: {0}")]
    PolicyViolation(EntityRef),
    #[error("Invalid pattern: {0}")]
    Pattern(#[from] PatternError),
    #[error("Device command failed: {0}")]
    DeviceCommand(#[from] DeviceCommandError),
    #[error("Validation failed: {0}")]
    Validation(String),
    #[error("Storage error: {0}")]
    Persistence(#[from] ReveilleError),
}

impl EngineError {
    /// Whether the same request may succeed if repeated later.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            EngineError::DeviceCommand(_) | EngineError::Persistence(_)
        )
    }
}

/// A command to a media device or switchable entity did not succeed.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DeviceCommandError {
    #[error("{target}: {message}")]
    Failed { target: String, message: String },
    #[error("{target}: no response after {after_ms} ms")]
    TimedOut { target: String, after_ms: u64 },
}

/// Too many unclassifiable device events arrived within the noise window.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{count} unclassifiable device events within {window_secs}s")]
pub struct ClassificationAmbiguous {
    pub count: usize,
    pub window_secs: u64,
}

/// Errors from the playback session state machine.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Invalid session transition: {0} -> {1}")]
    InvalidTransition(SessionState, SessionState),
}
