//! Error types for the action engine.

use guardian_core::error::GuardianError;

use crate::state_machine::DispatchState;
use crate::types::ErrorCode;

/// Errors from action construction and audit conversion.
#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    #[error("Unknown action kind: {0}")]
    UnknownKind(String),
    #[error("Invalid audit record: {0}")]
    InvalidRecord(String),
    #[error("Storage error: {0}")]
    Storage(#[from] GuardianError),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error(transparent)]
    State(#[from] StateError),
    #[error("Executor is shutting down")]
    Closed,
}

/// Reasons an action is rejected before any side effect.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("Target {0} is protected")]
    Protected(String),
    #[error("Missing required parameter: {0}")]
    MissingParameter(&'static str),
    #[error("Invalid parameter {name}: {reason}")]
    InvalidParameter { name: &'static str, reason: String },
    #[error("Target {0} not found")]
    TargetNotFound(String),
    #[error("{0}")]
    Unsupported(String),
}

/// Failures reported by the operating-system collaborator.
#[derive(Debug, thiserror::Error)]
pub enum PlatformError {
    #[error("Operation not supported on this platform: {0}")]
    Unsupported(String),
    #[error("Process {0} not found")]
    ProcessNotFound(u32),
    #[error("Permission denied: {0}")]
    PermissionDenied(String),
    #[error("Command `{command}` failed: {stderr}")]
    CommandFailed { command: String, stderr: String },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{0} did not finish before the deadline")]
    TimedOut(&'static str),
    #[error("{0}")]
    Failed(String),
}

impl PlatformError {
    /// The result code a failure of this kind surfaces as.
    pub fn code(&self) -> ErrorCode {
        match self {
            PlatformError::Unsupported(_) => ErrorCode::UnsupportedPlatform,
            PlatformError::ProcessNotFound(_) => ErrorCode::ProcessNotFound,
            PlatformError::TimedOut(_) => ErrorCode::DeadlineExceeded,
            _ => ErrorCode::ExecutionFailed,
        }
    }
}

/// Invalid dispatch lifecycle transitions.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("Invalid state transition: {0} -> {1}")]
    InvalidTransition(DispatchState, DispatchState),
}

/// Errors from profile storage and application.
#[derive(Debug, thiserror::Error)]
pub enum ProfileError {
    #[error("Profile not found: {0}")]
    NotFound(String),
    #[error("Profile {0} is disabled")]
    Disabled(String),
    #[error("Invalid profile name: {0}")]
    InvalidName(String),
    #[error("Profile {profile} step {index}: {reason}")]
    InvalidStep {
        profile: String,
        index: usize,
        reason: String,
    },
    #[error("Failed to parse profile: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Failed to serialize profile: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
