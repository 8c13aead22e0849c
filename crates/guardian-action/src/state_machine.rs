//! Dispatch state machine with validated transitions.
//!
//! Enforces the lifecycle of a single dispatch:
//! Pending -> Validating -> Rejected | AwaitingApproval | Running
//! Running -> Success | Failed
//! Failed -> RolledBack

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::StateError;
use crate::types::ActionStatus;

/// In-flight state of one dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchState {
    Pending,
    Validating,
    Rejected,
    AwaitingApproval,
    Running,
    Success,
    Failed,
    RolledBack,
}

impl DispatchState {
    /// The durable status this state is recorded as.
    pub fn status(&self) -> ActionStatus {
        match self {
            DispatchState::Pending
            | DispatchState::Validating
            | DispatchState::AwaitingApproval => ActionStatus::Pending,
            DispatchState::Running => ActionStatus::Running,
            DispatchState::Success => ActionStatus::Success,
            DispatchState::Rejected | DispatchState::Failed => ActionStatus::Failed,
            DispatchState::RolledBack => ActionStatus::RolledBack,
        }
    }

    /// No further transition is possible within this dispatch.
    ///
    /// `Failed` is excluded: it may still move to `RolledBack`.
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            DispatchState::Rejected
                | DispatchState::AwaitingApproval
                | DispatchState::Success
                | DispatchState::RolledBack
        )
    }
}

impl fmt::Display for DispatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchState::Pending => write!(f, "pending"),
            DispatchState::Validating => write!(f, "validating"),
            DispatchState::Rejected => write!(f, "rejected"),
            DispatchState::AwaitingApproval => write!(f, "awaiting_approval"),
            DispatchState::Running => write!(f, "running"),
            DispatchState::Success => write!(f, "success"),
            DispatchState::Failed => write!(f, "failed"),
            DispatchState::RolledBack => write!(f, "rolled_back"),
        }
    }
}

/// Validate that a dispatch transition is allowed.
///
/// Valid transitions:
/// - Pending -> Validating
/// - Pending -> Rejected (no execution slot)
/// - Validating -> Rejected
/// - Validating -> AwaitingApproval
/// - Validating -> Running
/// - Running -> Success
/// - Running -> Failed
/// - Failed -> RolledBack
pub fn validate_transition(from: DispatchState, to: DispatchState) -> Result<(), StateError> {
    let valid = matches!(
        (from, to),
        (DispatchState::Pending, DispatchState::Validating)
            | (DispatchState::Pending, DispatchState::Rejected)
            | (DispatchState::Validating, DispatchState::Rejected)
            | (DispatchState::Validating, DispatchState::AwaitingApproval)
            | (DispatchState::Validating, DispatchState::Running)
            | (DispatchState::Running, DispatchState::Success)
            | (DispatchState::Running, DispatchState::Failed)
            | (DispatchState::Failed, DispatchState::RolledBack)
    );

    if valid {
        Ok(())
    } else {
        Err(StateError::InvalidTransition(from, to))
    }
}
