//! Action engine for Guardian.
//!
//! Validates requested OS actions against the safety policy, gates risky
//! ones on approval, snapshots state before acting, rolls back on failure,
//! and records every attempt in the audit log.

pub mod actions;
pub mod audit;
pub mod error;
pub mod executor;
pub mod params;
pub mod platform;
pub mod policy;
pub mod profile;
pub mod rollback;
pub mod snapshot;
pub mod state_machine;
pub mod types;

pub use actions::{Action, ActionRegistry, ExecutionContext};
pub use audit::AuditLog;
pub use error::{ActionError, PlatformError, ProfileError, StateError, ValidationError};
pub use executor::{Executor, ExecutorSettings};
pub use platform::{NativeSystem, ScriptedSystem, SystemControl};
pub use policy::SafetyPolicy;
pub use profile::{apply_profile, Profile, ProfileManager, ProfileReport, ProfileStep};
pub use rollback::{RollbackEngine, RollbackEntry};
pub use snapshot::{Snapshot, SnapshotStore};
pub use state_machine::DispatchState;
pub use types::{
    ActionKind, ActionLogRecord, ActionMetadata, ActionResult, ActionStatus, AutomationLevel,
    ErrorCode, Parameters, RiskLevel,
};
