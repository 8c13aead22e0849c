//! Action variants and the registry that builds them.
//!
//! Every variant implements `Action`. The executor only ever sees
//! `Box<dyn Action>`; the registry maps an `ActionKind` to a constructor
//! and injects the shared `SystemControl`.

pub mod brightness;
pub mod clear_ram;
pub mod close_process;
pub mod cpu_affinity;
pub mod disk_cleanup;
pub mod hibernate;
pub mod kill_process;
pub mod power_plan;
pub mod process;
pub mod set_priority;
pub mod sleep;
pub mod start_process;

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use uuid::Uuid;

use crate::error::{ActionError, PlatformError, ValidationError};
use crate::platform::SystemControl;
use crate::policy::SafetyPolicy;
use crate::snapshot::Snapshot;
use crate::types::{ActionKind, ActionResult, ErrorCode, Parameters, RiskLevel};

pub use brightness::DisplayBrightness;
pub use clear_ram::ClearRam;
pub use close_process::CloseProcess;
pub use cpu_affinity::SetCpuAffinity;
pub use disk_cleanup::DiskCleanup;
pub use hibernate::Hibernate;
pub use kill_process::KillProcess;
pub use power_plan::SetPowerPlan;
pub use set_priority::SetPriority;
pub use sleep::Sleep;
pub use start_process::StartProcess;

// =============================================================================
// Execution context
// =============================================================================

/// Per-dispatch execution bounds handed to `Action::execute`.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub action_id: Uuid,
    deadline: Instant,
    /// How long a process gets to exit before it is force-killed.
    pub graceful_timeout: Duration,
}

impl ExecutionContext {
    pub fn new(action_id: Uuid, timeout: Duration, graceful_timeout: Duration) -> Self {
        Self {
            action_id,
            deadline: Instant::now() + timeout,
            graceful_timeout,
        }
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Time left before the deadline, zero once it has passed.
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn expired(&self) -> bool {
        Instant::now() >= self.deadline
    }

    /// Run one OS call bounded by the deadline.
    pub async fn bounded<T, F>(&self, fut: F) -> Result<T, ActionResult>
    where
        F: Future<Output = Result<T, PlatformError>>,
    {
        match tokio::time::timeout_at(self.deadline, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(platform_failure(&e)),
            Err(_) => Err(ActionResult::failure(
                "Operation did not finish before the deadline",
                ErrorCode::DeadlineExceeded,
            )),
        }
    }
}

/// Map a platform error to a failed result with the matching code.
pub fn platform_failure(err: &PlatformError) -> ActionResult {
    ActionResult::failure(err.to_string(), err.code())
}

// =============================================================================
// Action trait
// =============================================================================

/// A single reversible-or-not unit of OS work.
///
/// `validate` must not cause side effects. `execute` and `rollback` report
/// every failure through the returned `ActionResult`.
#[async_trait]
pub trait Action: Send + Sync {
    fn kind(&self) -> ActionKind;

    fn target(&self) -> &str;

    fn parameters(&self) -> &Parameters;

    /// Risk of running this action under `policy`.
    fn risk_level(&self, policy: &SafetyPolicy) -> RiskLevel;

    /// Whether `rollback` can undo `execute`.
    fn can_rollback(&self) -> bool {
        true
    }

    /// Human-readable description of what the action will change.
    fn estimated_impact(&self) -> Option<String> {
        None
    }

    async fn validate(&self, policy: &SafetyPolicy) -> Result<(), ValidationError>;

    async fn execute(&self, ctx: &ExecutionContext) -> ActionResult;

    async fn rollback(&self, _snapshot: &Snapshot) -> ActionResult {
        ActionResult::failure(
            format!("Rollback not implemented for {}", self.kind()),
            ErrorCode::NotImplemented,
        )
    }
}

/// Whether the executor may roll `action` back: the action must support it
/// and must not be high risk under `policy`.
pub fn rollback_eligible(action: &dyn Action, policy: &SafetyPolicy) -> bool {
    action.can_rollback() && action.risk_level(policy) != RiskLevel::High
}

// =============================================================================
// Registry
// =============================================================================

/// Builds an action from its target, parameters and the OS collaborator.
pub type Constructor = fn(String, Parameters, Arc<dyn SystemControl>) -> Box<dyn Action>;

/// Maps action kinds to constructors.
pub struct ActionRegistry {
    system: Arc<dyn SystemControl>,
    constructors: HashMap<ActionKind, Constructor>,
}

impl ActionRegistry {
    /// An empty registry.
    pub fn new(system: Arc<dyn SystemControl>) -> Self {
        Self {
            system,
            constructors: HashMap::new(),
        }
    }

    /// A registry with every built-in kind registered.
    pub fn with_defaults(system: Arc<dyn SystemControl>) -> Self {
        let mut registry = Self::new(system);
        registry.register_defaults();
        registry
    }

    pub fn register(&mut self, kind: ActionKind, constructor: Constructor) {
        self.constructors.insert(kind, constructor);
    }

    pub fn register_defaults(&mut self) {
        self.register(ActionKind::CloseProcess, |t, p, s| {
            Box::new(CloseProcess::new(t, p, s))
        });
        self.register(ActionKind::StartProcess, |t, p, s| {
            Box::new(StartProcess::new(t, p, s))
        });
        self.register(ActionKind::SetPriority, |t, p, s| {
            Box::new(SetPriority::new(t, p, s))
        });
        self.register(ActionKind::KillProcess, |t, p, s| {
            Box::new(KillProcess::new(t, p, s))
        });
        self.register(ActionKind::ClearRam, |t, p, s| Box::new(ClearRam::new(t, p, s)));
        self.register(ActionKind::SetCpuAffinity, |t, p, s| {
            Box::new(SetCpuAffinity::new(t, p, s))
        });
        self.register(ActionKind::DiskCleanup, |t, p, s| {
            Box::new(DiskCleanup::new(t, p, s))
        });
        self.register(ActionKind::PowerPlan, |t, p, s| {
            Box::new(SetPowerPlan::new(t, p, s))
        });
        self.register(ActionKind::DisplayBrightness, |t, p, s| {
            Box::new(DisplayBrightness::new(t, p, s))
        });
        self.register(ActionKind::Sleep, |t, p, s| Box::new(Sleep::new(t, p, s)));
        self.register(ActionKind::Hibernate, |t, p, s| Box::new(Hibernate::new(t, p, s)));
    }

    pub fn create(
        &self,
        kind: ActionKind,
        target: impl Into<String>,
        parameters: Parameters,
    ) -> Result<Box<dyn Action>, ActionError> {
        let constructor = self
            .constructors
            .get(&kind)
            .ok_or_else(|| ActionError::UnknownKind(kind.to_string()))?;
        Ok(constructor(
            target.into(),
            parameters,
            Arc::clone(&self.system),
        ))
    }

    /// Like `create`, parsing the kind from its name.
    pub fn create_by_name(
        &self,
        kind: &str,
        target: impl Into<String>,
        parameters: Parameters,
    ) -> Result<Box<dyn Action>, ActionError> {
        let kind = kind
            .parse::<ActionKind>()
            .map_err(|_| ActionError::UnknownKind(kind.to_string()))?;
        self.create(kind, target, parameters)
    }

    pub fn contains(&self, kind: ActionKind) -> bool {
        self.constructors.contains_key(&kind)
    }

    /// Registered kinds in declaration order.
    pub fn kinds(&self) -> Vec<ActionKind> {
        ActionKind::ALL
            .into_iter()
            .filter(|k| self.constructors.contains_key(k))
            .collect()
    }

    pub fn system(&self) -> Arc<dyn SystemControl> {
        Arc::clone(&self.system)
    }
}
