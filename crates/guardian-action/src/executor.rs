//! The executor: the only entry point callers use to run actions.
//!
//! Each dispatch walks validate -> approval gate -> snapshot -> execute ->
//! rollback-on-failure, persisting the audit row at creation, at Running,
//! and at the end. The dispatch body runs in its own task so an `Err` or a
//! panic anywhere inside still ends as a persisted FAILED result. Every
//! phase that touches the system is bounded by `action_timeout`.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use chrono::Utc;
use guardian_core::config::GuardianConfig;
use guardian_core::error::GuardianError;
use guardian_storage::{AuditStats, Database};
use serde_json::{json, Value};
use tokio::sync::{OwnedMutexGuard, Semaphore};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::actions::{rollback_eligible, Action, ActionRegistry, ExecutionContext};
use crate::audit::AuditLog;
use crate::error::{ActionError, ValidationError};
use crate::platform::SystemControl;
use crate::policy::SafetyPolicy;
use crate::rollback::{RollbackEngine, RollbackEntry};
use crate::snapshot::SnapshotStore;
use crate::state_machine::{validate_transition, DispatchState};
use crate::types::{
    ActionKind, ActionLogRecord, ActionMetadata, ActionResult, ActionStatus, ErrorCode, Parameters,
};

/// How many recent audit rows `rollback_last` scans for a usable snapshot.
const ROLLBACK_SCAN_LIMIT: u64 = 50;

/// Extra time past the action deadline before the executor stops waiting.
const DEADLINE_GRACE: Duration = Duration::from_secs(1);

/// How often `rollback_last` re-picks its record after a newer one appears.
const ROLLBACK_LEASE_ATTEMPTS: usize = 3;

/// Execution tunables, usually taken from `GuardianConfig`.
#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    pub enable_rollback: bool,
    pub snapshot_before_action: bool,
    pub max_concurrent_actions: usize,
    pub action_timeout: Duration,
    pub graceful_terminate: Duration,
    pub max_snapshots: usize,
    pub snapshot_process_limit: usize,
    pub max_rollback_history: usize,
}

impl ExecutorSettings {
    pub fn from_config(config: &GuardianConfig) -> Self {
        Self {
            enable_rollback: config.safety.enable_rollback,
            snapshot_before_action: config.safety.snapshot_before_action,
            max_concurrent_actions: config.execution.max_concurrent_actions,
            action_timeout: Duration::from_secs(config.execution.action_timeout_seconds),
            graceful_terminate: Duration::from_secs(config.execution.graceful_terminate_seconds),
            max_snapshots: config.safety.max_snapshots,
            snapshot_process_limit: config.safety.snapshot_process_limit,
            max_rollback_history: config.safety.max_rollback_history,
        }
    }
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self::from_config(&GuardianConfig::default())
    }
}

type TargetKey = (ActionKind, String);

/// Runs actions under the safety policy and records every attempt.
#[derive(Clone)]
pub struct Executor {
    inner: Arc<Inner>,
}

struct Inner {
    policy: SafetyPolicy,
    settings: ExecutorSettings,
    registry: ActionRegistry,
    snapshots: Arc<SnapshotStore>,
    rollback: RollbackEngine,
    audit: AuditLog,
    slots: Semaphore,
    target_locks: Mutex<HashMap<TargetKey, Arc<tokio::sync::Mutex<()>>>>,
}

impl Executor {
    pub fn new(
        policy: SafetyPolicy,
        settings: ExecutorSettings,
        registry: ActionRegistry,
        db: Arc<Database>,
    ) -> Self {
        let snapshots = Arc::new(SnapshotStore::new(
            settings.max_snapshots,
            settings.snapshot_process_limit,
        ));
        let rollback = RollbackEngine::new(Arc::clone(&snapshots), settings.max_rollback_history);
        Self {
            inner: Arc::new(Inner {
                policy,
                slots: Semaphore::new(settings.max_concurrent_actions.max(1)),
                settings,
                registry,
                snapshots,
                rollback,
                audit: AuditLog::new(db),
                target_locks: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Build from configuration with every built-in action registered.
    pub fn from_config(
        config: &GuardianConfig,
        system: Arc<dyn SystemControl>,
        db: Arc<Database>,
    ) -> Result<Self, GuardianError> {
        let policy = SafetyPolicy::from_config(&config.safety)?;
        Ok(Self::new(
            policy,
            ExecutorSettings::from_config(config),
            ActionRegistry::with_defaults(system),
            db,
        ))
    }

    pub fn policy(&self) -> &SafetyPolicy {
        &self.inner.policy
    }

    pub fn settings(&self) -> &ExecutorSettings {
        &self.inner.settings
    }

    pub fn registry(&self) -> &ActionRegistry {
        &self.inner.registry
    }

    pub fn snapshots(&self) -> &SnapshotStore {
        &self.inner.snapshots
    }

    /// The metadata a dispatch of `action` would be assigned.
    pub fn metadata(&self, action: &dyn Action) -> ActionMetadata {
        self.inner.metadata(action)
    }

    /// Build an action through the registry and dispatch it.
    pub async fn execute(
        &self,
        kind: ActionKind,
        target: &str,
        parameters: Parameters,
        user_approved: bool,
    ) -> ActionResult {
        match self.inner.registry.create(kind, target, parameters) {
            Ok(action) => self.dispatch(action, user_approved).await,
            Err(e) => ActionResult::failure(e.to_string(), ErrorCode::UnknownAction),
        }
    }

    /// Run one action through the full lifecycle. Never fails: every
    /// outcome, including internal errors and panics, is an `ActionResult`.
    pub async fn dispatch(&self, action: Box<dyn Action>, user_approved: bool) -> ActionResult {
        let started = Instant::now();
        let metadata = self.inner.metadata(action.as_ref());
        let action_id = metadata.action_id;
        let record = Arc::new(Mutex::new(ActionLogRecord::pending(&metadata, user_approved)));

        info!(
            action_id = %action_id,
            kind = %metadata.kind,
            process = %metadata.target,
            risk = %metadata.risk_level,
            requires_approval = metadata.requires_approval,
            "Dispatching action"
        );

        let inner = Arc::clone(&self.inner);
        let shared = Arc::clone(&record);
        let handle = tokio::spawn(async move { inner.run(action, metadata, shared).await });

        let message = match handle.await {
            Ok(Ok(result)) => return result,
            Ok(Err(e)) => e.to_string(),
            Err(join_error) if join_error.is_panic() => panic_message(join_error.into_panic()),
            Err(join_error) => join_error.to_string(),
        };

        error!(action_id = %action_id, error = %message, "Dispatch failed unexpectedly");
        let mut result = ActionResult::failure_raw("Action dispatch failed", message);
        result.execution_time_ms = elapsed_ms(started);

        let final_record = {
            let mut rec = lock(&record);
            rec.status = ActionStatus::Failed;
            rec.result = Some(result.clone());
            rec.completed_at = Some(Utc::now());
            rec.clone()
        };
        if let Err(e) = self.inner.audit.record(&final_record) {
            error!(action_id = %action_id, error = %e, "Failed to persist failed dispatch");
        }
        if let Some(snapshot_id) = final_record.snapshot_id {
            self.inner.snapshots.unpin(snapshot_id);
        }
        result
    }

    /// Roll back the most recent action that still has a usable snapshot.
    ///
    /// Holds the record's `(kind, target)` lease and an execution slot while
    /// the rollback runs, so it never overlaps a dispatch on the same key.
    /// A successful rollback sets `rolled_back` on the already-terminal row
    /// and moves a `failed` row to `rolled_back`.
    pub async fn rollback_last(&self) -> ActionResult {
        let mut record = match self.inner.rollback_candidate() {
            Ok(record) => record,
            Err(result) => return result,
        };

        for _ in 0..ROLLBACK_LEASE_ATTEMPTS {
            let wait_until = tokio::time::Instant::now() + self.inner.settings.action_timeout;
            let Some(_lease) = self.inner.lease(record.kind, &record.target, wait_until).await else {
                return ActionResult::failure(
                    format!("Another {} on {} is still running", record.kind, record.target),
                    ErrorCode::ConcurrencyLimit,
                );
            };

            // A newer action may have finished while we waited.
            let current = match self.inner.rollback_candidate() {
                Ok(current) => current,
                Err(result) => return result,
            };
            if target_key(current.kind, &current.target) != target_key(record.kind, &record.target) {
                debug!(action_id = %current.action_id, "Newer rollback candidate, retrying");
                record = current;
                continue;
            }

            let _permit = match tokio::time::timeout_at(wait_until, self.inner.slots.acquire()).await {
                Ok(Ok(permit)) => permit,
                Ok(Err(_)) => {
                    return ActionResult::failure_raw("Rollback failed", ActionError::Closed.to_string())
                }
                Err(_) => {
                    return ActionResult::failure(
                        format!(
                            "No execution slot free within {}s",
                            self.inner.settings.action_timeout.as_secs()
                        ),
                        ErrorCode::ConcurrencyLimit,
                    )
                }
            };
            return self.rollback_record(current).await;
        }

        ActionResult::failure(
            "Rollback target kept changing, try again",
            ErrorCode::ConcurrencyLimit,
        )
    }

    /// Rollback of one audit record; the caller holds its lease.
    async fn rollback_record(&self, record: ActionLogRecord) -> ActionResult {
        let Some(snapshot_id) = record.snapshot_id else {
            return ActionResult::failure("No snapshot available for rollback", ErrorCode::NoSnapshot);
        };

        let action = match self.inner.registry.create(
            record.kind,
            record.target.clone(),
            record.parameters.clone(),
        ) {
            Ok(action) => action,
            Err(e) => return ActionResult::failure(e.to_string(), ErrorCode::UnknownAction),
        };
        if !rollback_eligible(action.as_ref(), &self.inner.policy) {
            return ActionResult::failure(
                format!("{} does not support rollback", record.kind),
                ErrorCode::RollbackNotSupported,
            );
        }

        info!(action_id = %record.action_id, snapshot_id = %snapshot_id, "Rolling back last action");
        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            inner.rollback_within(action.as_ref(), snapshot_id).await
        });
        let result = match handle.await {
            Ok(result) => result,
            Err(join_error) => {
                let message = if join_error.is_panic() {
                    panic_message(join_error.into_panic())
                } else {
                    join_error.to_string()
                };
                error!(action_id = %record.action_id, error = %message, "Rollback failed unexpectedly");
                return ActionResult::failure_raw("Rollback failed", message);
            }
        };

        if result.success {
            self.inner.snapshots.remove(snapshot_id);
            let mut updated = record;
            updated.rolled_back = true;
            if updated.status == ActionStatus::Failed {
                updated.status = ActionStatus::RolledBack;
            }
            if let Err(e) = self.inner.audit.record(&updated) {
                error!(action_id = %updated.action_id, error = %e, "Failed to persist rollback");
            }
        }
        result
    }

    /// Newest audit records first.
    pub fn recent_history(&self, limit: u64) -> Result<Vec<ActionLogRecord>, ActionError> {
        self.inner.audit.recent(limit)
    }

    pub fn recent_by_status(
        &self,
        status: ActionStatus,
        limit: u64,
    ) -> Result<Vec<ActionLogRecord>, ActionError> {
        self.inner.audit.recent_by_status(status, limit)
    }

    pub fn get(&self, action_id: Uuid) -> Result<Option<ActionLogRecord>, ActionError> {
        self.inner.audit.get(action_id)
    }

    pub fn stats(&self) -> Result<AuditStats, ActionError> {
        self.inner.audit.stats()
    }

    pub fn rollback_history(&self, limit: usize) -> Vec<RollbackEntry> {
        self.inner.rollback.history(limit)
    }
}

// =============================================================================
// Dispatch internals
// =============================================================================

/// State and audit row of one in-flight dispatch.
struct Dispatch {
    state: DispatchState,
    record: Arc<Mutex<ActionLogRecord>>,
    started: Instant,
    rollbackable: bool,
}

impl Dispatch {
    fn advance(&mut self, to: DispatchState) -> Result<(), ActionError> {
        validate_transition(self.state, to)?;
        debug!(from = %self.state, to = %to, "Dispatch transition");
        self.state = to;
        lock(&self.record).status = to.status();
        Ok(())
    }

    fn update(&self, f: impl FnOnce(&mut ActionLogRecord)) -> ActionLogRecord {
        let mut rec = lock(&self.record);
        f(&mut rec);
        rec.clone()
    }

    fn snapshot_id(&self) -> Option<Uuid> {
        lock(&self.record).snapshot_id
    }
}

/// Exclusive hold on one `(kind, target)` key; drops the map entry when no
/// one else is waiting.
struct TargetLease<'a> {
    locks: &'a Mutex<HashMap<TargetKey, Arc<tokio::sync::Mutex<()>>>>,
    key: TargetKey,
    guard: OwnedMutexGuard<()>,
}

impl Drop for TargetLease<'_> {
    fn drop(&mut self) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // One reference in the map, one held by this guard.
        if Arc::strong_count(OwnedMutexGuard::mutex(&self.guard)) <= 2 {
            locks.remove(&self.key);
        }
    }
}

impl Inner {
    fn metadata(&self, action: &dyn Action) -> ActionMetadata {
        let risk_level = action.risk_level(&self.policy);
        ActionMetadata {
            action_id: Uuid::new_v4(),
            kind: action.kind(),
            target: action.target().to_string(),
            parameters: action.parameters().clone(),
            risk_level,
            requires_approval: self.policy.requires_approval(risk_level),
            can_rollback: rollback_eligible(action, &self.policy),
            estimated_impact: action.estimated_impact(),
            created_at: Utc::now(),
        }
    }

    async fn run(
        &self,
        action: Box<dyn Action>,
        metadata: ActionMetadata,
        record: Arc<Mutex<ActionLogRecord>>,
    ) -> Result<ActionResult, ActionError> {
        let action_id = metadata.action_id;
        let mut dispatch = Dispatch {
            state: DispatchState::Pending,
            record,
            started: Instant::now(),
            rollbackable: metadata.can_rollback,
        };
        self.audit.record(&dispatch.update(|_| {}))?;

        // Same-target serialization first, so a waiting dispatch does not
        // hold a global slot.
        let wait_until = tokio::time::Instant::now() + self.settings.action_timeout;
        let Some(_lease) = self.lease(metadata.kind, &metadata.target, wait_until).await else {
            let result = ActionResult::failure(
                format!("Another {} on {} is still running", metadata.kind, metadata.target),
                ErrorCode::ConcurrencyLimit,
            );
            return self.finish(&mut dispatch, DispatchState::Rejected, result);
        };
        let _permit = match tokio::time::timeout_at(wait_until, self.slots.acquire()).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(ActionError::Closed),
            Err(_) => {
                warn!(action_id = %action_id, "No execution slot available");
                let result = ActionResult::failure(
                    format!(
                        "No execution slot free within {}s",
                        self.settings.action_timeout.as_secs()
                    ),
                    ErrorCode::ConcurrencyLimit,
                );
                return self.finish(&mut dispatch, DispatchState::Rejected, result);
            }
        };

        // ---- validation ----
        dispatch.advance(DispatchState::Validating)?;
        let validation =
            tokio::time::timeout(self.settings.action_timeout, self.validate(action.as_ref())).await;
        match validation {
            Ok(Ok(())) => {}
            Ok(Err(reason)) => {
                warn!(action_id = %action_id, reason = %reason, "Action rejected");
                let result = ActionResult::failure_raw(
                    format!("Validation failed: {}", reason),
                    reason.to_string(),
                )
                .with_data(json!({"code": ErrorCode::ValidationFailed.as_str()}));
                return self.finish(&mut dispatch, DispatchState::Rejected, result);
            }
            Err(_) => {
                warn!(action_id = %action_id, "Validation timed out");
                let result = ActionResult::failure(
                    "Validation did not finish before the deadline",
                    ErrorCode::DeadlineExceeded,
                );
                return self.finish(&mut dispatch, DispatchState::Rejected, result);
            }
        }

        // ---- approval gate ----
        if metadata.requires_approval && !lock(&dispatch.record).user_approved {
            info!(action_id = %action_id, risk = %metadata.risk_level, "Approval required");
            let result =
                ActionResult::failure("Action requires user approval", ErrorCode::ApprovalRequired)
                    .with_data(json!({
                        "risk_level": metadata.risk_level.to_string(),
                        "estimated_impact": metadata.estimated_impact,
                    }));
            return self.finish(&mut dispatch, DispatchState::AwaitingApproval, result);
        }

        // ---- snapshot ----
        if self.settings.snapshot_before_action {
            let snapshot = self
                .snapshots
                .capture(
                    action_id,
                    &metadata.target,
                    self.registry.system().as_ref(),
                    tokio::time::Instant::now() + self.settings.action_timeout,
                )
                .await;
            dispatch.update(|rec| rec.snapshot_id = Some(snapshot.snapshot_id));
        }

        // ---- execute ----
        dispatch.advance(DispatchState::Running)?;
        self.audit.record(&dispatch.update(|_| {}))?;

        let ctx = ExecutionContext::new(
            action_id,
            self.settings.action_timeout,
            self.settings.graceful_terminate,
        );
        let exec_started = Instant::now();
        let mut result = match tokio::time::timeout_at(
            ctx.deadline() + self.settings.graceful_terminate + DEADLINE_GRACE,
            action.execute(&ctx),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => ActionResult::failure(
                "Action did not return before the deadline",
                ErrorCode::DeadlineExceeded,
            ),
        };
        result.execution_time_ms = elapsed_ms(exec_started);

        if result.success {
            info!(action_id = %action_id, elapsed_ms = result.execution_time_ms, "Action succeeded");
            return self.finish(&mut dispatch, DispatchState::Success, result);
        }

        warn!(
            action_id = %action_id,
            error = result.error.as_deref().unwrap_or_default(),
            message = %result.message,
            "Action failed"
        );
        dispatch.advance(DispatchState::Failed)?;

        // ---- rollback ----
        let snapshot_id = dispatch.snapshot_id();
        let eligible = self.settings.enable_rollback
            && metadata.can_rollback
            && snapshot_id.is_some_and(|id| self.snapshots.get(id).is_some_and(|s| s.can_restore));
        if let (true, Some(snapshot_id)) = (eligible, snapshot_id) {
            let rollback = self.rollback_within(action.as_ref(), snapshot_id).await;
            if rollback.success {
                dispatch.advance(DispatchState::RolledBack)?;
                dispatch.update(|rec| rec.rolled_back = true);
            }
            attach_rollback(&mut result, &rollback);
        }

        let state = dispatch.state;
        self.finish(&mut dispatch, state, result)
    }

    /// Central gate: protected veto, then the action's own checks.
    async fn validate(&self, action: &dyn Action) -> Result<(), ValidationError> {
        self.policy.check_target(action.target())?;
        action.validate(&self.policy).await
    }

    /// Rollback bounded like an execution, so a stalled restore cannot hold
    /// the lease forever.
    async fn rollback_within(&self, action: &dyn Action, snapshot_id: Uuid) -> ActionResult {
        let limit = self.settings.action_timeout + self.settings.graceful_terminate + DEADLINE_GRACE;
        match tokio::time::timeout(limit, self.rollback.rollback(action, snapshot_id)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(snapshot_id = %snapshot_id, "Rollback timed out");
                ActionResult::failure(
                    "Rollback did not finish before the deadline",
                    ErrorCode::DeadlineExceeded,
                )
            }
        }
    }

    /// Most recent record that `rollback_last` can act on.
    fn rollback_candidate(&self) -> Result<ActionLogRecord, ActionResult> {
        let recent = self.audit.recent(ROLLBACK_SCAN_LIMIT).map_err(|e| {
            error!(error = %e, "Failed to read audit log");
            ActionResult::failure_raw("Failed to read audit log", e.to_string())
        })?;
        if recent.is_empty() {
            return Err(ActionResult::failure("No actions to rollback", ErrorCode::NoActions));
        }
        recent
            .into_iter()
            .find(|r| {
                !r.rolled_back
                    && matches!(r.status, ActionStatus::Success | ActionStatus::Failed)
                    && r.snapshot_id.is_some_and(|id| self.snapshots.contains(id))
            })
            .ok_or_else(|| {
                ActionResult::failure("No snapshot available for rollback", ErrorCode::NoSnapshot)
            })
    }

    async fn lease(
        &self,
        kind: ActionKind,
        target: &str,
        wait_until: tokio::time::Instant,
    ) -> Option<TargetLease<'_>> {
        let key = target_key(kind, target);
        let mutex = {
            let mut locks = self
                .target_locks
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(key.clone()).or_default())
        };
        match tokio::time::timeout_at(wait_until, mutex.lock_owned()).await {
            Ok(guard) => Some(TargetLease {
                locks: &self.target_locks,
                key,
                guard,
            }),
            Err(_) => {
                warn!(kind = %kind, process = target, "Timed out waiting for target");
                None
            }
        }
    }

    /// Move to the final state, persist, and release the snapshot.
    fn finish(
        &self,
        dispatch: &mut Dispatch,
        to: DispatchState,
        mut result: ActionResult,
    ) -> Result<ActionResult, ActionError> {
        if dispatch.state != to {
            dispatch.advance(to)?;
        }
        if result.execution_time_ms == 0.0 {
            result.execution_time_ms = elapsed_ms(dispatch.started);
        }
        let record = dispatch.update(|rec| {
            rec.result = Some(result.clone());
            rec.completed_at = Some(Utc::now());
        });
        self.audit.record(&record)?;

        if let Some(snapshot_id) = record.snapshot_id {
            let keep = to == DispatchState::Success || to == DispatchState::Failed;
            if keep && dispatch.rollbackable {
                self.snapshots.unpin(snapshot_id);
            } else {
                self.snapshots.remove(snapshot_id);
            }
        }

        info!(
            action_id = %record.action_id,
            status = %record.status,
            success = result.success,
            "Dispatch finished"
        );
        Ok(result)
    }
}

/// Record the rollback outcome under `data.rollback` without touching the
/// original failure's `success`, `message` or `error`.
fn attach_rollback(result: &mut ActionResult, rollback: &ActionResult) {
    let summary = json!({
        "success": rollback.success,
        "message": rollback.message,
        "error": rollback.error,
    });
    match result.data.as_mut() {
        Some(Value::Object(map)) => {
            map.insert("rollback".into(), summary);
        }
        Some(other) => {
            let previous = other.take();
            *other = json!({"result": previous, "rollback": summary});
        }
        None => result.data = Some(json!({"rollback": summary})),
    }
}

fn target_key(kind: ActionKind, target: &str) -> TargetKey {
    (kind, target.trim().to_lowercase())
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "action panicked".to_string()
    }
}
