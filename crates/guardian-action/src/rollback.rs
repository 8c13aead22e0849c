//! Snapshot-driven rollback with a bounded in-memory history.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::actions::Action;
use crate::snapshot::SnapshotStore;
use crate::types::{ActionKind, ActionResult, ErrorCode};

/// One successful rollback, kept for operator introspection.
#[derive(Debug, Clone, Serialize)]
pub struct RollbackEntry {
    pub snapshot_id: Uuid,
    pub action_id: Uuid,
    pub kind: ActionKind,
    pub target: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

pub struct RollbackEngine {
    snapshots: Arc<SnapshotStore>,
    history: Mutex<VecDeque<RollbackEntry>>,
    max_history: usize,
}

impl RollbackEngine {
    pub fn new(snapshots: Arc<SnapshotStore>, max_history: usize) -> Self {
        Self {
            snapshots,
            history: Mutex::new(VecDeque::with_capacity(max_history.min(1024))),
            max_history,
        }
    }

    /// Restore state from `snapshot_id` through the action's own inverse.
    ///
    /// Preconditions fail in order with `SNAPSHOT_NOT_FOUND`,
    /// `SNAPSHOT_INVALID` and `ROLLBACK_NOT_SUPPORTED`.
    pub async fn rollback(&self, action: &dyn Action, snapshot_id: Uuid) -> ActionResult {
        let Some(snapshot) = self.snapshots.get(snapshot_id) else {
            warn!(snapshot_id = %snapshot_id, "Rollback snapshot not found");
            return ActionResult::failure(
                format!("Snapshot {} not found", snapshot_id),
                ErrorCode::SnapshotNotFound,
            );
        };
        if !snapshot.can_restore {
            return ActionResult::failure(
                format!("Snapshot {} cannot be restored", snapshot_id),
                ErrorCode::SnapshotInvalid,
            );
        }
        if !action.can_rollback() {
            return ActionResult::failure(
                format!("{} does not support rollback", action.kind()),
                ErrorCode::RollbackNotSupported,
            );
        }

        info!(
            kind = %action.kind(),
            process = action.target(),
            snapshot_id = %snapshot_id,
            "Rolling back"
        );
        let started = Instant::now();
        let mut result = action.rollback(&snapshot).await;
        result.execution_time_ms = started.elapsed().as_secs_f64() * 1000.0;

        if result.success {
            info!(snapshot_id = %snapshot_id, "Rollback succeeded");
            self.record(RollbackEntry {
                snapshot_id,
                action_id: snapshot.action_id,
                kind: action.kind(),
                target: action.target().to_string(),
                message: result.message.clone(),
                timestamp: Utc::now(),
            });
        } else {
            warn!(
                snapshot_id = %snapshot_id,
                error = result.error.as_deref().unwrap_or_default(),
                "Rollback failed"
            );
        }
        result
    }

    /// Whether `rollback` would get past its preconditions.
    pub fn can_rollback(&self, action: &dyn Action, snapshot_id: Uuid) -> bool {
        action.can_rollback()
            && self
                .snapshots
                .get(snapshot_id)
                .is_some_and(|s| s.can_restore)
    }

    /// Most recent successful rollbacks first.
    pub fn history(&self, limit: usize) -> Vec<RollbackEntry> {
        self.lock().iter().rev().take(limit).cloned().collect()
    }

    fn record(&self, entry: RollbackEntry) {
        if self.max_history == 0 {
            return;
        }
        let mut history = self.lock();
        while history.len() >= self.max_history {
            history.pop_front();
        }
        history.push_back(entry);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<RollbackEntry>> {
        self.history.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
