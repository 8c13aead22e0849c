//! Typed audit log over the storage repository.

use std::sync::Arc;

use guardian_storage::{ActionLogRow, AuditRepository, AuditStats, Database};
use uuid::Uuid;

use crate::error::ActionError;
use crate::types::{ActionLogRecord, ActionResult, ActionStatus};

/// Durable record of every dispatch, keyed by `action_id`.
pub struct AuditLog {
    repo: AuditRepository,
}

impl AuditLog {
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            repo: AuditRepository::new(db),
        }
    }

    /// Insert or overwrite the row for `record.action_id`.
    pub fn record(&self, record: &ActionLogRecord) -> Result<(), ActionError> {
        self.repo.upsert(&to_row(record)?)?;
        Ok(())
    }

    pub fn get(&self, action_id: Uuid) -> Result<Option<ActionLogRecord>, ActionError> {
        self.repo.get(action_id)?.map(from_row).transpose()
    }

    /// Newest first.
    pub fn recent(&self, limit: u64) -> Result<Vec<ActionLogRecord>, ActionError> {
        self.repo.recent(limit)?.into_iter().map(from_row).collect()
    }

    pub fn recent_by_status(
        &self,
        status: ActionStatus,
        limit: u64,
    ) -> Result<Vec<ActionLogRecord>, ActionError> {
        self.repo
            .recent_by_status(&status.to_string(), limit)?
            .into_iter()
            .map(from_row)
            .collect()
    }

    pub fn stats(&self) -> Result<AuditStats, ActionError> {
        Ok(self.repo.stats()?)
    }
}

fn to_row(record: &ActionLogRecord) -> Result<ActionLogRow, ActionError> {
    Ok(ActionLogRow {
        action_id: record.action_id,
        kind: record.kind.to_string(),
        target: record.target.clone(),
        parameters: serde_json::to_string(&record.parameters)?,
        status: record.status.to_string(),
        result: record
            .result
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?,
        snapshot_id: record.snapshot_id,
        started_at: record.started_at,
        completed_at: record.completed_at,
        user_approved: record.user_approved,
        rolled_back: record.rolled_back,
    })
}

fn from_row(row: ActionLogRow) -> Result<ActionLogRecord, ActionError> {
    Ok(ActionLogRecord {
        action_id: row.action_id,
        kind: row.kind.parse().map_err(ActionError::InvalidRecord)?,
        target: row.target,
        parameters: serde_json::from_str(&row.parameters)?,
        status: row.status.parse().map_err(ActionError::InvalidRecord)?,
        result: row
            .result
            .as_deref()
            .map(serde_json::from_str::<ActionResult>)
            .transpose()?,
        snapshot_id: row.snapshot_id,
        started_at: row.started_at,
        completed_at: row.completed_at,
        user_approved: row.user_approved,
        rolled_back: row.rolled_back,
    })
}
