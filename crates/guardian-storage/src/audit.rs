//! Audit log repository over the `action_logs` table.
//!
//! One row per `action_id`. Writes are upserts keyed on `action_id`, so
//! re-logging the same action overwrites its row instead of adding another.

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::OptionalExtension;
use uuid::Uuid;

use guardian_core::error::GuardianError;

use crate::db::Database;

/// A raw audit row. Enumerations and payloads are stored as text; the
/// engine crate owns their typed forms.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionLogRow {
    pub action_id: Uuid,
    pub kind: String,
    pub target: String,
    /// JSON-encoded parameter map.
    pub parameters: String,
    pub status: String,
    /// JSON-encoded result, absent until the dispatch ends.
    pub result: Option<String>,
    pub snapshot_id: Option<Uuid>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub user_approved: bool,
    pub rolled_back: bool,
}

/// Aggregate counts over the audit log.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AuditStats {
    pub total: u64,
    pub successful: u64,
    pub failed: u64,
    pub rolled_back: u64,
    pub pending: u64,
}

impl AuditStats {
    /// Percentage of logged actions that succeeded, rounded to one decimal.
    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        let rate = self.successful as f64 / self.total as f64 * 100.0;
        (rate * 10.0).round() / 10.0
    }
}

const SELECT_COLUMNS: &str = "SELECT action_id, kind, target, parameters, status, result,
        snapshot_id, started_at, completed_at, user_approved, rolled_back
 FROM action_logs";

/// Repository for audit rows.
pub struct AuditRepository {
    db: Arc<Database>,
}

impl AuditRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert the row, or overwrite the existing row with the same `action_id`.
    pub fn upsert(&self, row: &ActionLogRow) -> Result<(), GuardianError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO action_logs (action_id, kind, target, parameters, status, result,
                                          snapshot_id, started_at, completed_at, user_approved, rolled_back)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                 ON CONFLICT(action_id) DO UPDATE SET
                    kind = excluded.kind,
                    target = excluded.target,
                    parameters = excluded.parameters,
                    status = excluded.status,
                    result = excluded.result,
                    snapshot_id = excluded.snapshot_id,
                    started_at = excluded.started_at,
                    completed_at = excluded.completed_at,
                    user_approved = excluded.user_approved,
                    rolled_back = excluded.rolled_back",
                rusqlite::params![
                    row.action_id.to_string(),
                    row.kind,
                    row.target,
                    row.parameters,
                    row.status,
                    row.result,
                    row.snapshot_id.map(|id| id.to_string()),
                    row.started_at.timestamp_millis(),
                    row.completed_at.map(|t| t.timestamp_millis()),
                    row.user_approved as i32,
                    row.rolled_back as i32,
                ],
            )
            .map_err(|e| GuardianError::Storage(format!("Failed to log action: {}", e)))?;
            Ok(())
        })
    }

    /// Point lookup by `action_id`.
    pub fn get(&self, action_id: Uuid) -> Result<Option<ActionLogRow>, GuardianError> {
        self.db.with_conn(|conn| {
            let sql = format!("{} WHERE action_id = ?1", SELECT_COLUMNS);
            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| GuardianError::Storage(e.to_string()))?;

            let result = stmt
                .query_row(rusqlite::params![action_id.to_string()], |row| {
                    Ok(map_row(row))
                })
                .optional()
                .map_err(|e| GuardianError::Storage(e.to_string()))?;

            match result {
                Some(row) => Ok(Some(row?)),
                None => Ok(None),
            }
        })
    }

    /// Most recent rows first.
    pub fn recent(&self, limit: u64) -> Result<Vec<ActionLogRow>, GuardianError> {
        self.db.with_conn(|conn| {
            let sql = format!("{} ORDER BY started_at DESC, id DESC LIMIT ?1", SELECT_COLUMNS);
            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| GuardianError::Storage(e.to_string()))?;

            let rows = stmt
                .query_map(rusqlite::params![limit as i64], |row| Ok(map_row(row)))
                .map_err(|e| GuardianError::Storage(e.to_string()))?;

            let mut results = Vec::new();
            for row in rows {
                results.push(row.map_err(|e| GuardianError::Storage(e.to_string()))??);
            }
            Ok(results)
        })
    }

    /// Most recent rows with the given status first (served by the status index).
    pub fn recent_by_status(
        &self,
        status: &str,
        limit: u64,
    ) -> Result<Vec<ActionLogRow>, GuardianError> {
        self.db.with_conn(|conn| {
            let sql = format!(
                "{} WHERE status = ?1 ORDER BY started_at DESC, id DESC LIMIT ?2",
                SELECT_COLUMNS
            );
            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| GuardianError::Storage(e.to_string()))?;

            let rows = stmt
                .query_map(rusqlite::params![status, limit as i64], |row| {
                    Ok(map_row(row))
                })
                .map_err(|e| GuardianError::Storage(e.to_string()))?;

            let mut results = Vec::new();
            for row in rows {
                results.push(row.map_err(|e| GuardianError::Storage(e.to_string()))??);
            }
            Ok(results)
        })
    }

    /// Count all rows.
    pub fn count(&self) -> Result<u64, GuardianError> {
        self.db.with_conn(|conn| {
            let count: i64 = conn
                .query_row("SELECT COUNT(*) FROM action_logs", [], |row| row.get(0))
                .map_err(|e| GuardianError::Storage(e.to_string()))?;
            Ok(count as u64)
        })
    }

    /// Aggregate counts by outcome.
    pub fn stats(&self) -> Result<AuditStats, GuardianError> {
        self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT COUNT(*),
                        COALESCE(SUM(status = 'success'), 0),
                        COALESCE(SUM(status = 'failed'), 0),
                        COALESCE(SUM(rolled_back = 1), 0),
                        COALESCE(SUM(status IN ('pending', 'running')), 0)
                 FROM action_logs",
                [],
                |row| {
                    Ok(AuditStats {
                        total: row.get::<_, i64>(0)? as u64,
                        successful: row.get::<_, i64>(1)? as u64,
                        failed: row.get::<_, i64>(2)? as u64,
                        rolled_back: row.get::<_, i64>(3)? as u64,
                        pending: row.get::<_, i64>(4)? as u64,
                    })
                },
            )
            .map_err(|e| GuardianError::Storage(format!("Stats query failed: {}", e)))
        })
    }
}

fn map_row(row: &rusqlite::Row<'_>) -> Result<ActionLogRow, GuardianError> {
    let storage = |e: rusqlite::Error| GuardianError::Storage(e.to_string());

    let action_id: String = row.get(0).map_err(storage)?;
    let snapshot_id: Option<String> = row.get(6).map_err(storage)?;
    let started_at: i64 = row.get(7).map_err(storage)?;
    let completed_at: Option<i64> = row.get(8).map_err(storage)?;
    let user_approved: i32 = row.get(9).map_err(storage)?;
    let rolled_back: i32 = row.get(10).map_err(storage)?;

    Ok(ActionLogRow {
        action_id: parse_uuid(&action_id)?,
        kind: row.get(1).map_err(storage)?,
        target: row.get(2).map_err(storage)?,
        parameters: row.get(3).map_err(storage)?,
        status: row.get(4).map_err(storage)?,
        result: row.get(5).map_err(storage)?,
        snapshot_id: snapshot_id.as_deref().map(parse_uuid).transpose()?,
        started_at: millis_to_datetime(started_at),
        completed_at: completed_at.map(millis_to_datetime),
        user_approved: user_approved != 0,
        rolled_back: rolled_back != 0,
    })
}

fn parse_uuid(raw: &str) -> Result<Uuid, GuardianError> {
    Uuid::parse_str(raw).map_err(|e| GuardianError::Storage(format!("Invalid UUID '{}': {}", raw, e)))
}

fn millis_to_datetime(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis).single().unwrap_or_default()
}
