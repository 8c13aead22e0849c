//! Database schema migrations.
//!
//! Applies the audit log schema and tracks applied versions in
//! `schema_migrations`.

use rusqlite::Connection;
use tracing::info;

use guardian_core::error::GuardianError;

/// Run all pending database migrations.
pub fn run_migrations(conn: &Connection) -> Result<(), GuardianError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version     INTEGER PRIMARY KEY NOT NULL,
            name        TEXT NOT NULL,
            applied_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );",
    )
    .map_err(|e| GuardianError::Storage(format!("Failed to create migrations table: {}", e)))?;

    let current_version: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .map_err(|e| GuardianError::Storage(format!("Failed to query migration version: {}", e)))?;

    if current_version < 1 {
        apply_v1(conn)?;
        info!("Applied migration v1: action_logs");
    }

    Ok(())
}

/// Version 1: the action audit log.
fn apply_v1(conn: &Connection) -> Result<(), GuardianError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS action_logs (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            action_id       TEXT NOT NULL UNIQUE,
            kind            TEXT NOT NULL,
            target          TEXT NOT NULL,
            parameters      TEXT NOT NULL DEFAULT '{}',
            status          TEXT NOT NULL
                            CHECK (status IN ('pending', 'running', 'success', 'failed', 'rolled_back')),
            result          TEXT,
            snapshot_id     TEXT,
            started_at      INTEGER NOT NULL,
            completed_at    INTEGER,
            user_approved   INTEGER NOT NULL DEFAULT 0,
            rolled_back     INTEGER NOT NULL DEFAULT 0
        );

        CREATE INDEX IF NOT EXISTS idx_action_logs_status
            ON action_logs (status, started_at DESC);

        CREATE INDEX IF NOT EXISTS idx_action_logs_started_at
            ON action_logs (started_at DESC);

        INSERT INTO schema_migrations (version, name) VALUES (1, 'action_logs');
        ",
    )
    .map_err(|e| GuardianError::Storage(format!("Migration v1 failed: {}", e)))?;
    Ok(())
}
