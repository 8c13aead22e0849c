//! Guardian storage crate - SQLite persistence for the action audit log.
//!
//! Provides a WAL-mode SQLite database with versioned migrations and the
//! row-level repository behind the durable audit trail.

pub mod audit;
pub mod db;
pub mod migrations;

pub use audit::{ActionLogRow, AuditRepository, AuditStats};
pub use db::Database;
