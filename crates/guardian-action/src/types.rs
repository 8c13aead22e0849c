//! Core types and value objects for the action engine.
//!
//! Defines action kinds, risk and automation levels, results, metadata, and
//! the typed audit record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Untyped, string-keyed action parameters.
pub type Parameters = serde_json::Map<String, serde_json::Value>;

// =============================================================================
// Enums
// =============================================================================

/// The closed set of operations the engine can perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    CloseProcess,
    StartProcess,
    SetPriority,
    KillProcess,
    ClearRam,
    SetCpuAffinity,
    DiskCleanup,
    PowerPlan,
    DisplayBrightness,
    Sleep,
    Hibernate,
}

impl ActionKind {
    /// Every kind, in declaration order.
    pub const ALL: [ActionKind; 11] = [
        ActionKind::CloseProcess,
        ActionKind::StartProcess,
        ActionKind::SetPriority,
        ActionKind::KillProcess,
        ActionKind::ClearRam,
        ActionKind::SetCpuAffinity,
        ActionKind::DiskCleanup,
        ActionKind::PowerPlan,
        ActionKind::DisplayBrightness,
        ActionKind::Sleep,
        ActionKind::Hibernate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::CloseProcess => "close_process",
            ActionKind::StartProcess => "start_process",
            ActionKind::SetPriority => "set_priority",
            ActionKind::KillProcess => "kill_process",
            ActionKind::ClearRam => "clear_ram",
            ActionKind::SetCpuAffinity => "set_cpu_affinity",
            ActionKind::DiskCleanup => "disk_cleanup",
            ActionKind::PowerPlan => "power_plan",
            ActionKind::DisplayBrightness => "display_brightness",
            ActionKind::Sleep => "sleep",
            ActionKind::Hibernate => "hibernate",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ActionKind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace('-', "_");
        ActionKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == normalized)
            .ok_or_else(|| format!("Unknown action kind: {}", s))
    }
}

/// Potential harm of an action. Ordered: `Low < Medium < High`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RiskLevel::Low => write!(f, "low"),
            RiskLevel::Medium => write!(f, "medium"),
            RiskLevel::High => write!(f, "high"),
        }
    }
}

impl std::str::FromStr for RiskLevel {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "low" => Ok(RiskLevel::Low),
            "medium" => Ok(RiskLevel::Medium),
            "high" => Ok(RiskLevel::High),
            _ => Err(format!("Unknown risk level: {}", s)),
        }
    }
}

/// Operator dial controlling how much risk may proceed unattended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutomationLevel {
    Manual,
    SemiAuto,
    FullyAuto,
}

impl fmt::Display for AutomationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AutomationLevel::Manual => write!(f, "manual"),
            AutomationLevel::SemiAuto => write!(f, "semi_auto"),
            AutomationLevel::FullyAuto => write!(f, "fully_auto"),
        }
    }
}

impl std::str::FromStr for AutomationLevel {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "manual" => Ok(AutomationLevel::Manual),
            "semi_auto" => Ok(AutomationLevel::SemiAuto),
            "fully_auto" => Ok(AutomationLevel::FullyAuto),
            _ => Err(format!("Unknown automation level: {}", s)),
        }
    }
}

/// Durable status of an audit record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Pending,
    Running,
    Success,
    Failed,
    RolledBack,
}

impl ActionStatus {
    /// Success, failed and rolled back records are never mutated again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ActionStatus::Success | ActionStatus::Failed | ActionStatus::RolledBack
        )
    }
}

impl fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionStatus::Pending => write!(f, "pending"),
            ActionStatus::Running => write!(f, "running"),
            ActionStatus::Success => write!(f, "success"),
            ActionStatus::Failed => write!(f, "failed"),
            ActionStatus::RolledBack => write!(f, "rolled_back"),
        }
    }
}

impl std::str::FromStr for ActionStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ActionStatus::Pending),
            "running" => Ok(ActionStatus::Running),
            "success" => Ok(ActionStatus::Success),
            "failed" => Ok(ActionStatus::Failed),
            "rolled_back" => Ok(ActionStatus::RolledBack),
            _ => Err(format!("Unknown action status: {}", s)),
        }
    }
}

/// Machine-readable failure codes carried in `ActionResult::error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ApprovalRequired,
    ValidationFailed,
    ProcessNotFound,
    ProcessExited,
    PartialFailure,
    ExecutionFailed,
    DeadlineExceeded,
    UnsupportedPlatform,
    SnapshotNotFound,
    SnapshotInvalid,
    RollbackNotSupported,
    NotImplemented,
    NoSnapshotData,
    NoActions,
    NoSnapshot,
    ConcurrencyLimit,
    UnknownAction,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ApprovalRequired => "APPROVAL_REQUIRED",
            ErrorCode::ValidationFailed => "VALIDATION_FAILED",
            ErrorCode::ProcessNotFound => "PROCESS_NOT_FOUND",
            ErrorCode::ProcessExited => "PROCESS_EXITED",
            ErrorCode::PartialFailure => "PARTIAL_FAILURE",
            ErrorCode::ExecutionFailed => "EXECUTION_FAILED",
            ErrorCode::DeadlineExceeded => "DEADLINE_EXCEEDED",
            ErrorCode::UnsupportedPlatform => "UNSUPPORTED_PLATFORM",
            ErrorCode::SnapshotNotFound => "SNAPSHOT_NOT_FOUND",
            ErrorCode::SnapshotInvalid => "SNAPSHOT_INVALID",
            ErrorCode::RollbackNotSupported => "ROLLBACK_NOT_SUPPORTED",
            ErrorCode::NotImplemented => "NOT_IMPLEMENTED",
            ErrorCode::NoSnapshotData => "NO_SNAPSHOT_DATA",
            ErrorCode::NoActions => "NO_ACTIONS",
            ErrorCode::NoSnapshot => "NO_SNAPSHOT",
            ErrorCode::ConcurrencyLimit => "CONCURRENCY_LIMIT",
            ErrorCode::UnknownAction => "UNKNOWN_ACTION",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Domain Structs
// =============================================================================

/// Outcome of one dispatch, execution, or rollback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResult {
    pub success: bool,
    pub message: String,
    /// An `ErrorCode` string, or the raw message of an unexpected failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(default)]
    pub execution_time_ms: f64,
}

impl ActionResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            error: None,
            data: None,
            execution_time_ms: 0.0,
        }
    }

    pub fn failure(message: impl Into<String>, code: ErrorCode) -> Self {
        Self::failure_raw(message, code.as_str())
    }

    /// A failure whose `error` is free text rather than a known code.
    pub fn failure_raw(message: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            error: Some(error.into()),
            data: None,
            execution_time_ms: 0.0,
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    /// True when `error` carries exactly this code.
    pub fn has_error(&self, code: ErrorCode) -> bool {
        self.error.as_deref() == Some(code.as_str())
    }
}

/// Executor-assigned metadata, one per dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionMetadata {
    pub action_id: Uuid,
    pub kind: ActionKind,
    pub target: String,
    pub parameters: Parameters,
    pub risk_level: RiskLevel,
    pub requires_approval: bool,
    pub can_rollback: bool,
    pub estimated_impact: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Typed view of one audit row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionLogRecord {
    pub action_id: Uuid,
    pub kind: ActionKind,
    pub target: String,
    pub parameters: Parameters,
    pub status: ActionStatus,
    pub result: Option<ActionResult>,
    pub snapshot_id: Option<Uuid>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub user_approved: bool,
    pub rolled_back: bool,
}

impl ActionLogRecord {
    /// A fresh pending record for the given metadata.
    pub fn pending(metadata: &ActionMetadata, user_approved: bool) -> Self {
        Self {
            action_id: metadata.action_id,
            kind: metadata.kind,
            target: metadata.target.clone(),
            parameters: metadata.parameters.clone(),
            status: ActionStatus::Pending,
            result: None,
            snapshot_id: None,
            started_at: metadata.created_at,
            completed_at: None,
            user_approved,
            rolled_back: false,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    // ---- ActionKind ----

    #[test]
    fn test_action_kind_roundtrip_all() {
        for kind in ActionKind::ALL {
            let parsed: ActionKind = kind.to_string().parse().unwrap();
            assert_eq!(parsed, kind);
        }
    }

    #[test]
    fn test_action_kind_parse_accepts_dashes_and_case() {
        assert_eq!(
            "Close-Process".parse::<ActionKind>().unwrap(),
            ActionKind::CloseProcess
        );
        assert_eq!(
            "SET_CPU_AFFINITY".parse::<ActionKind>().unwrap(),
            ActionKind::SetCpuAffinity
        );
    }

    #[test]
    fn test_action_kind_parse_unknown() {
        let err = "format_disk".parse::<ActionKind>().unwrap_err();
        assert_eq!(err, "Unknown action kind: format_disk");
    }

    #[test]
    fn test_action_kind_serde_matches_display() {
        let json = serde_json::to_string(&ActionKind::DisplayBrightness).unwrap();
        assert_eq!(json, "\"display_brightness\"");
    }

    // ---- RiskLevel ----

    #[test]
    fn test_risk_level_ordering() {
        assert!(RiskLevel::Low < RiskLevel::Medium);
        assert!(RiskLevel::Medium < RiskLevel::High);
    }

    #[test]
    fn test_risk_level_parse() {
        assert_eq!("MEDIUM".parse::<RiskLevel>().unwrap(), RiskLevel::Medium);
        assert!("extreme".parse::<RiskLevel>().is_err());
    }

    // ---- AutomationLevel ----

    #[test]
    fn test_automation_level_roundtrip() {
        for level in [
            AutomationLevel::Manual,
            AutomationLevel::SemiAuto,
            AutomationLevel::FullyAuto,
        ] {
            assert_eq!(level.to_string().parse::<AutomationLevel>().unwrap(), level);
        }
    }

    // ---- ActionStatus ----

    #[test]
    fn test_action_status_terminal() {
        assert!(!ActionStatus::Pending.is_terminal());
        assert!(!ActionStatus::Running.is_terminal());
        assert!(ActionStatus::Success.is_terminal());
        assert!(ActionStatus::Failed.is_terminal());
        assert!(ActionStatus::RolledBack.is_terminal());
    }

    #[test]
    fn test_action_status_parse_unknown() {
        let err = "exploded".parse::<ActionStatus>().unwrap_err();
        assert_eq!(err, "Unknown action status: exploded");
    }

    // ---- ActionResult ----

    #[test]
    fn test_action_result_failure_carries_code() {
        let result = ActionResult::failure("Needs approval", ErrorCode::ApprovalRequired);
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("APPROVAL_REQUIRED"));
        assert!(result.has_error(ErrorCode::ApprovalRequired));
        assert!(!result.has_error(ErrorCode::NoActions));
    }

    #[test]
    fn test_action_result_serialization_skips_empty() {
        let json = serde_json::to_value(ActionResult::ok("done")).unwrap();
        assert!(json.get("error").is_none());
        assert!(json.get("data").is_none());
        assert_eq!(json["success"], true);
    }

    #[test]
    fn test_action_result_deserialize_minimal() {
        let result: ActionResult =
            serde_json::from_str(r#"{"success":false,"message":"x","error":"boom"}"#).unwrap();
        assert_eq!(result.error.as_deref(), Some("boom"));
        assert_eq!(result.execution_time_ms, 0.0);
    }
}
