//! End-to-end tests for the executor over a scripted system.
//!
//! Every test builds its own executor with an in-memory audit database, so
//! tests are independent and make no real OS calls.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use guardian_action::platform::{Operation, SystemCall};
use guardian_action::{
    apply_profile, ActionKind, ActionResult, ActionStatus, ErrorCode, Executor, ExecutorSettings,
    Parameters, ProfileManager, RiskLevel, SafetyPolicy, ScriptedSystem, SystemControl,
    ValidationError,
};
use guardian_action::{Action, ActionRegistry, ExecutionContext};
use guardian_core::config::GuardianConfig;
use guardian_storage::Database;

// =============================================================================
// Helpers
// =============================================================================

fn config(level: &str) -> GuardianConfig {
    let mut config = GuardianConfig::default();
    config.safety.automation_level = level.to_string();
    config
}

fn build(config: &GuardianConfig, system: &Arc<ScriptedSystem>) -> Executor {
    let db = Arc::new(Database::in_memory().unwrap());
    Executor::from_config(config, system.clone(), db).unwrap()
}

fn notepad() -> Arc<ScriptedSystem> {
    Arc::new(ScriptedSystem::new().with_process("notepad.exe", Some("/usr/bin/notepad")))
}

fn params(pairs: serde_json::Value) -> Parameters {
    match pairs {
        serde_json::Value::Object(map) => map,
        _ => Parameters::new(),
    }
}

// =============================================================================
// Acceptance scenarios
// =============================================================================

#[tokio::test]
async fn test_manual_mode_requires_approval() {
    let system = notepad();
    let executor = build(&config("manual"), &system);

    let result = executor
        .execute(ActionKind::CloseProcess, "notepad.exe", Parameters::new(), false)
        .await;

    assert!(!result.success);
    assert!(result.has_error(ErrorCode::ApprovalRequired));
    assert_eq!(result.data.as_ref().unwrap()["risk_level"], "low");
    assert!(system.calls().is_empty());
    assert_eq!(system.pids_named("notepad.exe").len(), 1);

    let history = executor.recent_history(10).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, ActionStatus::Pending);
    assert!(history[0].snapshot_id.is_none());
    assert!(executor.snapshots().is_empty());
}

#[tokio::test]
async fn test_fully_auto_closes_process() {
    let system = notepad();
    system.add_process("notepad.exe", Some("/usr/bin/notepad"));
    let executor = build(&config("fully_auto"), &system);

    let result = executor
        .execute(ActionKind::CloseProcess, "notepad.exe", Parameters::new(), false)
        .await;

    assert!(result.success, "{:?}", result);
    assert!(result.data.as_ref().unwrap()["count"].as_u64().unwrap() >= 1);
    assert!(system.pids_named("notepad.exe").is_empty());
    assert!(result.execution_time_ms >= 0.0);

    let history = executor.recent_history(10).unwrap();
    assert_eq!(history[0].status, ActionStatus::Success);
    assert!(history[0].completed_at.is_some());
    assert_eq!(history[0].result.as_ref().unwrap().message, result.message);
}

#[tokio::test]
async fn test_protected_target_rejected_before_os_call() {
    let system = Arc::new(ScriptedSystem::new().with_process("explorer.exe", None));
    let executor = build(&config("fully_auto"), &system);

    let result = executor
        .execute(ActionKind::KillProcess, "explorer.exe", Parameters::new(), true)
        .await;

    assert!(!result.success);
    assert!(result.error.as_deref().unwrap().contains("protected"));
    assert!(result.message.starts_with("Validation failed"));
    assert_eq!(result.data.as_ref().unwrap()["code"], "VALIDATION_FAILED");
    assert!(system.calls().is_empty());

    let history = executor.recent_history(10).unwrap();
    assert_eq!(history[0].status, ActionStatus::Failed);
}

#[tokio::test]
async fn test_protected_match_is_case_insensitive() {
    let system = Arc::new(ScriptedSystem::new().with_process("EXPLORER.EXE", None));
    let executor = build(&config("fully_auto"), &system);

    let result = executor
        .execute(ActionKind::CloseProcess, "  Explorer.exe ", Parameters::new(), true)
        .await;
    assert!(result.error.as_deref().unwrap().contains("protected"));
    assert!(system.calls().is_empty());
}

#[tokio::test]
async fn test_protected_veto_ignores_level_and_approval() {
    for level in ["manual", "semi_auto", "fully_auto"] {
        for approved in [false, true] {
            for kind in [ActionKind::CloseProcess, ActionKind::KillProcess] {
                let system = Arc::new(ScriptedSystem::new().with_process("explorer.exe", None));
                let executor = build(&config(level), &system);

                let result = executor
                    .execute(kind, "explorer.exe", Parameters::new(), approved)
                    .await;
                assert!(!result.success, "{} {} {}", level, approved, kind);
                assert_eq!(
                    result.data.as_ref().unwrap()["code"],
                    "VALIDATION_FAILED",
                    "{} {} {}",
                    level,
                    approved,
                    kind
                );
                assert!(system.calls().is_empty());
                assert_eq!(system.pids_named("explorer.exe").len(), 1);
            }
        }
    }
}

/// Trims memory on any target and never rejects anything itself.
struct Unguarded {
    target: String,
    parameters: Parameters,
    system: Arc<dyn SystemControl>,
}

#[async_trait]
impl Action for Unguarded {
    fn kind(&self) -> ActionKind {
        ActionKind::ClearRam
    }

    fn target(&self) -> &str {
        &self.target
    }

    fn parameters(&self) -> &Parameters {
        &self.parameters
    }

    fn risk_level(&self, _policy: &SafetyPolicy) -> RiskLevel {
        RiskLevel::Low
    }

    async fn validate(&self, _policy: &SafetyPolicy) -> Result<(), ValidationError> {
        Ok(())
    }

    async fn execute(&self, ctx: &ExecutionContext) -> ActionResult {
        match ctx.bounded(self.system.trim_memory()).await {
            Ok(_) => ActionResult::ok("trimmed"),
            Err(result) => result,
        }
    }
}

#[tokio::test]
async fn test_executor_vetoes_protected_target_on_its_own() {
    let system = Arc::new(ScriptedSystem::new());
    let mut registry = ActionRegistry::new(system.clone());
    registry.register(ActionKind::ClearRam, |target, parameters, system| {
        Box::new(Unguarded {
            target,
            parameters,
            system,
        })
    });
    let config = config("fully_auto");
    let executor = Executor::new(
        SafetyPolicy::from_config(&config.safety).unwrap(),
        ExecutorSettings::from_config(&config),
        registry,
        Arc::new(Database::in_memory().unwrap()),
    );

    let unguarded = executor
        .registry()
        .create(ActionKind::ClearRam, "explorer.exe", Parameters::new())
        .unwrap();
    assert!(unguarded.validate(executor.policy()).await.is_ok());

    let result = executor.dispatch(unguarded, true).await;
    assert!(!result.success);
    assert!(result.error.as_deref().unwrap().contains("protected"));
    assert!(system.calls().is_empty());

    let allowed = executor
        .execute(ActionKind::ClearRam, "host", Parameters::new(), true)
        .await;
    assert!(allowed.success, "{:?}", allowed);
    assert_eq!(system.calls(), vec![SystemCall::TrimMemory]);
}

#[tokio::test]
async fn test_failed_close_rolls_back_and_keeps_original_error() {
    let system = notepad();
    system.fail(Operation::Terminate, "access denied");
    let executor = build(&config("fully_auto"), &system);

    let result = executor
        .execute(ActionKind::CloseProcess, "notepad.exe", Parameters::new(), false)
        .await;

    assert!(!result.success);
    assert!(result.has_error(ErrorCode::ExecutionFailed));
    assert!(result.message.contains("access denied"));
    let rollback = &result.data.as_ref().unwrap()["rollback"];
    assert_eq!(rollback["success"], true);

    let history = executor.recent_history(10).unwrap();
    assert_eq!(history[0].status, ActionStatus::RolledBack);
    assert!(history[0].rolled_back);
    let stored = history[0].result.as_ref().unwrap();
    assert!(!stored.success);
    assert_eq!(stored.error, result.error);

    // A rolled-back dispatch releases its snapshot.
    assert!(executor.snapshots().is_empty());
    assert_eq!(executor.rollback_history(10).len(), 1);
}

#[tokio::test]
async fn test_out_of_range_affinity_names_valid_cores() {
    let system = Arc::new(
        ScriptedSystem::new()
            .with_cpu_count(4)
            .with_process("game.exe", None),
    );
    let registry = ActionRegistry::with_defaults(system.clone());
    let action = registry
        .create(ActionKind::SetCpuAffinity, "game.exe", params(json!({"cpus": [0, 8]})))
        .unwrap();

    let err = action.validate(&SafetyPolicy::default()).await.unwrap_err();
    assert!(matches!(err, ValidationError::InvalidParameter { name: "cpus", .. }));
    assert!(err.to_string().contains("0-3"));
    assert!(system.calls().is_empty());

    let executor = build(&config("fully_auto"), &system);
    let result = executor
        .execute(
            ActionKind::SetCpuAffinity,
            "game.exe",
            params(json!({"cpus": "0,8"})),
            true,
        )
        .await;
    assert!(!result.success);
    assert!(result.message.contains("valid cores are 0-3"));
    assert!(system.calls().is_empty());
}

// =============================================================================
// Approval and rollback eligibility
// =============================================================================

#[tokio::test]
async fn test_high_risk_needs_approval_even_when_semi_auto() {
    let system = notepad();
    let executor = build(&config("semi_auto"), &system);

    let result = executor
        .execute(ActionKind::KillProcess, "notepad.exe", Parameters::new(), false)
        .await;
    assert!(result.has_error(ErrorCode::ApprovalRequired));
    assert!(system.calls().is_empty());

    let result = executor
        .execute(ActionKind::KillProcess, "notepad.exe", Parameters::new(), true)
        .await;
    assert!(result.success, "{:?}", result);
    assert_eq!(system.calls().len(), 1);
}

#[tokio::test]
async fn test_failed_kill_is_never_rolled_back() {
    let system = notepad();
    system.fail(Operation::Kill, "denied");
    let executor = build(&config("fully_auto"), &system);

    let result = executor
        .execute(ActionKind::KillProcess, "notepad.exe", Parameters::new(), true)
        .await;
    assert!(!result.success);
    assert!(result.data.as_ref().unwrap().get("rollback").is_none());

    let history = executor.recent_history(10).unwrap();
    assert_eq!(history[0].status, ActionStatus::Failed);
    assert!(!history[0].rolled_back);
    assert!(executor.snapshots().is_empty());
}

#[tokio::test]
async fn test_rollback_disabled_leaves_failure() {
    let system = notepad();
    system.fail(Operation::Terminate, "denied");
    let mut config = config("fully_auto");
    config.safety.enable_rollback = false;
    let executor = build(&config, &system);

    let result = executor
        .execute(ActionKind::CloseProcess, "notepad.exe", Parameters::new(), false)
        .await;
    assert!(!result.success);
    let history = executor.recent_history(10).unwrap();
    assert_eq!(history[0].status, ActionStatus::Failed);
    assert!(executor.rollback_history(10).is_empty());
}

#[tokio::test]
async fn test_no_snapshot_means_no_rollback() {
    let system = notepad();
    system.fail(Operation::Terminate, "denied");
    let mut config = config("fully_auto");
    config.safety.snapshot_before_action = false;
    let executor = build(&config, &system);

    executor
        .execute(ActionKind::CloseProcess, "notepad.exe", Parameters::new(), false)
        .await;
    let history = executor.recent_history(10).unwrap();
    assert_eq!(history[0].status, ActionStatus::Failed);
    assert!(history[0].snapshot_id.is_none());
}

#[tokio::test]
async fn test_unrestorable_snapshot_skips_rollback() {
    let system = notepad();
    system.fail(Operation::Metrics, "no metrics");
    system.fail(Operation::Terminate, "denied");
    let executor = build(&config("fully_auto"), &system);

    let result = executor
        .execute(ActionKind::CloseProcess, "notepad.exe", Parameters::new(), false)
        .await;
    assert!(!result.success);
    let history = executor.recent_history(10).unwrap();
    assert_eq!(history[0].status, ActionStatus::Failed);
    assert!(history[0].snapshot_id.is_some());
}

// =============================================================================
// Audit log
// =============================================================================

#[tokio::test]
async fn test_one_record_per_dispatch() {
    let system = notepad();
    let executor = build(&config("fully_auto"), &system);

    executor
        .execute(ActionKind::ClearRam, "host", Parameters::new(), false)
        .await;
    executor
        .execute(ActionKind::DisplayBrightness, "host", params(json!({"level": 30})), false)
        .await;
    executor
        .execute(ActionKind::CloseProcess, "missing.exe", Parameters::new(), false)
        .await;

    let history = executor.recent_history(10).unwrap();
    assert_eq!(history.len(), 3);
    assert!(history.iter().all(|r| r.status.is_terminal()));

    let stats = executor.stats().unwrap();
    assert_eq!(stats.total, 3);
    assert_eq!(stats.successful, 2);
    assert_eq!(stats.failed, 1);

    let failures = executor.recent_by_status(ActionStatus::Failed, 10).unwrap();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].target, "missing.exe");

    let record = executor.get(failures[0].action_id).unwrap().unwrap();
    assert_eq!(record.kind, ActionKind::CloseProcess);
}

#[tokio::test]
async fn test_unknown_kind_via_registry_is_reported() {
    let system = Arc::new(ScriptedSystem::new());
    let executor = Executor::new(
        SafetyPolicy::default(),
        ExecutorSettings::default(),
        ActionRegistry::new(system),
        Arc::new(Database::in_memory().unwrap()),
    );
    let result = executor
        .execute(ActionKind::ClearRam, "host", Parameters::new(), true)
        .await;
    assert!(result.has_error(ErrorCode::UnknownAction));
    assert!(executor.recent_history(10).unwrap().is_empty());
}

// =============================================================================
// Panics and deadlines
// =============================================================================

#[tokio::test]
async fn test_panicking_action_is_recorded_as_failed() {
    let system = Arc::new(ScriptedSystem::new());
    system.panic_on(Operation::TrimMemory);
    let executor = build(&config("fully_auto"), &system);

    let result = executor
        .execute(ActionKind::ClearRam, "host", Parameters::new(), false)
        .await;

    assert!(!result.success);
    assert_eq!(result.message, "Action dispatch failed");
    assert!(result.error.as_deref().unwrap().contains("scripted panic"));

    let history = executor.recent_history(10).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, ActionStatus::Failed);
    assert!(history[0].completed_at.is_some());

    // The executor keeps working afterwards.
    let after = executor
        .execute(ActionKind::DisplayBrightness, "host", params(json!({"level": 10})), false)
        .await;
    assert!(after.success);
}

#[tokio::test]
async fn test_stalled_action_hits_deadline() {
    let system = Arc::new(ScriptedSystem::new());
    system.delay(Operation::CleanupTemp, Duration::from_secs(30));
    let mut config = config("fully_auto");
    config.execution.action_timeout_seconds = 1;
    config.execution.graceful_terminate_seconds = 0;
    let executor = build(&config, &system);

    let result = executor
        .execute(ActionKind::DiskCleanup, "host", Parameters::new(), false)
        .await;
    assert!(result.has_error(ErrorCode::DeadlineExceeded));
    let history = executor.recent_history(10).unwrap();
    assert!(history[0].status.is_terminal());
}

// =============================================================================
// Concurrency
// =============================================================================

#[tokio::test]
async fn test_concurrency_limit_is_enforced() {
    let system = Arc::new(ScriptedSystem::new());
    let names: Vec<String> = (0..6).map(|i| format!("worker{}.exe", i)).collect();
    for name in &names {
        system.add_process(name, None);
    }
    system.delay(Operation::Terminate, Duration::from_millis(100));
    let mut config = config("fully_auto");
    config.execution.max_concurrent_actions = 2;
    let executor = build(&config, &system);

    let handles: Vec<_> = names
        .iter()
        .map(|name| {
            let executor = executor.clone();
            let name = name.clone();
            tokio::spawn(async move {
                executor
                    .execute(ActionKind::CloseProcess, &name, Parameters::new(), false)
                    .await
            })
        })
        .collect();
    for handle in handles {
        assert!(handle.await.unwrap().success);
    }
    assert!(system.max_in_flight() <= 2);
    assert_eq!(executor.recent_history(10).unwrap().len(), 6);
}

#[tokio::test]
async fn test_same_target_dispatches_are_serialized() {
    let system = Arc::new(ScriptedSystem::new());
    system.delay(Operation::SetBrightness, Duration::from_millis(50));
    let executor = build(&config("fully_auto"), &system);

    let handles: Vec<_> = (0..4u8)
        .map(|i| {
            let executor = executor.clone();
            tokio::spawn(async move {
                executor
                    .execute(
                        ActionKind::DisplayBrightness,
                        "host",
                        params(json!({"level": 20 + i})),
                        false,
                    )
                    .await
            })
        })
        .collect();
    for handle in handles {
        assert!(handle.await.unwrap().success);
    }
    assert_eq!(system.max_in_flight(), 1);
    assert_eq!(system.call_count(), 4);
}

#[tokio::test]
async fn test_waiting_for_slot_times_out() {
    // Validation and snapshot each read the process list, so the first
    // dispatch holds the only slot for well over a second.
    let system = notepad();
    system.delay(Operation::ListProcesses, Duration::from_millis(700));
    let mut config = config("fully_auto");
    config.execution.max_concurrent_actions = 1;
    config.execution.action_timeout_seconds = 1;
    let executor = build(&config, &system);

    let first = {
        let executor = executor.clone();
        tokio::spawn(async move {
            executor
                .execute(ActionKind::CloseProcess, "notepad.exe", Parameters::new(), false)
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;

    let second = executor
        .execute(ActionKind::DiskCleanup, "host", Parameters::new(), false)
        .await;
    assert!(second.has_error(ErrorCode::ConcurrencyLimit));
    assert!(first.await.unwrap().success);

    let failures = executor.recent_by_status(ActionStatus::Failed, 10).unwrap();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].kind, ActionKind::DiskCleanup);
}

#[tokio::test]
async fn test_rollback_last_waits_for_running_dispatch() {
    let system = Arc::new(ScriptedSystem::new().with_brightness(Some(70)));
    let executor = build(&config("fully_auto"), &system);
    let result = executor
        .execute(ActionKind::DisplayBrightness, "host", params(json!({"level": 20})), false)
        .await;
    assert!(result.success);

    system.delay(Operation::SetBrightness, Duration::from_millis(300));
    let running = {
        let executor = executor.clone();
        tokio::spawn(async move {
            executor
                .execute(ActionKind::DisplayBrightness, "host", params(json!({"level": 50})), false)
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let rollback = executor.rollback_last().await;
    assert!(rollback.success, "{:?}", rollback);
    assert!(running.await.unwrap().success);

    // The writes never overlapped, and the rollback undid the newest action.
    assert_eq!(system.max_in_flight(), 1);
    assert_eq!(system.current_brightness(), Some(20));
    assert_eq!(
        system.calls(),
        vec![
            SystemCall::SetBrightness(20),
            SystemCall::SetBrightness(50),
            SystemCall::SetBrightness(20),
        ]
    );

    let history = executor.recent_history(10).unwrap();
    assert_eq!(history[0].parameters["level"], 50);
    assert!(history[0].rolled_back);
    assert!(!history[1].rolled_back);
}

// =============================================================================
// Bounded phases
// =============================================================================

fn one_second_timeout() -> GuardianConfig {
    let mut config = config("fully_auto");
    config.execution.action_timeout_seconds = 1;
    config.execution.graceful_terminate_seconds = 0;
    config
}

#[tokio::test]
async fn test_stalled_validation_is_rejected() {
    let system = notepad();
    system.delay(Operation::ListProcesses, Duration::from_secs(3600));
    let executor = build(&one_second_timeout(), &system);

    let result = tokio::time::timeout(
        Duration::from_secs(5),
        executor.execute(ActionKind::CloseProcess, "notepad.exe", Parameters::new(), false),
    )
    .await
    .expect("dispatch must not hang in validation");
    assert!(result.has_error(ErrorCode::DeadlineExceeded));
    assert!(system.calls().is_empty());

    let history = executor.recent_history(10).unwrap();
    assert_eq!(history[0].status, ActionStatus::Failed);
    assert!(history[0].snapshot_id.is_none());

    // The target lease and slot were released.
    system.delay(Operation::ListProcesses, Duration::ZERO);
    let again = executor
        .execute(ActionKind::CloseProcess, "notepad.exe", Parameters::new(), false)
        .await;
    assert!(again.success, "{:?}", again);
}

#[tokio::test]
async fn test_stalled_snapshot_capture_is_bounded() {
    let system = Arc::new(ScriptedSystem::new());
    system.delay(Operation::Metrics, Duration::from_secs(3600));
    let executor = build(&one_second_timeout(), &system);

    let result = tokio::time::timeout(
        Duration::from_secs(5),
        executor.execute(ActionKind::ClearRam, "host", Parameters::new(), false),
    )
    .await
    .expect("dispatch must not hang in snapshot capture");
    assert!(result.success, "{:?}", result);

    let history = executor.recent_history(10).unwrap();
    let snapshot_id = history[0].snapshot_id.unwrap();
    let snapshot = executor.snapshots().get(snapshot_id).unwrap();
    assert!(!snapshot.can_restore);
}

#[tokio::test]
async fn test_stalled_automatic_rollback_is_bounded() {
    let system = Arc::new(ScriptedSystem::new().with_brightness(Some(70)));
    system.delay(Operation::SetBrightness, Duration::from_secs(3600));
    let executor = build(&one_second_timeout(), &system);

    let result = tokio::time::timeout(
        Duration::from_secs(10),
        executor.execute(ActionKind::DisplayBrightness, "host", params(json!({"level": 20})), false),
    )
    .await
    .expect("dispatch must not hang in rollback");
    assert!(result.has_error(ErrorCode::DeadlineExceeded));
    let rollback = &result.data.as_ref().unwrap()["rollback"];
    assert_eq!(rollback["success"], false);
    assert_eq!(rollback["error"], "DEADLINE_EXCEEDED");

    let history = executor.recent_history(10).unwrap();
    assert_eq!(history[0].status, ActionStatus::Failed);
    assert!(!history[0].rolled_back);
}

#[tokio::test]
async fn test_stalled_rollback_last_is_bounded() {
    let system = Arc::new(ScriptedSystem::new().with_brightness(Some(70)));
    let executor = build(&one_second_timeout(), &system);
    let result = executor
        .execute(ActionKind::DisplayBrightness, "host", params(json!({"level": 20})), false)
        .await;
    assert!(result.success);

    system.delay(Operation::SetBrightness, Duration::from_secs(3600));
    let result = tokio::time::timeout(Duration::from_secs(10), executor.rollback_last())
        .await
        .expect("rollback_last must not hang");
    assert!(result.has_error(ErrorCode::DeadlineExceeded));

    let history = executor.recent_history(10).unwrap();
    assert_eq!(history[0].status, ActionStatus::Success);
    assert!(!history[0].rolled_back);
}

// =============================================================================
// rollback_last
// =============================================================================

#[tokio::test]
async fn test_rollback_last_without_history() {
    let system = Arc::new(ScriptedSystem::new());
    let executor = build(&config("fully_auto"), &system);
    let result = executor.rollback_last().await;
    assert!(result.has_error(ErrorCode::NoActions));
}

#[tokio::test]
async fn test_rollback_last_without_snapshot() {
    let system = Arc::new(ScriptedSystem::new());
    let executor = build(&config("fully_auto"), &system);
    executor
        .execute(ActionKind::Sleep, "host", Parameters::new(), false)
        .await;

    let result = executor.rollback_last().await;
    assert!(result.has_error(ErrorCode::NoSnapshot));
}

#[tokio::test]
async fn test_rollback_last_restores_previous_state() {
    let system = Arc::new(ScriptedSystem::new().with_brightness(Some(70)));
    let executor = build(&config("fully_auto"), &system);

    let result = executor
        .execute(ActionKind::DisplayBrightness, "host", params(json!({"level": 20})), false)
        .await;
    assert!(result.success);
    assert_eq!(system.current_brightness(), Some(20));

    let result = executor.rollback_last().await;
    assert!(result.success, "{:?}", result);
    assert_eq!(system.current_brightness(), Some(70));
    assert_eq!(
        system.calls(),
        vec![SystemCall::SetBrightness(20), SystemCall::SetBrightness(70)]
    );

    let history = executor.recent_history(10).unwrap();
    assert_eq!(history[0].status, ActionStatus::Success);
    assert!(history[0].rolled_back);

    // Already rolled back.
    assert!(executor.rollback_last().await.has_error(ErrorCode::NoSnapshot));
}

#[tokio::test]
async fn test_rollback_last_unsupported_action() {
    let system = Arc::new(ScriptedSystem::new().with_path("/usr/bin/editor"));
    let executor = build(&config("fully_auto"), &system);

    let result = executor
        .execute(ActionKind::StartProcess, "/usr/bin/editor", Parameters::new(), false)
        .await;
    assert!(result.success, "{:?}", result);

    let result = executor.rollback_last().await;
    assert!(result.has_error(ErrorCode::NotImplemented));
}

// =============================================================================
// Snapshots
// =============================================================================

#[tokio::test]
async fn test_snapshot_store_is_bounded() {
    let system = Arc::new(ScriptedSystem::new());
    let mut config = config("fully_auto");
    config.safety.max_snapshots = 2;
    let executor = build(&config, &system);

    for level in [10, 20, 30, 40] {
        let result = executor
            .execute(ActionKind::DisplayBrightness, "host", params(json!({"level": level})), false)
            .await;
        assert!(result.success);
    }
    assert_eq!(executor.snapshots().len(), 2);
}

// =============================================================================
// Profiles
// =============================================================================

#[tokio::test]
async fn test_apply_profile_continues_past_failures() {
    let dir = tempfile::TempDir::new().unwrap();
    let mut manager = ProfileManager::new(dir.path());
    manager.create_defaults().unwrap();
    let gaming = manager.activate("gaming").unwrap();

    let system = Arc::new(ScriptedSystem::new());
    system.add_process("chrome.exe", Some("/opt/chrome/chrome.exe"));
    let executor = build(&config("fully_auto"), &system);

    let report = apply_profile(&executor, &gaming, false).await.unwrap();
    assert_eq!(report.steps.len(), 5);
    // Discord and Spotify are not running.
    assert_eq!(report.failed(), 2);
    assert_eq!(report.succeeded(), 3);
    assert!(system.pids_named("chrome.exe").is_empty());
    assert_eq!(
        system.current_power_plan(),
        Some(guardian_action::platform::PowerPlan::Performance)
    );
    assert_eq!(executor.recent_history(10).unwrap().len(), 5);
}
