//! Shared plumbing for actions that target processes by name.

use std::future::Future;

use serde_json::{json, Value};
use tracing::{debug, warn};

use super::ExecutionContext;
use crate::error::{PlatformError, ValidationError};
use crate::platform::{ProcessInfo, SystemControl};
use crate::policy::SafetyPolicy;
use crate::types::{ActionResult, ErrorCode, RiskLevel};

/// Protected targets are always high risk.
pub fn process_risk(policy: &SafetyPolicy, target: &str, baseline: RiskLevel) -> RiskLevel {
    if policy.is_protected(target) {
        RiskLevel::High
    } else {
        baseline
    }
}

/// Veto protected targets and require at least one matching process.
pub async fn require_running(
    system: &dyn SystemControl,
    policy: &SafetyPolicy,
    target: &str,
) -> Result<Vec<ProcessInfo>, ValidationError> {
    if target.trim().is_empty() {
        return Err(ValidationError::InvalidParameter {
            name: "target",
            reason: "process name must not be empty".to_string(),
        });
    }
    policy.check_target(target)?;
    let processes = system
        .find_processes(target)
        .await
        .map_err(|e| ValidationError::Unsupported(format!("Cannot list processes: {}", e)))?;
    if processes.is_empty() {
        return Err(ValidationError::TargetNotFound(target.to_string()));
    }
    Ok(processes)
}

/// Per-pid outcome of a multi-process operation.
#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub applied: Vec<u32>,
    pub failed: Vec<(u32, PlatformError)>,
    /// Pids never attempted because the deadline passed.
    pub skipped: Vec<u32>,
    pub deadline_hit: bool,
}

impl BatchOutcome {
    pub fn total(&self) -> usize {
        self.applied.len() + self.failed.len() + self.skipped.len()
    }

    /// Aggregate into one result.
    ///
    /// All applied is success. Otherwise the code is `DEADLINE_EXCEEDED`
    /// if the deadline cut the batch short, `PARTIAL_FAILURE` if some pids
    /// were applied, `PROCESS_NOT_FOUND` if every pid vanished, and
    /// `EXECUTION_FAILED` for the rest.
    pub fn into_result(self, verb: &str, target: &str, mut extra: serde_json::Map<String, Value>) -> ActionResult {
        let total = self.total();
        let applied = self.applied.len();

        extra.insert("pids".into(), json!(self.applied));
        extra.insert("count".into(), json!(applied));
        if !self.failed.is_empty() {
            let failed: Vec<Value> = self
                .failed
                .iter()
                .map(|(pid, e)| json!({"pid": pid, "error": e.to_string()}))
                .collect();
            extra.insert("failed".into(), Value::Array(failed));
        }
        if !self.skipped.is_empty() {
            extra.insert("skipped".into(), json!(self.skipped));
        }

        if applied == total && !self.deadline_hit {
            return ActionResult::ok(format!("{} {} instance(s) of {}", verb, applied, target))
                .with_data(Value::Object(extra));
        }

        let code = if self.deadline_hit {
            ErrorCode::DeadlineExceeded
        } else if applied > 0 {
            ErrorCode::PartialFailure
        } else if self
            .failed
            .iter()
            .all(|(_, e)| matches!(e, PlatformError::ProcessNotFound(_)))
        {
            ErrorCode::ProcessNotFound
        } else {
            ErrorCode::ExecutionFailed
        };
        let mut message = format!("{} {} of {} instance(s) of {}", verb, applied, total, target);
        if let Some((pid, e)) = self.failed.first() {
            message.push_str(&format!(" (pid {}: {})", pid, e));
        }
        ActionResult::failure(message, code).with_data(Value::Object(extra))
    }
}

/// Apply `op` to each pid in order, stopping at the context deadline.
pub async fn for_each_pid<F, Fut>(ctx: &ExecutionContext, pids: &[u32], mut op: F) -> BatchOutcome
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<(), PlatformError>>,
{
    let mut outcome = BatchOutcome::default();
    for (i, &pid) in pids.iter().enumerate() {
        if ctx.expired() {
            outcome.deadline_hit = true;
            outcome.skipped.extend_from_slice(&pids[i..]);
            break;
        }
        match tokio::time::timeout_at(ctx.deadline(), op(pid)).await {
            Ok(Ok(())) => {
                debug!(pid, "Applied");
                outcome.applied.push(pid);
            }
            Ok(Err(e)) => {
                warn!(pid, error = %e, "Process operation failed");
                outcome.failed.push((pid, e));
            }
            Err(_) => {
                outcome.deadline_hit = true;
                outcome.failed.push((
                    pid,
                    PlatformError::Failed("deadline exceeded".to_string()),
                ));
                outcome.skipped.extend_from_slice(&pids[i + 1..]);
                break;
            }
        }
    }
    outcome
}
