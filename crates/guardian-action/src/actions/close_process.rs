//! Graceful process termination by name.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{info, warn};

use super::process::{for_each_pid, process_risk, require_running};
use super::{platform_failure, Action, ExecutionContext};
use crate::error::{PlatformError, ValidationError};
use crate::platform::{SpawnOutcome, SystemControl, TerminateOutcome};
use crate::policy::SafetyPolicy;
use crate::snapshot::Snapshot;
use crate::types::{ActionKind, ActionResult, ErrorCode, Parameters, RiskLevel};

/// Ask every process named `target` to exit, force-killing after the
/// graceful timeout. Rollback relaunches instances that were running at
/// snapshot time and are gone now.
pub struct CloseProcess {
    target: String,
    parameters: Parameters,
    system: Arc<dyn SystemControl>,
}

impl CloseProcess {
    pub fn new(target: String, parameters: Parameters, system: Arc<dyn SystemControl>) -> Self {
        Self {
            target,
            parameters,
            system,
        }
    }
}

#[async_trait]
impl Action for CloseProcess {
    fn kind(&self) -> ActionKind {
        ActionKind::CloseProcess
    }

    fn target(&self) -> &str {
        &self.target
    }

    fn parameters(&self) -> &Parameters {
        &self.parameters
    }

    fn risk_level(&self, policy: &SafetyPolicy) -> RiskLevel {
        process_risk(policy, &self.target, RiskLevel::Low)
    }

    fn estimated_impact(&self) -> Option<String> {
        Some(format!("Close all instances of {}", self.target))
    }

    async fn validate(&self, policy: &SafetyPolicy) -> Result<(), ValidationError> {
        require_running(self.system.as_ref(), policy, &self.target).await?;
        Ok(())
    }

    async fn execute(&self, ctx: &ExecutionContext) -> ActionResult {
        let processes = match ctx.bounded(self.system.find_processes(&self.target)).await {
            Ok(processes) => processes,
            Err(result) => return result,
        };
        if processes.is_empty() {
            return ActionResult::failure(
                format!("No running process named {}", self.target),
                ErrorCode::ProcessNotFound,
            );
        }

        let pids: Vec<u32> = processes.iter().map(|p| p.pid).collect();
        let grace = ctx.graceful_timeout;
        let system = &self.system;
        let forced = Mutex::new(Vec::new());
        let outcome = for_each_pid(ctx, &pids, |pid| {
            let forced = &forced;
            async move {
                if system.terminate(pid, grace).await? == TerminateOutcome::Forced {
                    warn!(pid, "Process ignored terminate, killed");
                    forced.lock().unwrap_or_else(PoisonError::into_inner).push(pid);
                }
                Ok::<(), PlatformError>(())
            }
        })
        .await;

        let forced = forced.into_inner().unwrap_or_else(PoisonError::into_inner);
        let mut extra = serde_json::Map::new();
        if !forced.is_empty() {
            extra.insert("forced".into(), json!(forced));
        }
        outcome.into_result("Closed", &self.target, extra)
    }

    async fn rollback(&self, snapshot: &Snapshot) -> ActionResult {
        let before: Vec<_> = snapshot.processes_named(&self.target).collect();
        let current: HashSet<u32> = match self.system.find_processes(&self.target).await {
            Ok(processes) => processes.into_iter().map(|p| p.pid).collect(),
            Err(e) => return platform_failure(&e),
        };
        let missing: Vec<_> = before
            .into_iter()
            .filter(|p| !current.contains(&p.pid))
            .collect();

        if missing.is_empty() {
            return ActionResult::ok(format!("No instances of {} to restore", self.target))
                .with_data(json!({"restarted": []}));
        }
        if missing.iter().any(|p| p.exe.is_none()) {
            return ActionResult::failure(
                format!("Snapshot has no executable path for {}", self.target),
                ErrorCode::NoSnapshotData,
            );
        }

        let mut restarted = Vec::new();
        let mut errors = Vec::new();
        for process in missing {
            let Some(exe) = process.exe.as_deref() else {
                continue;
            };
            match self.system.spawn(exe).await {
                Ok(SpawnOutcome::Running { pid }) => restarted.push(pid),
                Ok(SpawnOutcome::Exited { code }) => {
                    errors.push(format!("{} exited with {:?}", exe.display(), code))
                }
                Err(e) => errors.push(format!("{}: {}", exe.display(), e)),
            }
        }

        if errors.is_empty() {
            info!(process = %self.target, count = restarted.len(), "Relaunched closed processes");
            ActionResult::ok(format!(
                "Restarted {} instance(s) of {}",
                restarted.len(),
                self.target
            ))
            .with_data(json!({"restarted": restarted}))
        } else {
            ActionResult::failure(
                format!("Failed to restart {}: {}", self.target, errors.join("; ")),
                ErrorCode::ExecutionFailed,
            )
            .with_data(json!({
                "restarted": restarted,
                "errors": errors.into_iter().map(Value::String).collect::<Vec<_>>(),
            }))
        }
    }
}
