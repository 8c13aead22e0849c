//! Forced, irreversible process kill.

use std::sync::Arc;

use async_trait::async_trait;

use super::process::{for_each_pid, require_running};
use super::{Action, ExecutionContext};
use crate::error::ValidationError;
use crate::platform::SystemControl;
use crate::policy::SafetyPolicy;
use crate::types::{ActionKind, ActionResult, ErrorCode, Parameters, RiskLevel};

pub struct KillProcess {
    target: String,
    parameters: Parameters,
    system: Arc<dyn SystemControl>,
}

impl KillProcess {
    pub fn new(target: String, parameters: Parameters, system: Arc<dyn SystemControl>) -> Self {
        Self {
            target,
            parameters,
            system,
        }
    }
}

#[async_trait]
impl Action for KillProcess {
    fn kind(&self) -> ActionKind {
        ActionKind::KillProcess
    }

    fn target(&self) -> &str {
        &self.target
    }

    fn parameters(&self) -> &Parameters {
        &self.parameters
    }

    fn risk_level(&self, _policy: &SafetyPolicy) -> RiskLevel {
        RiskLevel::High
    }

    fn can_rollback(&self) -> bool {
        false
    }

    fn estimated_impact(&self) -> Option<String> {
        Some(format!("Force kill {} (cannot be undone, may lose unsaved data)", self.target))
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
            return ActionResult::failure("Process not found", ErrorCode::ProcessNotFound);
        }

        let pids: Vec<u32> = processes.iter().map(|p| p.pid).collect();
        let system = &self.system;
        for_each_pid(ctx, &pids, |pid| async move { system.kill(pid).await })
            .await
            .into_result("Killed", &self.target, serde_json::Map::new())
    }
}
