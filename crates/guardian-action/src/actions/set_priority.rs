//! Change the scheduling priority of every process named `target`.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use super::process::{for_each_pid, process_risk, require_running};
use super::{Action, ExecutionContext};
use crate::error::ValidationError;
use crate::params::get_str;
use crate::platform::{Priority, SystemControl};
use crate::policy::SafetyPolicy;
use crate::types::{ActionKind, ActionResult, ErrorCode, Parameters, RiskLevel};

pub struct SetPriority {
    target: String,
    parameters: Parameters,
    system: Arc<dyn SystemControl>,
}

impl SetPriority {
    pub fn new(target: String, parameters: Parameters, system: Arc<dyn SystemControl>) -> Self {
        Self {
            target,
            parameters,
            system,
        }
    }

    fn priority(&self) -> Result<Priority, ValidationError> {
        let raw = get_str(&self.parameters, "priority")
            .ok_or(ValidationError::MissingParameter("priority"))?;
        raw.parse()
            .map_err(|reason| ValidationError::InvalidParameter {
                name: "priority",
                reason,
            })
    }
}

#[async_trait]
impl Action for SetPriority {
    fn kind(&self) -> ActionKind {
        ActionKind::SetPriority
    }

    fn target(&self) -> &str {
        &self.target
    }

    fn parameters(&self) -> &Parameters {
        &self.parameters
    }

    fn risk_level(&self, policy: &SafetyPolicy) -> RiskLevel {
        let baseline = match self.priority() {
            Ok(p) if p.is_elevated() => RiskLevel::Medium,
            _ => RiskLevel::Low,
        };
        process_risk(policy, &self.target, baseline)
    }

    fn estimated_impact(&self) -> Option<String> {
        let priority = get_str(&self.parameters, "priority").unwrap_or_else(|| "normal".to_string());
        Some(format!("Set {} priority to {}", self.target, priority))
    }

    async fn validate(&self, policy: &SafetyPolicy) -> Result<(), ValidationError> {
        self.priority()?;
        require_running(self.system.as_ref(), policy, &self.target).await?;
        Ok(())
    }

    async fn execute(&self, ctx: &ExecutionContext) -> ActionResult {
        let priority = match self.priority() {
            Ok(p) => p,
            Err(e) => return ActionResult::failure(e.to_string(), ErrorCode::ValidationFailed),
        };
        let processes = match ctx.bounded(self.system.find_processes(&self.target)).await {
            Ok(processes) => processes,
            Err(result) => return result,
        };
        if processes.is_empty() {
            return ActionResult::failure("Process not found", ErrorCode::ProcessNotFound);
        }

        let pids: Vec<u32> = processes.iter().map(|p| p.pid).collect();
        let system = &self.system;
        let outcome =
            for_each_pid(ctx, &pids, |pid| async move { system.set_priority(pid, priority).await }).await;

        let mut extra = serde_json::Map::new();
        extra.insert("priority".into(), json!(priority.to_string()));
        outcome.into_result("Updated priority for", &self.target, extra)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{ScriptedSystem, SystemCall};
    use std::time::Duration;
    use uuid::Uuid;

    fn action(system: &Arc<ScriptedSystem>, priority: Option<&str>) -> SetPriority {
        let mut params = Parameters::new();
        if let Some(p) = priority {
            params.insert("priority".into(), json!(p));
        }
        SetPriority::new("game.exe".to_string(), params, system.clone())
    }

    #[test]
    fn test_risk_depends_on_priority() {
        let system = Arc::new(ScriptedSystem::new());
        let policy = SafetyPolicy::default();
        assert_eq!(action(&system, Some("normal")).risk_level(&policy), RiskLevel::Low);
        assert_eq!(action(&system, Some("high")).risk_level(&policy), RiskLevel::Medium);
        assert_eq!(
            action(&system, Some("realtime")).risk_level(&policy),
            RiskLevel::Medium
        );
    }

    #[tokio::test]
    async fn test_validate_parameter() {
        let system = Arc::new(ScriptedSystem::new().with_process("game.exe", None));
        let policy = SafetyPolicy::default();

        let err = action(&system, None).validate(&policy).await.unwrap_err();
        assert_eq!(err, ValidationError::MissingParameter("priority"));

        let err = action(&system, Some("turbo")).validate(&policy).await.unwrap_err();
        assert!(err.to_string().contains("Unknown priority"));

        action(&system, Some("above_normal"))
            .validate(&policy)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_applies_to_each_instance() {
        let system = Arc::new(
            ScriptedSystem::new()
                .with_process("game.exe", None)
                .with_process("game.exe", None),
        );
        let ctx = ExecutionContext::new(Uuid::new_v4(), Duration::from_secs(5), Duration::ZERO);
        let result = action(&system, Some("high")).execute(&ctx).await;

        assert!(result.success, "{:?}", result);
        assert_eq!(result.data.unwrap()["priority"], "high");
        let calls = system.calls();
        assert_eq!(calls.len(), 2);
        assert!(calls
            .iter()
            .all(|c| matches!(c, SystemCall::SetPriority(_, Priority::High))));
    }
}
