//! Pin every process named `target` to a set of CPU cores.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use super::process::{for_each_pid, process_risk, require_running};
use super::{Action, ExecutionContext};
use crate::error::ValidationError;
use crate::params::get_index_list;
use crate::platform::SystemControl;
use crate::policy::SafetyPolicy;
use crate::types::{ActionKind, ActionResult, ErrorCode, Parameters, RiskLevel};

pub struct SetCpuAffinity {
    target: String,
    parameters: Parameters,
    system: Arc<dyn SystemControl>,
}

impl SetCpuAffinity {
    pub fn new(target: String, parameters: Parameters, system: Arc<dyn SystemControl>) -> Self {
        Self {
            target,
            parameters,
            system,
        }
    }

    /// The requested cores, checked against the host's core count.
    fn cpus(&self) -> Result<Vec<usize>, ValidationError> {
        let mut cpus = get_index_list(&self.parameters, "cpus")?
            .filter(|cpus| !cpus.is_empty())
            .ok_or(ValidationError::MissingParameter("cpus"))?;
        let count = self.system.cpu_count();
        if let Some(bad) = cpus.iter().find(|&&cpu| cpu >= count) {
            return Err(ValidationError::InvalidParameter {
                name: "cpus",
                reason: format!(
                    "invalid CPU core {}, valid cores are 0-{}",
                    bad,
                    count.saturating_sub(1)
                ),
            });
        }
        cpus.sort_unstable();
        cpus.dedup();
        Ok(cpus)
    }
}

#[async_trait]
impl Action for SetCpuAffinity {
    fn kind(&self) -> ActionKind {
        ActionKind::SetCpuAffinity
    }

    fn target(&self) -> &str {
        &self.target
    }

    fn parameters(&self) -> &Parameters {
        &self.parameters
    }

    fn risk_level(&self, policy: &SafetyPolicy) -> RiskLevel {
        process_risk(policy, &self.target, RiskLevel::Medium)
    }

    fn estimated_impact(&self) -> Option<String> {
        let cpus = self
            .parameters
            .get("cpus")
            .map(|v| v.to_string())
            .unwrap_or_else(|| "[]".to_string());
        Some(format!("Limit {} to CPU cores: {}", self.target, cpus))
    }

    async fn validate(&self, policy: &SafetyPolicy) -> Result<(), ValidationError> {
        self.cpus()?;
        require_running(self.system.as_ref(), policy, &self.target).await?;
        Ok(())
    }

    async fn execute(&self, ctx: &ExecutionContext) -> ActionResult {
        let cpus = match self.cpus() {
            Ok(cpus) => cpus,
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
        let cpus_ref = &cpus;
        let outcome = for_each_pid(ctx, &pids, |pid| async move {
            system.set_affinity(pid, cpus_ref).await
        })
        .await;

        let mut extra = serde_json::Map::new();
        extra.insert("cpus".into(), json!(cpus));
        outcome.into_result("Updated CPU affinity for", &self.target, extra)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{ScriptedSystem, SystemCall};
    use std::time::Duration;
    use uuid::Uuid;

    fn action(system: &Arc<ScriptedSystem>, cpus: serde_json::Value) -> SetCpuAffinity {
        let mut params = Parameters::new();
        params.insert("cpus".into(), cpus);
        SetCpuAffinity::new("render.exe".to_string(), params, system.clone())
    }

    #[tokio::test]
    async fn test_out_of_range_core_names_valid_range() {
        let system = Arc::new(
            ScriptedSystem::new()
                .with_cpu_count(4)
                .with_process("render.exe", None),
        );
        let err = action(&system, json!([0, 7]))
            .validate(&SafetyPolicy::default())
            .await
            .unwrap_err();

        assert!(err.to_string().contains("0-3"), "{}", err);
        assert_eq!(system.call_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_or_empty_cpus() {
        let system = Arc::new(ScriptedSystem::new().with_process("render.exe", None));
        let policy = SafetyPolicy::default();

        let err = action(&system, json!([])).validate(&policy).await.unwrap_err();
        assert_eq!(err, ValidationError::MissingParameter("cpus"));

        let none = SetCpuAffinity::new("render.exe".to_string(), Parameters::new(), system.clone());
        assert_eq!(
            none.validate(&policy).await.unwrap_err(),
            ValidationError::MissingParameter("cpus")
        );
    }

    #[tokio::test]
    async fn test_sets_affinity_from_csv() {
        let system = Arc::new(
            ScriptedSystem::new()
                .with_cpu_count(8)
                .with_process("render.exe", None),
        );
        let ctx = ExecutionContext::new(Uuid::new_v4(), Duration::from_secs(5), Duration::ZERO);
        let result = action(&system, json!("3,1,1")).execute(&ctx).await;

        assert!(result.success, "{:?}", result);
        let pid = system.pids_named("render.exe")[0];
        assert_eq!(system.calls(), vec![SystemCall::SetAffinity(pid, vec![1, 3])]);
    }

    #[test]
    fn test_baseline_risk_medium() {
        let system = Arc::new(ScriptedSystem::new());
        assert_eq!(
            action(&system, json!([0])).risk_level(&SafetyPolicy::default()),
            RiskLevel::Medium
        );
    }
}
