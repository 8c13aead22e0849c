//! Launch a program by path.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use super::{Action, ExecutionContext};
use crate::error::ValidationError;
use crate::platform::{SpawnOutcome, SystemControl};
use crate::policy::SafetyPolicy;
use crate::types::{ActionKind, ActionResult, ErrorCode, Parameters, RiskLevel};

pub struct StartProcess {
    target: String,
    parameters: Parameters,
    system: Arc<dyn SystemControl>,
}

impl StartProcess {
    pub fn new(target: String, parameters: Parameters, system: Arc<dyn SystemControl>) -> Self {
        Self {
            target,
            parameters,
            system,
        }
    }

    fn program(&self) -> &Path {
        Path::new(self.target.trim())
    }
}

#[async_trait]
impl Action for StartProcess {
    fn kind(&self) -> ActionKind {
        ActionKind::StartProcess
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

    fn estimated_impact(&self) -> Option<String> {
        Some(format!("Start {}", self.target))
    }

    async fn validate(&self, policy: &SafetyPolicy) -> Result<(), ValidationError> {
        if self.target.trim().is_empty() {
            return Err(ValidationError::InvalidParameter {
                name: "target",
                reason: "program path must not be empty".to_string(),
            });
        }
        policy.check_target(&self.target)?;
        if let Some(name) = self.program().file_name() {
            policy.check_target(&name.to_string_lossy())?;
        }
        if !self.system.path_exists(self.program()) {
            return Err(ValidationError::TargetNotFound(self.target.clone()));
        }
        Ok(())
    }

    async fn execute(&self, ctx: &ExecutionContext) -> ActionResult {
        match ctx.bounded(self.system.spawn(self.program())).await {
            Ok(SpawnOutcome::Running { pid }) => {
                ActionResult::ok(format!("Started {}", self.target)).with_data(json!({"pid": pid}))
            }
            Ok(SpawnOutcome::Exited { code }) => {
                ActionResult::failure("Process exited immediately", ErrorCode::ProcessExited)
                    .with_data(json!({"exit_code": code}))
            }
            Err(result) => result,
        }
    }
}
