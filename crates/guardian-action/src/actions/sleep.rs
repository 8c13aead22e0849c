//! Suspend the host to RAM.

use std::sync::Arc;

use async_trait::async_trait;

use super::{Action, ExecutionContext};
use crate::error::ValidationError;
use crate::platform::SystemControl;
use crate::policy::SafetyPolicy;
use crate::types::{ActionKind, ActionResult, Parameters, RiskLevel};

pub struct Sleep {
    target: String,
    parameters: Parameters,
    system: Arc<dyn SystemControl>,
}

impl Sleep {
    pub fn new(target: String, parameters: Parameters, system: Arc<dyn SystemControl>) -> Self {
        Self {
            target,
            parameters,
            system,
        }
    }
}

#[async_trait]
impl Action for Sleep {
    fn kind(&self) -> ActionKind {
        ActionKind::Sleep
    }

    fn target(&self) -> &str {
        &self.target
    }

    fn parameters(&self) -> &Parameters {
        &self.parameters
    }

    fn risk_level(&self, _policy: &SafetyPolicy) -> RiskLevel {
        RiskLevel::Medium
    }

    fn can_rollback(&self) -> bool {
        false
    }

    fn estimated_impact(&self) -> Option<String> {
        Some("Put system to sleep (cannot be undone, interrupts running work)".to_string())
    }

    async fn validate(&self, policy: &SafetyPolicy) -> Result<(), ValidationError> {
        policy.check_target(&self.target)?;
        Ok(())
    }

    async fn execute(&self, ctx: &ExecutionContext) -> ActionResult {
        match ctx.bounded(self.system.suspend()).await {
            Ok(()) => ActionResult::ok("System going to sleep"),
            Err(result) => result,
        }
    }
}
