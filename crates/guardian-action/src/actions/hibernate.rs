//! Hibernate the host.

use std::sync::Arc;

use async_trait::async_trait;

use super::{Action, ExecutionContext};
use crate::error::ValidationError;
use crate::platform::SystemControl;
use crate::policy::SafetyPolicy;
use crate::types::{ActionKind, ActionResult, Parameters, RiskLevel};

pub struct Hibernate {
    target: String,
    parameters: Parameters,
    system: Arc<dyn SystemControl>,
}

impl Hibernate {
    pub fn new(target: String, parameters: Parameters, system: Arc<dyn SystemControl>) -> Self {
        Self {
            target,
            parameters,
            system,
        }
    }
}

#[async_trait]
impl Action for Hibernate {
    fn kind(&self) -> ActionKind {
        ActionKind::Hibernate
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
        Some("Hibernate system, saving state to disk (cannot be undone)".to_string())
    }

    async fn validate(&self, policy: &SafetyPolicy) -> Result<(), ValidationError> {
        policy.check_target(&self.target)?;
        Ok(())
    }

    async fn execute(&self, ctx: &ExecutionContext) -> ActionResult {
        match ctx.bounded(self.system.hibernate()).await {
            Ok(()) => ActionResult::ok("System hibernating"),
            Err(result) => result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{Operation, ScriptedSystem, SystemCall};
    use crate::types::ErrorCode;
    use std::time::Duration;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_hibernate() {
        let system = Arc::new(ScriptedSystem::new());
        let action = Hibernate::new("host".to_string(), Parameters::new(), system.clone());
        let ctx = ExecutionContext::new(Uuid::new_v4(), Duration::from_secs(5), Duration::ZERO);

        assert!(!action.can_rollback());
        assert!(action.execute(&ctx).await.success);
        assert_eq!(system.calls(), vec![SystemCall::Hibernate]);
    }

    #[tokio::test]
    async fn test_hibernate_stalls_past_deadline() {
        let system = Arc::new(ScriptedSystem::new());
        system.delay(Operation::Hibernate, Duration::from_secs(5));
        let action = Hibernate::new("host".to_string(), Parameters::new(), system.clone());
        let ctx = ExecutionContext::new(Uuid::new_v4(), Duration::from_millis(50), Duration::ZERO);

        let result = action.execute(&ctx).await;
        assert!(result.has_error(ErrorCode::DeadlineExceeded));
    }
}
