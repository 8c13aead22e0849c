//! Set display brightness.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use super::{platform_failure, Action, ExecutionContext};
use crate::error::ValidationError;
use crate::params::get_u64;
use crate::platform::SystemControl;
use crate::policy::SafetyPolicy;
use crate::snapshot::Snapshot;
use crate::types::{ActionKind, ActionResult, ErrorCode, Parameters, RiskLevel};

pub struct DisplayBrightness {
    target: String,
    parameters: Parameters,
    system: Arc<dyn SystemControl>,
}

impl DisplayBrightness {
    pub fn new(target: String, parameters: Parameters, system: Arc<dyn SystemControl>) -> Self {
        Self {
            target,
            parameters,
            system,
        }
    }

    fn level(&self) -> Result<u8, ValidationError> {
        let level = get_u64(&self.parameters, "level")?
            .ok_or(ValidationError::MissingParameter("level"))?;
        u8::try_from(level)
            .ok()
            .filter(|l| *l <= 100)
            .ok_or_else(|| ValidationError::InvalidParameter {
                name: "level",
                reason: "must be between 0 and 100".to_string(),
            })
    }
}

#[async_trait]
impl Action for DisplayBrightness {
    fn kind(&self) -> ActionKind {
        ActionKind::DisplayBrightness
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
        let level = self.level().unwrap_or(50);
        Some(format!("Set brightness to {}%", level))
    }

    async fn validate(&self, policy: &SafetyPolicy) -> Result<(), ValidationError> {
        policy.check_target(&self.target)?;
        self.level()?;
        Ok(())
    }

    async fn execute(&self, ctx: &ExecutionContext) -> ActionResult {
        let level = match self.level() {
            Ok(level) => level,
            Err(e) => return ActionResult::failure(e.to_string(), ErrorCode::ValidationFailed),
        };
        match ctx.bounded(self.system.set_brightness(level)).await {
            Ok(()) => ActionResult::ok(format!("Set brightness to {}%", level))
                .with_data(json!({"level": level})),
            Err(result) => result,
        }
    }

    async fn rollback(&self, snapshot: &Snapshot) -> ActionResult {
        let Some(previous) = snapshot.brightness() else {
            return ActionResult::failure("Cannot restore brightness", ErrorCode::NoSnapshotData);
        };
        match self.system.set_brightness(previous).await {
            Ok(()) => ActionResult::ok(format!("Restored brightness to {}%", previous))
                .with_data(json!({"level": previous})),
            Err(e) => platform_failure(&e),
        }
    }
}
