//! Switch the active power plan.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::info;

use super::{platform_failure, Action, ExecutionContext};
use crate::error::{PlatformError, ValidationError};
use crate::params::get_str;
use crate::platform::{PowerPlan, SystemControl};
use crate::policy::SafetyPolicy;
use crate::snapshot::Snapshot;
use crate::types::{ActionKind, ActionResult, ErrorCode, Parameters, RiskLevel};

/// The plan comes from the `mode` parameter, falling back to the target
/// (`guardian execute power_plan performance`).
pub struct SetPowerPlan {
    target: String,
    parameters: Parameters,
    system: Arc<dyn SystemControl>,
}

impl SetPowerPlan {
    pub fn new(target: String, parameters: Parameters, system: Arc<dyn SystemControl>) -> Self {
        Self {
            target,
            parameters,
            system,
        }
    }

    fn mode(&self) -> Result<PowerPlan, ValidationError> {
        let raw = get_str(&self.parameters, "mode")
            .or_else(|| {
                let target = self.target.trim();
                target.parse::<PowerPlan>().ok().map(|_| target.to_string())
            })
            .ok_or(ValidationError::MissingParameter("mode"))?;
        raw.parse()
            .map_err(|reason| ValidationError::InvalidParameter { name: "mode", reason })
    }

    async fn switch(&self, plan: PowerPlan) -> Result<(), PlatformError> {
        self.system.set_power_plan(plan).await?;
        info!(plan = %plan, "Switched power plan");
        Ok(())
    }
}

fn switched(plan: PowerPlan) -> ActionResult {
    ActionResult::ok(format!("Switched to {} power plan", plan)).with_data(json!({
        "mode": plan.to_string(),
        "guid": plan.windows_guid(),
    }))
}

#[async_trait]
impl Action for SetPowerPlan {
    fn kind(&self) -> ActionKind {
        ActionKind::PowerPlan
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
        let mode = self
            .mode()
            .map(|p| p.to_string())
            .unwrap_or_else(|_| "balanced".to_string());
        Some(format!("Switch to {} power plan", mode))
    }

    async fn validate(&self, policy: &SafetyPolicy) -> Result<(), ValidationError> {
        policy.check_target(&self.target)?;
        if !self.system.supports_power_plans() {
            return Err(ValidationError::Unsupported(
                "Power plan switching is not supported on this platform".to_string(),
            ));
        }
        self.mode()?;
        Ok(())
    }

    async fn execute(&self, ctx: &ExecutionContext) -> ActionResult {
        let plan = match self.mode() {
            Ok(plan) => plan,
            Err(e) => return ActionResult::failure(e.to_string(), ErrorCode::ValidationFailed),
        };
        match ctx.bounded(self.switch(plan)).await {
            Ok(()) => switched(plan),
            Err(result) => result,
        }
    }

    async fn rollback(&self, snapshot: &Snapshot) -> ActionResult {
        let Some(previous) = snapshot.power_plan() else {
            return ActionResult::failure("Cannot restore power plan", ErrorCode::NoSnapshotData);
        };
        match self.switch(previous).await {
            Ok(()) => switched(previous),
            Err(e) => platform_failure(&e),
        }
    }
}
