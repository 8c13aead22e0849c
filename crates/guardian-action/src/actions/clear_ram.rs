//! Release reclaimable memory caches.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use super::{Action, ExecutionContext};
use crate::error::ValidationError;
use crate::platform::SystemControl;
use crate::policy::SafetyPolicy;
use crate::types::{ActionKind, ActionResult, Parameters, RiskLevel};

const MIB: f64 = 1024.0 * 1024.0;

pub struct ClearRam {
    target: String,
    parameters: Parameters,
    system: Arc<dyn SystemControl>,
}

impl ClearRam {
    pub fn new(target: String, parameters: Parameters, system: Arc<dyn SystemControl>) -> Self {
        Self {
            target,
            parameters,
            system,
        }
    }
}

fn percent(used: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        (used as f64 / total as f64 * 1000.0).round() / 10.0
    }
}

#[async_trait]
impl Action for ClearRam {
    fn kind(&self) -> ActionKind {
        ActionKind::ClearRam
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
        Some("Free unused RAM (may cause brief slowdown)".to_string())
    }

    async fn validate(&self, policy: &SafetyPolicy) -> Result<(), ValidationError> {
        policy.check_target(&self.target)?;
        Ok(())
    }

    async fn execute(&self, ctx: &ExecutionContext) -> ActionResult {
        let report = match ctx.bounded(self.system.trim_memory()).await {
            Ok(report) => report,
            Err(result) => return result,
        };
        let freed_mb = report.used_before.saturating_sub(report.used_after) as f64 / MIB;
        ActionResult::ok(format!("Freed approximately {:.1} MB of RAM", freed_mb)).with_data(json!({
            "freed_mb": (freed_mb * 10.0).round() / 10.0,
            "before_percent": percent(report.used_before, report.total),
            "after_percent": percent(report.used_after, report.total),
        }))
    }
}
