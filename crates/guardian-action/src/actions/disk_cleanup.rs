//! Sweep the temp directory.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use super::{platform_failure, Action, ExecutionContext};
use crate::error::ValidationError;
use crate::platform::SystemControl;
use crate::policy::SafetyPolicy;
use crate::types::{ActionKind, ActionResult, ErrorCode, Parameters, RiskLevel};

pub struct DiskCleanup {
    target: String,
    parameters: Parameters,
    system: Arc<dyn SystemControl>,
}

impl DiskCleanup {
    pub fn new(target: String, parameters: Parameters, system: Arc<dyn SystemControl>) -> Self {
        Self {
            target,
            parameters,
            system,
        }
    }
}

#[async_trait]
impl Action for DiskCleanup {
    fn kind(&self) -> ActionKind {
        ActionKind::DiskCleanup
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
        Some("Clean temporary files and caches".to_string())
    }

    async fn validate(&self, policy: &SafetyPolicy) -> Result<(), ValidationError> {
        policy.check_target(&self.target)?;
        Ok(())
    }

    async fn execute(&self, ctx: &ExecutionContext) -> ActionResult {
        // The sweep stops itself at the deadline and reports what it removed.
        let report = match self.system.cleanup_temp(ctx.deadline().into_std()).await {
            Ok(report) => report,
            Err(e) => return platform_failure(&e),
        };
        let freed_mb = report.bytes_freed as f64 / (1024.0 * 1024.0);
        let data = json!({
            "cleaned_files": report.items_removed,
            "freed_mb": (freed_mb * 10.0).round() / 10.0,
            "skipped": report.items_skipped,
        });
        let message = format!(
            "Cleaned {} items, freed {:.1} MB",
            report.items_removed, freed_mb
        );

        if report.deadline_hit {
            ActionResult::failure(
                format!("{} before the deadline", message),
                ErrorCode::DeadlineExceeded,
            )
            .with_data(data)
        } else {
            ActionResult::ok(message).with_data(data)
        }
    }
}
