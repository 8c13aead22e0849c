//! Risk and approval policy.
//!
//! A single `SafetyPolicy` is built from configuration and passed
//! explicitly to every action's risk and validation methods and to the
//! executor's central gate, so both see the same protected list.

use guardian_core::config::SafetyConfig;
use guardian_core::error::GuardianError;

use crate::error::ValidationError;
use crate::types::{AutomationLevel, RiskLevel};

/// Approval and protection rules in effect for an executor.
#[derive(Debug, Clone)]
pub struct SafetyPolicy {
    automation_level: AutomationLevel,
    approval_threshold: RiskLevel,
    protected_targets: Vec<String>,
}

impl SafetyPolicy {
    pub fn new(
        automation_level: AutomationLevel,
        approval_threshold: RiskLevel,
        protected_targets: Vec<String>,
    ) -> Self {
        let protected_targets = protected_targets
            .into_iter()
            .map(|t| t.trim().to_lowercase())
            .filter(|t| !t.is_empty())
            .collect();
        Self {
            automation_level,
            approval_threshold,
            protected_targets,
        }
    }

    /// Build from the `[safety]` config section.
    pub fn from_config(config: &SafetyConfig) -> Result<Self, GuardianError> {
        let automation_level = config
            .automation_level
            .parse::<AutomationLevel>()
            .map_err(GuardianError::Config)?;
        let approval_threshold = config
            .approval_risk_threshold
            .parse::<RiskLevel>()
            .map_err(GuardianError::Config)?;
        Ok(Self::new(
            automation_level,
            approval_threshold,
            config.protected_targets.clone(),
        ))
    }

    pub fn automation_level(&self) -> AutomationLevel {
        self.automation_level
    }

    pub fn approval_threshold(&self) -> RiskLevel {
        self.approval_threshold
    }

    pub fn protected_targets(&self) -> &[String] {
        &self.protected_targets
    }

    /// Case-insensitive match against the protected list.
    pub fn is_protected(&self, target: &str) -> bool {
        let target = target.trim().to_lowercase();
        self.protected_targets.iter().any(|p| *p == target)
    }

    /// Hard veto on protected targets, independent of risk.
    pub fn check_target(&self, target: &str) -> Result<(), ValidationError> {
        if self.is_protected(target) {
            Err(ValidationError::Protected(target.to_string()))
        } else {
            Ok(())
        }
    }

    /// Pure function of `(risk, automation level)`:
    /// - manual: always
    /// - semi_auto: risk at or above the approval threshold (medium by default)
    /// - fully_auto: high risk only
    pub fn requires_approval(&self, risk: RiskLevel) -> bool {
        match self.automation_level {
            AutomationLevel::Manual => true,
            AutomationLevel::SemiAuto => risk >= self.approval_threshold,
            AutomationLevel::FullyAuto => risk == RiskLevel::High,
        }
    }
}

impl Default for SafetyPolicy {
    fn default() -> Self {
        Self::new(
            AutomationLevel::SemiAuto,
            RiskLevel::Medium,
            SafetyConfig::default().protected_targets,
        )
    }
}
