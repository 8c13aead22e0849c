//! Named bundles of action steps, persisted as TOML files.
//!
//! A profile is applied by dispatching each step through the executor in
//! order, so every step is validated, gated and logged like a direct call.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use crate::error::ProfileError;
use crate::executor::Executor;
use crate::types::{ActionKind, ActionResult, Parameters};

/// Target used by steps that act on the whole host.
pub const HOST_TARGET: &str = "host";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Informational only; nothing fires profiles automatically.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<String>,
    #[serde(default)]
    pub rollback_on_exit: bool,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub actions: Vec<ProfileStep>,
}

fn default_enabled() -> bool {
    true
}

/// One action inside a profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileStep {
    pub kind: ActionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Parameters::is_empty")]
    pub parameters: Parameters,
}

impl ProfileStep {
    pub fn new(kind: ActionKind) -> Self {
        Self {
            kind,
            target: None,
            description: None,
            parameters: Parameters::new(),
        }
    }

    pub fn target(mut self, target: &str) -> Self {
        self.target = Some(target.to_string());
        self
    }

    pub fn describe(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    pub fn param(mut self, name: &str, value: serde_json::Value) -> Self {
        self.parameters.insert(name.to_string(), value);
        self
    }

    /// The step's target, or the host for system-wide actions.
    pub fn effective_target(&self) -> &str {
        self.target
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or(HOST_TARGET)
    }
}

/// Loads, caches and stores profiles under one directory.
pub struct ProfileManager {
    dir: PathBuf,
    cache: HashMap<String, Profile>,
    active: Option<String>,
}

impl ProfileManager {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            cache: HashMap::new(),
            active: None,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.toml", name))
    }

    /// Read `<dir>/<name>.toml`, replacing any cached copy.
    pub fn load(&mut self, name: &str) -> Result<Profile, ProfileError> {
        validate_name(name)?;
        let path = self.path_for(name);
        if !path.exists() {
            return Err(ProfileError::NotFound(name.to_string()));
        }
        let content = std::fs::read_to_string(&path)?;
        let profile: Profile = toml::from_str(&content)?;
        if profile.name != name {
            warn!(
                file = %path.display(),
                declared = %profile.name,
                "Profile name does not match file name"
            );
        }
        info!(profile = name, steps = profile.actions.len(), "Loaded profile");
        self.cache.insert(name.to_string(), profile.clone());
        Ok(profile)
    }

    pub fn save(&mut self, profile: &Profile) -> Result<PathBuf, ProfileError> {
        validate_name(&profile.name)?;
        std::fs::create_dir_all(&self.dir)?;
        let path = self.path_for(&profile.name);
        std::fs::write(&path, toml::to_string_pretty(profile)?)?;
        info!(profile = %profile.name, path = %path.display(), "Saved profile");
        self.cache.insert(profile.name.clone(), profile.clone());
        Ok(path)
    }

    /// Cached copy if present, otherwise read from disk.
    pub fn get(&mut self, name: &str) -> Result<Profile, ProfileError> {
        if let Some(profile) = self.cache.get(name) {
            return Ok(profile.clone());
        }
        self.load(name)
    }

    /// Sorted names of cached and on-disk profiles.
    pub fn list(&self) -> Result<Vec<String>, ProfileError> {
        let mut names: Vec<String> = self.cache.keys().cloned().collect();
        if self.dir.exists() {
            for entry in std::fs::read_dir(&self.dir)? {
                let path = entry?.path();
                if path.extension().and_then(|e| e.to_str()) != Some("toml") {
                    continue;
                }
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    names.push(stem.to_string());
                }
            }
        }
        names.sort();
        names.dedup();
        Ok(names)
    }

    pub fn activate(&mut self, name: &str) -> Result<Profile, ProfileError> {
        let profile = self.get(name)?;
        if !profile.enabled {
            return Err(ProfileError::Disabled(name.to_string()));
        }
        info!(profile = name, "Activated profile");
        self.active = Some(name.to_string());
        Ok(profile)
    }

    pub fn deactivate(&mut self) -> Option<String> {
        let previous = self.active.take();
        if let Some(name) = &previous {
            info!(profile = %name, "Deactivated profile");
        }
        previous
    }

    pub fn active(&self) -> Option<&Profile> {
        self.active.as_ref().and_then(|name| self.cache.get(name))
    }

    /// Write the built-in profiles that do not exist yet. Returns the
    /// names written.
    pub fn create_defaults(&mut self) -> Result<Vec<String>, ProfileError> {
        let mut created = Vec::new();
        for profile in default_profiles() {
            if self.path_for(&profile.name).exists() {
                continue;
            }
            self.save(&profile)?;
            created.push(profile.name);
        }
        Ok(created)
    }
}

fn validate_name(name: &str) -> Result<(), ProfileError> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(ProfileError::InvalidName(name.to_string()))
    }
}

/// The gaming, work and power_saver profiles.
pub fn default_profiles() -> Vec<Profile> {
    vec![
        Profile {
            name: "gaming".to_string(),
            description: "Optimize system for gaming performance".to_string(),
            trigger: Some("game_detected".to_string()),
            schedule: None,
            rollback_on_exit: true,
            enabled: true,
            actions: vec![
                ProfileStep::new(ActionKind::CloseProcess)
                    .target("Discord.exe")
                    .describe("Close Discord to free resources"),
                ProfileStep::new(ActionKind::CloseProcess)
                    .target("Spotify.exe")
                    .describe("Close Spotify to free resources"),
                ProfileStep::new(ActionKind::CloseProcess)
                    .target("chrome.exe")
                    .describe("Close Chrome to free RAM"),
                ProfileStep::new(ActionKind::PowerPlan)
                    .param("mode", json!("performance"))
                    .describe("Switch to performance power plan"),
                ProfileStep::new(ActionKind::ClearRam).describe("Clear RAM cache"),
            ],
        },
        Profile {
            name: "work".to_string(),
            description: "Optimize system for work productivity".to_string(),
            trigger: Some("work_hours".to_string()),
            schedule: Some("weekdays 9:00-17:00".to_string()),
            rollback_on_exit: false,
            enabled: true,
            actions: vec![
                ProfileStep::new(ActionKind::CloseProcess)
                    .target("Steam.exe")
                    .describe("Close Steam during work hours"),
                ProfileStep::new(ActionKind::CloseProcess)
                    .target("EpicGamesLauncher.exe")
                    .describe("Close Epic Games Launcher"),
                ProfileStep::new(ActionKind::PowerPlan)
                    .param("mode", json!("balanced"))
                    .describe("Switch to balanced power plan"),
            ],
        },
        Profile {
            name: "power_saver".to_string(),
            description: "Conserve battery power".to_string(),
            trigger: Some("battery_low".to_string()),
            schedule: None,
            rollback_on_exit: true,
            enabled: true,
            actions: vec![
                ProfileStep::new(ActionKind::PowerPlan)
                    .param("mode", json!("power_saver"))
                    .describe("Switch to power saver mode"),
                ProfileStep::new(ActionKind::DisplayBrightness)
                    .param("level", json!(50))
                    .describe("Reduce brightness to 50%"),
                ProfileStep::new(ActionKind::CloseProcess)
                    .target("chrome.exe")
                    .describe("Close Chrome to save power"),
                ProfileStep::new(ActionKind::CloseProcess)
                    .target("Discord.exe")
                    .describe("Close Discord to save power"),
            ],
        },
    ]
}

// =============================================================================
// Application
// =============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct StepOutcome {
    pub kind: ActionKind,
    pub target: String,
    pub result: ActionResult,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProfileReport {
    pub profile: String,
    pub steps: Vec<StepOutcome>,
}

impl ProfileReport {
    pub fn succeeded(&self) -> usize {
        self.steps.iter().filter(|s| s.result.success).count()
    }

    pub fn failed(&self) -> usize {
        self.steps.len() - self.succeeded()
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed() == 0
    }
}

/// Dispatch every step of `profile` in order. A failed step does not stop
/// the ones after it.
pub async fn apply_profile(
    executor: &Executor,
    profile: &Profile,
    user_approved: bool,
) -> Result<ProfileReport, ProfileError> {
    if !profile.enabled {
        return Err(ProfileError::Disabled(profile.name.clone()));
    }

    info!(profile = %profile.name, steps = profile.actions.len(), "Applying profile");
    let mut steps = Vec::with_capacity(profile.actions.len());
    for (index, step) in profile.actions.iter().enumerate() {
        let target = step.effective_target().to_string();
        let result = executor
            .execute(step.kind, &target, step.parameters.clone(), user_approved)
            .await;
        if !result.success {
            warn!(
                profile = %profile.name,
                step = index,
                kind = %step.kind,
                message = %result.message,
                "Profile step failed"
            );
        }
        steps.push(StepOutcome {
            kind: step.kind,
            target,
            result,
        });
    }

    let report = ProfileReport {
        profile: profile.name.clone(),
        steps,
    };
    info!(
        profile = %report.profile,
        succeeded = report.succeeded(),
        failed = report.failed(),
        "Profile applied"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    // ---- Serialization ----

    #[test]
    fn test_profile_toml_roundtrip() {
        for profile in default_profiles() {
            let text = toml::to_string_pretty(&profile).unwrap();
            let parsed: Profile = toml::from_str(&text).unwrap();
            assert_eq!(parsed.name, profile.name);
            assert_eq!(parsed.actions.len(), profile.actions.len());
        }
    }

    #[test]
    fn test_profile_parse_minimal() {
        let profile: Profile = toml::from_str(
            r#"
name = "quiet"

[[actions]]
kind = "display_brightness"

[actions.parameters]
level = 20
"#,
        )
        .unwrap();
        assert!(profile.enabled);
        assert!(!profile.rollback_on_exit);
        assert_eq!(profile.actions[0].kind, ActionKind::DisplayBrightness);
        assert_eq!(profile.actions[0].effective_target(), HOST_TARGET);
        assert_eq!(profile.actions[0].parameters["level"], 20);
    }

    #[test]
    fn test_profile_parse_unknown_kind() {
        let result: Result<Profile, _> = toml::from_str(
            r#"
name = "bad"

[[actions]]
kind = "format_disk"
"#,
        );
        assert!(result.is_err());
    }

    // ---- Manager ----

    #[test]
    fn test_create_defaults_and_list() {
        let dir = TempDir::new().unwrap();
        let mut manager = ProfileManager::new(dir.path().join("profiles"));

        let created = manager.create_defaults().unwrap();
        assert_eq!(created, vec!["gaming", "work", "power_saver"]);
        assert_eq!(
            manager.list().unwrap(),
            vec!["gaming", "power_saver", "work"]
        );

        // Existing files are left alone.
        assert!(manager.create_defaults().unwrap().is_empty());
    }

    #[test]
    fn test_load_from_disk() {
        let dir = TempDir::new().unwrap();
        ProfileManager::new(dir.path()).create_defaults().unwrap();

        let mut fresh = ProfileManager::new(dir.path());
        let gaming = fresh.get("gaming").unwrap();
        assert_eq!(gaming.actions.len(), 5);
        assert_eq!(gaming.actions[3].parameters["mode"], "performance");
        assert_eq!(gaming.trigger.as_deref(), Some("game_detected"));
    }

    #[test]
    fn test_missing_and_invalid_names() {
        let dir = TempDir::new().unwrap();
        let mut manager = ProfileManager::new(dir.path());
        assert!(matches!(
            manager.get("nope"),
            Err(ProfileError::NotFound(_))
        ));
        assert!(matches!(
            manager.get("../etc/passwd"),
            Err(ProfileError::InvalidName(_))
        ));
    }

    #[test]
    fn test_activate_and_deactivate() {
        let dir = TempDir::new().unwrap();
        let mut manager = ProfileManager::new(dir.path());
        manager.create_defaults().unwrap();

        manager.activate("work").unwrap();
        assert_eq!(manager.active().unwrap().name, "work");
        assert_eq!(manager.deactivate().as_deref(), Some("work"));
        assert!(manager.active().is_none());
        assert!(manager.deactivate().is_none());
    }

    #[test]
    fn test_activate_disabled() {
        let dir = TempDir::new().unwrap();
        let mut manager = ProfileManager::new(dir.path());
        let mut profile = default_profiles().remove(0);
        profile.enabled = false;
        manager.save(&profile).unwrap();

        assert!(matches!(
            manager.activate("gaming"),
            Err(ProfileError::Disabled(_))
        ));
        assert!(manager.active().is_none());
    }

    #[test]
    fn test_effective_target() {
        assert_eq!(ProfileStep::new(ActionKind::Sleep).effective_target(), "host");
        assert_eq!(
            ProfileStep::new(ActionKind::Sleep).target("  ").effective_target(),
            "host"
        );
        assert_eq!(
            ProfileStep::new(ActionKind::CloseProcess)
                .target("chrome.exe")
                .effective_target(),
            "chrome.exe"
        );
    }
}
