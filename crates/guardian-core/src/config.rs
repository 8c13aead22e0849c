use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer, Serialize};
use tracing::{info, warn};

use crate::error::{GuardianError, Result};

/// Automation levels accepted in `[safety].automation_level`.
pub const AUTOMATION_LEVELS: [&str; 3] = ["manual", "semi_auto", "fully_auto"];

/// Risk levels accepted in `[safety].approval_risk_threshold`.
pub const RISK_LEVELS: [&str; 3] = ["low", "medium", "high"];

/// Top-level configuration for Guardian.
///
/// Loaded from `~/.guardian/config.toml` by default. Every section falls
/// back to its defaults when absent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GuardianConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub safety: SafetyConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub profiles: ProfilesConfig,
}

impl GuardianConfig {
    /// Load configuration from a TOML file.
    ///
    /// Returns an error if the file cannot be read, parsed, or fails validation.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: GuardianConfig = toml::from_str(&content)?;
        config.validate()?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the
    /// file does not exist or cannot be parsed.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| GuardianError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }

    /// Apply `GUARDIAN_*` environment overrides on top of the file values.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(level) = std::env::var("GUARDIAN_AUTOMATION_LEVEL") {
            self.safety.automation_level = level.trim().to_lowercase();
        }
        if let Ok(targets) = std::env::var("GUARDIAN_PROTECTED_TARGETS") {
            self.safety.protected_targets = parse_target_list(&targets);
        }
    }

    /// Reject values the engine cannot interpret.
    pub fn validate(&self) -> Result<()> {
        if !AUTOMATION_LEVELS.contains(&self.safety.automation_level.as_str()) {
            return Err(GuardianError::Config(format!(
                "automation_level must be one of {:?}, got '{}'",
                AUTOMATION_LEVELS, self.safety.automation_level
            )));
        }
        if !RISK_LEVELS.contains(&self.safety.approval_risk_threshold.as_str()) {
            return Err(GuardianError::Config(format!(
                "approval_risk_threshold must be one of {:?}, got '{}'",
                RISK_LEVELS, self.safety.approval_risk_threshold
            )));
        }
        if self.execution.max_concurrent_actions == 0 {
            return Err(GuardianError::Config(
                "max_concurrent_actions must be at least 1".to_string(),
            ));
        }
        if self.execution.action_timeout_seconds == 0 {
            return Err(GuardianError::Config(
                "action_timeout_seconds must be at least 1".to_string(),
            ));
        }
        if self.safety.max_snapshots == 0 {
            return Err(GuardianError::Config(
                "max_snapshots must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Absolute path of the audit log database.
    ///
    /// A relative `action_log_db` is resolved against `general.data_dir`.
    pub fn action_log_path(&self) -> PathBuf {
        let db = PathBuf::from(&self.storage.action_log_db);
        if db.is_absolute() {
            db
        } else {
            expand_home(&self.general.data_dir).join(db)
        }
    }

    /// Directory holding profile definitions.
    pub fn profiles_dir(&self) -> PathBuf {
        expand_home(&self.profiles.dir)
    }
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Data directory for the audit database.
    pub data_dir: String,
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: "~/.guardian/data".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// Approval policy, protection list, and snapshot/rollback toggles.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyConfig {
    /// One of `manual`, `semi_auto`, `fully_auto`.
    pub automation_level: String,
    /// Attempt automatic rollback when an action fails.
    pub enable_rollback: bool,
    /// Capture a system snapshot before each action runs.
    pub snapshot_before_action: bool,
    /// Size of the in-memory rollback history ring.
    pub max_rollback_history: usize,
    /// Lowest risk level that needs approval in `semi_auto` mode.
    pub approval_risk_threshold: String,
    /// Targets that may never be acted on (case-insensitive).
    ///
    /// Accepts a TOML list or a comma-separated string.
    #[serde(deserialize_with = "deserialize_target_list")]
    pub protected_targets: Vec<String>,
    /// Upper bound on snapshots held in memory.
    pub max_snapshots: usize,
    /// Upper bound on process descriptors captured per snapshot.
    pub snapshot_process_limit: usize,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            automation_level: "semi_auto".to_string(),
            enable_rollback: true,
            snapshot_before_action: true,
            max_rollback_history: 10,
            approval_risk_threshold: "medium".to_string(),
            protected_targets: parse_target_list("explorer.exe,System,Registry,csrss.exe"),
            max_snapshots: 64,
            snapshot_process_limit: 512,
        }
    }
}

impl SafetyConfig {
    /// Case-insensitive membership test against `protected_targets`.
    pub fn is_protected(&self, target: &str) -> bool {
        let target = target.trim();
        self.protected_targets
            .iter()
            .any(|p| p.eq_ignore_ascii_case(target))
    }
}

/// Dispatch concurrency and timing limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Global bound on dispatches in flight.
    pub max_concurrent_actions: usize,
    /// Deadline for a single action's execution, and for waiting on a slot.
    pub action_timeout_seconds: u64,
    /// How long a graceful terminate may wait before force-killing.
    pub graceful_terminate_seconds: u64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_concurrent_actions: 3,
            action_timeout_seconds: 30,
            graceful_terminate_seconds: 5,
        }
    }
}

/// Audit log storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite file name (relative to `general.data_dir`) or absolute path.
    pub action_log_db: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            action_log_db: "actions.db".to_string(),
        }
    }
}

/// Automation profile storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfilesConfig {
    /// Directory containing `<name>.toml` profile files.
    pub dir: String,
    /// Profile applied when none is named explicitly.
    pub default_profile: String,
}

impl Default for ProfilesConfig {
    fn default() -> Self {
        Self {
            dir: "~/.guardian/profiles".to_string(),
            default_profile: "work".to_string(),
        }
    }
}

/// Split a comma-separated target list, trimming blanks.
pub fn parse_target_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn deserialize_target_list<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum TargetList {
        Csv(String),
        List(Vec<String>),
    }

    Ok(match TargetList::deserialize(deserializer)? {
        TargetList::Csv(raw) => parse_target_list(&raw),
        TargetList::List(items) => items
            .into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
    })
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~") {
        #[cfg(target_os = "windows")]
        let home = std::env::var("USERPROFILE");
        #[cfg(not(target_os = "windows"))]
        let home = std::env::var("HOME");

        if let Ok(home) = home {
            return PathBuf::from(home).join(rest.trim_start_matches(['/', '\\']));
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_temp_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_default_config() {
        let config = GuardianConfig::default();
        assert_eq!(config.general.log_level, "info");
        assert_eq!(config.safety.automation_level, "semi_auto");
        assert!(config.safety.enable_rollback);
        assert!(config.safety.snapshot_before_action);
        assert_eq!(config.safety.max_rollback_history, 10);
        assert_eq!(config.safety.approval_risk_threshold, "medium");
        assert_eq!(config.execution.max_concurrent_actions, 3);
        assert_eq!(config.execution.action_timeout_seconds, 30);
        assert_eq!(config.storage.action_log_db, "actions.db");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_protected_targets() {
        let safety = SafetyConfig::default();
        assert_eq!(
            safety.protected_targets,
            vec!["explorer.exe", "System", "Registry", "csrss.exe"]
        );
    }

    #[test]
    fn test_is_protected_case_insensitive() {
        let safety = SafetyConfig::default();
        assert!(safety.is_protected("explorer.exe"));
        assert!(safety.is_protected("EXPLORER.EXE"));
        assert!(safety.is_protected("system"));
        assert!(safety.is_protected("  csrss.exe "));
        assert!(!safety.is_protected("notepad.exe"));
        assert!(!safety.is_protected("explorer"));
    }

    #[test]
    fn test_load_valid_config() {
        let content = r#"
[general]
data_dir = "/custom/data"
log_level = "debug"

[safety]
automation_level = "fully_auto"
enable_rollback = false
protected_targets = ["init", "sshd"]

[execution]
max_concurrent_actions = 8
action_timeout_seconds = 10
"#;
        let file = create_temp_config(content);
        let config = GuardianConfig::load(file.path()).unwrap();
        assert_eq!(config.general.data_dir, "/custom/data");
        assert_eq!(config.safety.automation_level, "fully_auto");
        assert!(!config.safety.enable_rollback);
        assert_eq!(config.safety.protected_targets, vec!["init", "sshd"]);
        assert_eq!(config.execution.max_concurrent_actions, 8);
        // Unspecified fields keep their defaults
        assert!(config.safety.snapshot_before_action);
        assert_eq!(config.execution.graceful_terminate_seconds, 5);
    }

    #[test]
    fn test_protected_targets_comma_separated_string() {
        let content = r#"
[safety]
protected_targets = "explorer.exe, System ,,csrss.exe"
"#;
        let file = create_temp_config(content);
        let config = GuardianConfig::load(file.path()).unwrap();
        assert_eq!(
            config.safety.protected_targets,
            vec!["explorer.exe", "System", "csrss.exe"]
        );
    }

    #[test]
    fn test_load_rejects_unknown_automation_level() {
        let content = r#"
[safety]
automation_level = "yolo"
"#;
        let file = create_temp_config(content);
        let err = GuardianConfig::load(file.path()).unwrap_err();
        assert!(matches!(err, GuardianError::Config(_)));
        assert!(err.to_string().contains("yolo"));
    }

    #[test]
    fn test_validate_rejects_zero_limits() {
        let mut config = GuardianConfig::default();
        config.execution.max_concurrent_actions = 0;
        assert!(config.validate().is_err());

        let mut config = GuardianConfig::default();
        config.execution.action_timeout_seconds = 0;
        assert!(config.validate().is_err());

        let mut config = GuardianConfig::default();
        config.safety.approval_risk_threshold = "extreme".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let config = GuardianConfig::load_or_default(Path::new("/nonexistent/config.toml"));
        assert_eq!(config.general.data_dir, "~/.guardian/data");
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = GuardianConfig::default();
        config.safety.protected_targets = vec!["init".to_string()];
        config.save(&path).unwrap();

        let reloaded = GuardianConfig::load(&path).unwrap();
        assert_eq!(reloaded.safety.protected_targets, vec!["init"]);
        assert_eq!(
            reloaded.execution.action_timeout_seconds,
            config.execution.action_timeout_seconds
        );
    }

    #[test]
    fn test_parse_target_list() {
        assert_eq!(parse_target_list("a, b,c"), vec!["a", "b", "c"]);
        assert!(parse_target_list("").is_empty());
        assert!(parse_target_list(" , ,").is_empty());
    }

    #[test]
    fn test_action_log_path_absolute_and_relative() {
        let mut config = GuardianConfig::default();
        config.general.data_dir = "/var/lib/guardian".to_string();
        assert_eq!(
            config.action_log_path(),
            PathBuf::from("/var/lib/guardian/actions.db")
        );

        config.storage.action_log_db = "/tmp/audit.db".to_string();
        assert_eq!(config.action_log_path(), PathBuf::from("/tmp/audit.db"));
    }
}
