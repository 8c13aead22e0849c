//! CLI argument definitions for the Guardian binary.
//!
//! Priority resolution: CLI args > env vars > config file > defaults.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Guardian: policy-gated system actions with snapshots and rollback.
#[derive(Parser, Debug)]
#[command(name = "guardian", version, about)]
pub struct CliArgs {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,

    /// Data directory for the audit database.
    #[arg(short = 'd', long = "data-dir", global = true)]
    pub data_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short = 'l', long = "log-level", global = true)]
    pub log_level: Option<String>,

    /// Run against a simulated copy of this machine. Nothing is changed and
    /// nothing is written to the audit database.
    #[arg(long = "dry-run", global = true)]
    pub dry_run: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Execute one action.
    Execute {
        /// Action kind, e.g. close_process or power_plan.
        kind: String,
        /// Process name, program path, or `host` for system-wide actions.
        #[arg(default_value = "host")]
        target: String,
        /// Parameter as key=value; repeatable.
        #[arg(short = 'p', long = "param")]
        params: Vec<String>,
        /// Approve the action if policy requires it.
        #[arg(short = 'y', long = "yes")]
        approve: bool,
    },
    /// Show recent actions, newest first.
    History {
        #[arg(short = 'n', long = "limit", default_value_t = 20)]
        limit: u64,
        /// Only show actions with this status.
        #[arg(long = "status")]
        status: Option<String>,
    },
    /// Roll back the most recent action that still has a snapshot.
    RollbackLast,
    /// Audit log statistics.
    Stats,
    /// Effective policy and current system metrics.
    Status,
    /// Manage and apply profiles.
    Profile {
        #[command(subcommand)]
        command: ProfileCommand,
    },
    /// List the supported action kinds.
    Kinds,
}

#[derive(Subcommand, Debug)]
pub enum ProfileCommand {
    /// List available profiles.
    List,
    /// Print a profile.
    Show { name: String },
    /// Execute every step of a profile.
    Apply {
        name: String,
        #[arg(short = 'y', long = "yes")]
        approve: bool,
    },
    /// Write the built-in profiles that do not exist yet.
    CreateDefaults,
}

impl CliArgs {
    /// Resolve the configuration file path.
    ///
    /// Priority: --config flag > GUARDIAN_CONFIG env var > ~/.guardian/config.toml.
    pub fn resolve_config_path(&self) -> PathBuf {
        if let Some(ref p) = self.config {
            return p.clone();
        }
        if let Ok(p) = std::env::var("GUARDIAN_CONFIG") {
            return PathBuf::from(p);
        }
        default_config_path()
    }

    /// Resolve the log filter.
    ///
    /// Priority: RUST_LOG (handled by the caller) > --log-level > config value.
    pub fn resolve_log_level(&self, config_level: &str) -> String {
        self.log_level
            .clone()
            .unwrap_or_else(|| config_level.to_string())
    }

    /// Returns `None` if not overridden.
    pub fn resolve_data_dir(&self) -> Option<String> {
        self.data_dir
            .as_ref()
            .map(|p| p.to_string_lossy().to_string())
    }
}

/// Default config file path for the current platform.
fn default_config_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    if let Ok(home) = std::env::var("USERPROFILE") {
        return PathBuf::from(home).join(".guardian").join("config.toml");
    }
    #[cfg(not(target_os = "windows"))]
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".guardian").join("config.toml");
    }
    PathBuf::from("config.toml")
}
