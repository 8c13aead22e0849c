//! Operating-system collaborator.
//!
//! Every OS call an action makes goes through `SystemControl`, so actions
//! stay testable against `ScriptedSystem`. `NativeSystem` is the real one.

pub mod native;
pub mod scripted;

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::PlatformError;

pub use native::NativeSystem;
pub use scripted::{Operation, ScriptedSystem, SystemCall};

/// Lightweight descriptor of a running process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessInfo {
    pub pid: u32,
    pub name: String,
    pub status: String,
    pub cpu_percent: f32,
    pub memory_percent: f32,
    /// Executable path, when readable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exe: Option<PathBuf>,
}

/// Scalar system metrics captured for snapshots.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemMetrics {
    pub cpu_percent: f32,
    pub cpu_count: usize,
    pub memory_percent: f32,
    pub memory_used_bytes: u64,
    pub memory_total_bytes: u64,
    pub disk_percent: f32,
}

/// How a terminate request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminateOutcome {
    Graceful,
    /// The grace period expired and the process was force-killed.
    Forced,
}

/// Result of launching a program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpawnOutcome {
    Running { pid: u32 },
    /// The program exited during the startup check.
    Exited { code: Option<i32> },
}

/// Memory usage around a cache trim.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryReport {
    pub used_before: u64,
    pub used_after: u64,
    pub total: u64,
}

/// Outcome of a temp-directory sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub items_removed: u64,
    pub bytes_freed: u64,
    pub items_skipped: u64,
    pub deadline_hit: bool,
}

/// Process scheduling priority classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    BelowNormal,
    Normal,
    AboveNormal,
    High,
    Realtime,
}

impl Priority {
    pub const ALL: [Priority; 6] = [
        Priority::Low,
        Priority::BelowNormal,
        Priority::Normal,
        Priority::AboveNormal,
        Priority::High,
        Priority::Realtime,
    ];

    /// Unix nice value for this class.
    pub fn nice(&self) -> i32 {
        match self {
            Priority::Low => 19,
            Priority::BelowNormal => 10,
            Priority::Normal => 0,
            Priority::AboveNormal => -5,
            Priority::High => -10,
            Priority::Realtime => -20,
        }
    }

    /// Raising to these needs elevated privileges and can starve the system.
    pub fn is_elevated(&self) -> bool {
        matches!(self, Priority::High | Priority::Realtime)
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Priority::Low => write!(f, "low"),
            Priority::BelowNormal => write!(f, "below_normal"),
            Priority::Normal => write!(f, "normal"),
            Priority::AboveNormal => write!(f, "above_normal"),
            Priority::High => write!(f, "high"),
            Priority::Realtime => write!(f, "realtime"),
        }
    }
}

impl std::str::FromStr for Priority {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "low" | "idle" => Ok(Priority::Low),
            "below_normal" => Ok(Priority::BelowNormal),
            "normal" => Ok(Priority::Normal),
            "above_normal" => Ok(Priority::AboveNormal),
            "high" => Ok(Priority::High),
            "realtime" => Ok(Priority::Realtime),
            _ => Err(format!("Unknown priority: {}", s)),
        }
    }
}

/// Named power plans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PowerPlan {
    PowerSaver,
    Balanced,
    Performance,
}

impl PowerPlan {
    pub const ALL: [PowerPlan; 3] = [
        PowerPlan::PowerSaver,
        PowerPlan::Balanced,
        PowerPlan::Performance,
    ];

    /// Scheme GUID used by `powercfg`.
    pub fn windows_guid(&self) -> &'static str {
        match self {
            PowerPlan::PowerSaver => "a1841308-3541-4fab-bc81-f71556f20b4a",
            PowerPlan::Balanced => "381b4222-f694-41f0-9685-ff5bb260df2e",
            PowerPlan::Performance => "8c5e7fda-e8bf-4a96-9a85-a6e23a8c635c",
        }
    }

    /// Profile name used by `powerprofilesctl`.
    pub fn linux_profile(&self) -> &'static str {
        match self {
            PowerPlan::PowerSaver => "power-saver",
            PowerPlan::Balanced => "balanced",
            PowerPlan::Performance => "performance",
        }
    }

    /// Find the plan whose GUID or profile name appears in `output`.
    pub fn detect(output: &str) -> Option<Self> {
        let output = output.to_lowercase();
        PowerPlan::ALL.into_iter().find(|plan| {
            output.contains(plan.windows_guid()) || output.trim() == plan.linux_profile()
        })
    }
}

impl fmt::Display for PowerPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PowerPlan::PowerSaver => write!(f, "power_saver"),
            PowerPlan::Balanced => write!(f, "balanced"),
            PowerPlan::Performance => write!(f, "performance"),
        }
    }
}

impl std::str::FromStr for PowerPlan {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "power_saver" => Ok(PowerPlan::PowerSaver),
            "balanced" => Ok(PowerPlan::Balanced),
            "performance" | "high_performance" => Ok(PowerPlan::Performance),
            _ => Err(format!("Unknown power plan: {}", s)),
        }
    }
}

/// The operating-system surface actions act through.
#[async_trait]
pub trait SystemControl: Send + Sync {
    /// All processes the caller can see. Inaccessible ones are skipped.
    async fn list_processes(&self) -> Result<Vec<ProcessInfo>, PlatformError>;

    /// Processes whose name equals `name`, case-insensitively.
    async fn find_processes(&self, name: &str) -> Result<Vec<ProcessInfo>, PlatformError> {
        let name = name.trim().to_lowercase();
        Ok(self
            .list_processes()
            .await?
            .into_iter()
            .filter(|p| p.name.to_lowercase() == name)
            .collect())
    }

    /// Ask a process to exit, force-killing it after `grace`.
    async fn terminate(&self, pid: u32, grace: Duration) -> Result<TerminateOutcome, PlatformError>;

    async fn kill(&self, pid: u32) -> Result<(), PlatformError>;

    /// Launch a program detached, reporting an immediate exit.
    async fn spawn(&self, program: &Path) -> Result<SpawnOutcome, PlatformError>;

    async fn set_priority(&self, pid: u32, priority: Priority) -> Result<(), PlatformError>;

    /// Number of logical CPUs.
    fn cpu_count(&self) -> usize;

    async fn set_affinity(&self, pid: u32, cpus: &[usize]) -> Result<(), PlatformError>;

    async fn metrics(&self) -> Result<SystemMetrics, PlatformError>;

    /// Release reclaimable memory caches.
    async fn trim_memory(&self) -> Result<MemoryReport, PlatformError>;

    /// Remove entries from the temp directory until done or `deadline`.
    async fn cleanup_temp(&self, deadline: Instant) -> Result<CleanupReport, PlatformError>;

    /// The active power plan, if it maps to a known one.
    async fn power_plan(&self) -> Result<Option<PowerPlan>, PlatformError>;

    async fn set_power_plan(&self, plan: PowerPlan) -> Result<(), PlatformError>;

    fn supports_power_plans(&self) -> bool;

    /// Current display brightness in percent.
    async fn brightness(&self) -> Result<Option<u8>, PlatformError>;

    async fn set_brightness(&self, level: u8) -> Result<(), PlatformError>;

    async fn suspend(&self) -> Result<(), PlatformError>;

    async fn hibernate(&self) -> Result<(), PlatformError>;

    fn path_exists(&self, path: &Path) -> bool {
        path.exists()
    }
}
