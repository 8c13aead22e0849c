//! In-memory `SystemControl` that records calls instead of touching the OS.
//!
//! Backs `--dry-run` and the test suites. Processes live in a table that
//! terminate/kill/spawn update; failures, delays and panics can be
//! scripted per operation.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use super::{
    CleanupReport, MemoryReport, PowerPlan, Priority, ProcessInfo, SpawnOutcome, SystemControl,
    SystemMetrics, TerminateOutcome,
};
use crate::error::PlatformError;

/// Operations that can be scripted to fail, stall or panic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    ListProcesses,
    Terminate,
    Kill,
    Spawn,
    SetPriority,
    SetAffinity,
    Metrics,
    TrimMemory,
    CleanupTemp,
    PowerPlan,
    SetPowerPlan,
    Brightness,
    SetBrightness,
    Suspend,
    Hibernate,
}

/// A state-changing call that reached the system.
#[derive(Debug, Clone, PartialEq)]
pub enum SystemCall {
    Terminate(u32),
    Kill(u32),
    Spawn(PathBuf),
    SetPriority(u32, Priority),
    SetAffinity(u32, Vec<usize>),
    TrimMemory,
    CleanupTemp,
    SetPowerPlan(PowerPlan),
    SetBrightness(u8),
    Suspend,
    Hibernate,
}

struct ScriptState {
    processes: Vec<ProcessInfo>,
    next_pid: u32,
    cpu_count: usize,
    power_plans: bool,
    power_plan: Option<PowerPlan>,
    brightness: Option<u8>,
    paths: HashSet<PathBuf>,
    exiting: HashSet<PathBuf>,
    failures: HashMap<(Operation, Option<u32>), String>,
    delays: HashMap<Operation, Duration>,
    panics: HashSet<Operation>,
    calls: Vec<SystemCall>,
}

/// Scripted, call-recording system.
pub struct ScriptedSystem {
    state: Mutex<ScriptState>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedSystem {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ScriptState {
                processes: Vec::new(),
                next_pid: 1000,
                cpu_count: 4,
                power_plans: true,
                power_plan: Some(PowerPlan::Balanced),
                brightness: Some(50),
                paths: HashSet::new(),
                exiting: HashSet::new(),
                failures: HashMap::new(),
                delays: HashMap::new(),
                panics: HashSet::new(),
                calls: Vec::new(),
            }),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Seed the process table, e.g. from a real process listing.
    pub fn with_processes(self, processes: Vec<ProcessInfo>) -> Self {
        {
            let mut state = self.lock();
            if let Some(max) = processes.iter().map(|p| p.pid).max() {
                state.next_pid = state.next_pid.max(max + 1);
            }
            state.processes = processes;
        }
        self
    }

    pub fn with_process(self, name: &str, exe: Option<&str>) -> Self {
        self.add_process(name, exe);
        self
    }

    pub fn with_cpu_count(self, count: usize) -> Self {
        self.lock().cpu_count = count;
        self
    }

    pub fn with_power_plan(self, plan: Option<PowerPlan>) -> Self {
        self.lock().power_plan = plan;
        self
    }

    pub fn without_power_plans(self) -> Self {
        self.lock().power_plans = false;
        self
    }

    pub fn with_brightness(self, level: Option<u8>) -> Self {
        self.lock().brightness = level;
        self
    }

    /// Make `path` exist for `path_exists` and `spawn`.
    pub fn with_path(self, path: impl Into<PathBuf>) -> Self {
        self.lock().paths.insert(path.into());
        self
    }

    /// Programs at `path` exit immediately when spawned.
    pub fn with_exiting_path(self, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        {
            let mut state = self.lock();
            state.paths.insert(path.clone());
            state.exiting.insert(path);
        }
        self
    }

    /// Add a running process and return its pid.
    pub fn add_process(&self, name: &str, exe: Option<&str>) -> u32 {
        let mut state = self.lock();
        let pid = state.next_pid;
        state.next_pid += 1;
        state.processes.push(ProcessInfo {
            pid,
            name: name.to_string(),
            status: "Run".to_string(),
            cpu_percent: 0.0,
            memory_percent: 0.5,
            exe: exe.map(PathBuf::from),
        });
        pid
    }

    /// Every call of `op` fails with `message`.
    pub fn fail(&self, op: Operation, message: &str) {
        self.lock().failures.insert((op, None), message.to_string());
    }

    /// Calls of `op` on `pid` fail with `message`.
    pub fn fail_pid(&self, op: Operation, pid: u32, message: &str) {
        self.lock()
            .failures
            .insert((op, Some(pid)), message.to_string());
    }

    pub fn clear_failures(&self) {
        self.lock().failures.clear();
    }

    /// Calls of `op` sleep for `delay` before taking effect.
    pub fn delay(&self, op: Operation, delay: Duration) {
        self.lock().delays.insert(op, delay);
    }

    /// Calls of `op` panic.
    pub fn panic_on(&self, op: Operation) {
        self.lock().panics.insert(op);
    }

    /// State-changing calls received so far, in order.
    pub fn calls(&self) -> Vec<SystemCall> {
        self.lock().calls.clone()
    }

    pub fn call_count(&self) -> usize {
        self.lock().calls.len()
    }

    /// Highest number of state-changing calls observed running at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn pids_named(&self, name: &str) -> Vec<u32> {
        self.lock()
            .processes
            .iter()
            .filter(|p| p.name.eq_ignore_ascii_case(name))
            .map(|p| p.pid)
            .collect()
    }

    pub fn current_power_plan(&self) -> Option<PowerPlan> {
        self.lock().power_plan
    }

    pub fn current_brightness(&self) -> Option<u8> {
        self.lock().brightness
    }

    fn lock(&self) -> MutexGuard<'_, ScriptState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply scripted panic, delay and failure for a read-only `op`.
    async fn script(&self, op: Operation, pid: Option<u32>) -> Result<(), PlatformError> {
        let (delay, panics) = {
            let state = self.lock();
            (state.delays.get(&op).copied(), state.panics.contains(&op))
        };
        if panics {
            panic!("scripted panic in {:?}", op);
        }
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let state = self.lock();
        let failure = pid
            .and_then(|pid| state.failures.get(&(op, Some(pid))))
            .or_else(|| state.failures.get(&(op, None)));
        match failure {
            Some(message) => Err(PlatformError::Failed(message.clone())),
            None => Ok(()),
        }
    }

    /// Like `script`, and records `call` and concurrency for a mutation.
    async fn mutate(
        &self,
        op: Operation,
        pid: Option<u32>,
        call: SystemCall,
    ) -> Result<(), PlatformError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        // Decrements even when a deadline drops this future.
        let _in_flight = InFlight(&self.in_flight);
        self.lock().calls.push(call);
        self.script(op, pid).await
    }

    fn remove_pid(&self, pid: u32) -> Result<(), PlatformError> {
        let mut state = self.lock();
        let before = state.processes.len();
        state.processes.retain(|p| p.pid != pid);
        if state.processes.len() == before {
            Err(PlatformError::ProcessNotFound(pid))
        } else {
            Ok(())
        }
    }

    fn require_pid(&self, pid: u32) -> Result<(), PlatformError> {
        if self.lock().processes.iter().any(|p| p.pid == pid) {
            Ok(())
        } else {
            Err(PlatformError::ProcessNotFound(pid))
        }
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Default for ScriptedSystem {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SystemControl for ScriptedSystem {
    async fn list_processes(&self) -> Result<Vec<ProcessInfo>, PlatformError> {
        self.script(Operation::ListProcesses, None).await?;
        Ok(self.lock().processes.clone())
    }

    async fn terminate(&self, pid: u32, _grace: Duration) -> Result<TerminateOutcome, PlatformError> {
        self.mutate(Operation::Terminate, Some(pid), SystemCall::Terminate(pid))
            .await?;
        self.remove_pid(pid)?;
        Ok(TerminateOutcome::Graceful)
    }

    async fn kill(&self, pid: u32) -> Result<(), PlatformError> {
        self.mutate(Operation::Kill, Some(pid), SystemCall::Kill(pid))
            .await?;
        self.remove_pid(pid)
    }

    async fn spawn(&self, program: &Path) -> Result<SpawnOutcome, PlatformError> {
        self.mutate(Operation::Spawn, None, SystemCall::Spawn(program.to_path_buf()))
            .await?;
        let exiting = self.lock().exiting.contains(program);
        if exiting {
            return Ok(SpawnOutcome::Exited { code: Some(1) });
        }
        let name = program
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| program.display().to_string());
        let pid = self.add_process(&name, program.to_str());
        Ok(SpawnOutcome::Running { pid })
    }

    async fn set_priority(&self, pid: u32, priority: Priority) -> Result<(), PlatformError> {
        self.mutate(
            Operation::SetPriority,
            Some(pid),
            SystemCall::SetPriority(pid, priority),
        )
        .await?;
        self.require_pid(pid)
    }

    fn cpu_count(&self) -> usize {
        self.lock().cpu_count
    }

    async fn set_affinity(&self, pid: u32, cpus: &[usize]) -> Result<(), PlatformError> {
        self.mutate(
            Operation::SetAffinity,
            Some(pid),
            SystemCall::SetAffinity(pid, cpus.to_vec()),
        )
        .await?;
        self.require_pid(pid)
    }

    async fn metrics(&self) -> Result<SystemMetrics, PlatformError> {
        self.script(Operation::Metrics, None).await?;
        Ok(SystemMetrics {
            cpu_percent: 12.5,
            cpu_count: self.cpu_count(),
            memory_percent: 40.0,
            memory_used_bytes: 4 << 30,
            memory_total_bytes: 10 << 30,
            disk_percent: 55.0,
        })
    }

    async fn trim_memory(&self) -> Result<MemoryReport, PlatformError> {
        self.mutate(Operation::TrimMemory, None, SystemCall::TrimMemory)
            .await?;
        Ok(MemoryReport {
            used_before: 4 << 30,
            used_after: 3 << 30,
            total: 10 << 30,
        })
    }

    async fn cleanup_temp(&self, deadline: Instant) -> Result<CleanupReport, PlatformError> {
        self.mutate(Operation::CleanupTemp, None, SystemCall::CleanupTemp)
            .await?;
        Ok(CleanupReport {
            items_removed: 3,
            bytes_freed: 3 << 20,
            items_skipped: 1,
            deadline_hit: Instant::now() >= deadline,
        })
    }

    async fn power_plan(&self) -> Result<Option<PowerPlan>, PlatformError> {
        self.script(Operation::PowerPlan, None).await?;
        Ok(self.lock().power_plan)
    }

    async fn set_power_plan(&self, plan: PowerPlan) -> Result<(), PlatformError> {
        self.mutate(Operation::SetPowerPlan, None, SystemCall::SetPowerPlan(plan))
            .await?;
        self.lock().power_plan = Some(plan);
        Ok(())
    }

    fn supports_power_plans(&self) -> bool {
        self.lock().power_plans
    }

    async fn brightness(&self) -> Result<Option<u8>, PlatformError> {
        self.script(Operation::Brightness, None).await?;
        Ok(self.lock().brightness)
    }

    async fn set_brightness(&self, level: u8) -> Result<(), PlatformError> {
        self.mutate(Operation::SetBrightness, None, SystemCall::SetBrightness(level))
            .await?;
        self.lock().brightness = Some(level);
        Ok(())
    }

    async fn suspend(&self) -> Result<(), PlatformError> {
        self.mutate(Operation::Suspend, None, SystemCall::Suspend)
            .await
    }

    async fn hibernate(&self) -> Result<(), PlatformError> {
        self.mutate(Operation::Hibernate, None, SystemCall::Hibernate)
            .await
    }

    fn path_exists(&self, path: &Path) -> bool {
        self.lock().paths.contains(path)
    }
}
