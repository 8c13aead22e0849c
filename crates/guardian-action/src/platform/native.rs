//! `SystemControl` backed by the host operating system.
//!
//! Process and metric queries use `sysinfo`; priority and affinity use
//! `libc` on unix; power, brightness and suspend shell out to the platform
//! tools (`powercfg`, `powerprofilesctl`, `systemctl`, `shutdown`).

use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use sysinfo::{Disks, Pid, ProcessStatus, Signal, System};
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::{
    CleanupReport, MemoryReport, PowerPlan, Priority, ProcessInfo, SpawnOutcome, SystemControl,
    SystemMetrics, TerminateOutcome,
};
use crate::error::PlatformError;

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(200);
const SPAWN_CHECK_DELAY: Duration = Duration::from_millis(500);

/// The host system.
pub struct NativeSystem {
    cpu_count: usize,
}

impl NativeSystem {
    pub fn new() -> Self {
        let cpu_count = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self { cpu_count }
    }
}

impl Default for NativeSystem {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SystemControl for NativeSystem {
    async fn list_processes(&self) -> Result<Vec<ProcessInfo>, PlatformError> {
        blocking(|| {
            let sys = System::new_all();
            let total = sys.total_memory().max(1) as f64;
            Ok(sys
                .processes()
                .values()
                .map(|p| ProcessInfo {
                    pid: p.pid().as_u32(),
                    name: p.name().to_string_lossy().into_owned(),
                    status: p.status().to_string(),
                    cpu_percent: p.cpu_usage(),
                    memory_percent: (p.memory() as f64 / total * 100.0) as f32,
                    exe: p.exe().map(Path::to_path_buf),
                })
                .collect())
        })
        .await
    }

    async fn terminate(&self, pid: u32, grace: Duration) -> Result<TerminateOutcome, PlatformError> {
        let signalled = blocking(move || {
            let sys = System::new_all();
            let process = sys
                .process(Pid::from_u32(pid))
                .ok_or(PlatformError::ProcessNotFound(pid))?;
            Ok(process.kill_with(Signal::Term))
        })
        .await?;

        match signalled {
            Some(true) => {
                let deadline = Instant::now() + grace;
                while Instant::now() < deadline {
                    if !is_alive(pid).await? {
                        return Ok(TerminateOutcome::Graceful);
                    }
                    tokio::time::sleep(EXIT_POLL_INTERVAL).await;
                }
                if !is_alive(pid).await? {
                    return Ok(TerminateOutcome::Graceful);
                }
                warn!(pid, "Process ignored terminate request, force killing");
            }
            Some(false) => {
                return Err(PlatformError::PermissionDenied(format!(
                    "cannot signal process {}",
                    pid
                )))
            }
            // No graceful signal on this platform.
            None => debug!(pid, "Graceful terminate unsupported, killing"),
        }

        self.kill(pid).await?;
        Ok(TerminateOutcome::Forced)
    }

    async fn kill(&self, pid: u32) -> Result<(), PlatformError> {
        blocking(move || {
            let sys = System::new_all();
            let process = sys
                .process(Pid::from_u32(pid))
                .ok_or(PlatformError::ProcessNotFound(pid))?;
            if process.kill() {
                Ok(())
            } else {
                Err(PlatformError::PermissionDenied(format!(
                    "cannot kill process {}",
                    pid
                )))
            }
        })
        .await
    }

    async fn spawn(&self, program: &Path) -> Result<SpawnOutcome, PlatformError> {
        let mut child = Command::new(program)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;
        let pid = child.id().unwrap_or_default();

        tokio::time::sleep(SPAWN_CHECK_DELAY).await;
        match child.try_wait()? {
            Some(status) => Ok(SpawnOutcome::Exited {
                code: status.code(),
            }),
            None => {
                info!(pid, program = %program.display(), "Process started");
                Ok(SpawnOutcome::Running { pid })
            }
        }
    }

    async fn set_priority(&self, pid: u32, priority: Priority) -> Result<(), PlatformError> {
        #[cfg(unix)]
        {
            let nice = priority.nice();
            blocking(move || {
                // SAFETY: setpriority only reads its scalar arguments.
                let rc = unsafe { libc::setpriority(libc::PRIO_PROCESS, pid as libc::id_t, nice) };
                if rc == 0 {
                    Ok(())
                } else {
                    Err(os_error(pid, std::io::Error::last_os_error()))
                }
            })
            .await
        }

        #[cfg(windows)]
        {
            let class = match priority {
                Priority::Low => "Idle",
                Priority::BelowNormal => "BelowNormal",
                Priority::Normal => "Normal",
                Priority::AboveNormal => "AboveNormal",
                Priority::High => "High",
                Priority::Realtime => "RealTime",
            };
            powershell(&format!(
                "(Get-Process -Id {}).PriorityClass = '{}'",
                pid, class
            ))
            .await
            .map(|_| ())
        }

        #[cfg(not(any(unix, windows)))]
        {
            let _ = (pid, priority);
            Err(PlatformError::Unsupported("process priority".to_string()))
        }
    }

    fn cpu_count(&self) -> usize {
        self.cpu_count
    }

    async fn set_affinity(&self, pid: u32, cpus: &[usize]) -> Result<(), PlatformError> {
        #[cfg(target_os = "linux")]
        {
            let cpus = cpus.to_vec();
            blocking(move || {
                // SAFETY: cpu_set_t is plain data; the set is fully
                // initialised before sched_setaffinity reads it.
                let rc = unsafe {
                    let mut set: libc::cpu_set_t = std::mem::zeroed();
                    libc::CPU_ZERO(&mut set);
                    for cpu in cpus {
                        libc::CPU_SET(cpu, &mut set);
                    }
                    libc::sched_setaffinity(
                        pid as libc::pid_t,
                        std::mem::size_of::<libc::cpu_set_t>(),
                        &set,
                    )
                };
                if rc == 0 {
                    Ok(())
                } else {
                    Err(os_error(pid, std::io::Error::last_os_error()))
                }
            })
            .await
        }

        #[cfg(windows)]
        {
            let mask: u64 = cpus.iter().fold(0, |mask, cpu| mask | (1u64 << cpu));
            powershell(&format!(
                "(Get-Process -Id {}).ProcessorAffinity = {}",
                pid, mask
            ))
            .await
            .map(|_| ())
        }

        #[cfg(not(any(target_os = "linux", windows)))]
        {
            let _ = (pid, cpus);
            Err(PlatformError::Unsupported("CPU affinity".to_string()))
        }
    }

    async fn metrics(&self) -> Result<SystemMetrics, PlatformError> {
        blocking(|| {
            let sys = System::new_all();
            let cpus = sys.cpus();
            let cpu_percent = if cpus.is_empty() {
                0.0
            } else {
                cpus.iter().map(|c| c.cpu_usage()).sum::<f32>() / cpus.len() as f32
            };

            let total = sys.total_memory();
            let used = sys.used_memory();

            let disks = Disks::new_with_refreshed_list();
            let (disk_total, disk_free) = disks.list().iter().fold((0u64, 0u64), |acc, d| {
                (acc.0 + d.total_space(), acc.1 + d.available_space())
            });

            Ok(SystemMetrics {
                cpu_percent,
                cpu_count: cpus.len(),
                memory_percent: percent(used, total),
                memory_used_bytes: used,
                memory_total_bytes: total,
                disk_percent: percent(disk_total.saturating_sub(disk_free), disk_total),
            })
        })
        .await
    }

    async fn trim_memory(&self) -> Result<MemoryReport, PlatformError> {
        #[cfg(target_os = "linux")]
        {
            let (used_before, total) = memory_usage().await?;
            blocking(|| {
                // SAFETY: sync takes no arguments and cannot fail.
                unsafe { libc::sync() };
                std::fs::write("/proc/sys/vm/drop_caches", "1").map_err(|e| {
                    if e.kind() == std::io::ErrorKind::PermissionDenied {
                        PlatformError::PermissionDenied(
                            "dropping page caches requires root".to_string(),
                        )
                    } else {
                        PlatformError::Io(e)
                    }
                })
            })
            .await?;
            let (used_after, _) = memory_usage().await?;
            Ok(MemoryReport {
                used_before,
                used_after,
                total,
            })
        }

        #[cfg(not(target_os = "linux"))]
        {
            Err(PlatformError::Unsupported("memory cache trimming".to_string()))
        }
    }

    async fn cleanup_temp(&self, deadline: Instant) -> Result<CleanupReport, PlatformError> {
        let dir = std::env::temp_dir();
        blocking(move || sweep_dir(&dir, deadline)).await
    }

    async fn power_plan(&self) -> Result<Option<PowerPlan>, PlatformError> {
        if cfg!(windows) {
            let out = run_command("powercfg", &["/getactivescheme"]).await?;
            Ok(PowerPlan::detect(&out))
        } else if cfg!(target_os = "linux") {
            let out = run_command("powerprofilesctl", &["get"]).await?;
            Ok(PowerPlan::detect(&out))
        } else {
            Err(PlatformError::Unsupported("power plans".to_string()))
        }
    }

    async fn set_power_plan(&self, plan: PowerPlan) -> Result<(), PlatformError> {
        if cfg!(windows) {
            run_command("powercfg", &["/setactive", plan.windows_guid()]).await?;
        } else if cfg!(target_os = "linux") {
            run_command("powerprofilesctl", &["set", plan.linux_profile()]).await?;
        } else {
            return Err(PlatformError::Unsupported("power plans".to_string()));
        }
        info!(plan = %plan, "Power plan switched");
        Ok(())
    }

    fn supports_power_plans(&self) -> bool {
        cfg!(any(windows, target_os = "linux"))
    }

    async fn brightness(&self) -> Result<Option<u8>, PlatformError> {
        #[cfg(target_os = "linux")]
        {
            let Some(device) = backlight_device() else {
                return Ok(None);
            };
            let current = read_number(&device.join("brightness"))?;
            let max = read_number(&device.join("max_brightness"))?.max(1);
            Ok(Some(((current * 100 + max / 2) / max).min(100) as u8))
        }

        #[cfg(windows)]
        {
            let out = powershell(
                "(Get-CimInstance -Namespace root/WMI -ClassName WmiMonitorBrightness).CurrentBrightness",
            )
            .await?;
            Ok(out.lines().next().and_then(|l| l.trim().parse().ok()))
        }

        #[cfg(not(any(target_os = "linux", windows)))]
        {
            Err(PlatformError::Unsupported("brightness control".to_string()))
        }
    }

    async fn set_brightness(&self, level: u8) -> Result<(), PlatformError> {
        #[cfg(target_os = "linux")]
        {
            let device = backlight_device().ok_or_else(|| {
                PlatformError::Unsupported("no backlight device found".to_string())
            })?;
            let max = read_number(&device.join("max_brightness"))?;
            let raw = max * u64::from(level) / 100;
            std::fs::write(device.join("brightness"), raw.to_string())?;
            Ok(())
        }

        #[cfg(windows)]
        {
            powershell(&format!(
                "Get-CimInstance -Namespace root/WMI -ClassName WmiMonitorBrightnessMethods | \
                 Invoke-CimMethod -MethodName WmiSetBrightness -Arguments @{{Timeout=0; Brightness={}}}",
                level
            ))
            .await
            .map(|_| ())
        }

        #[cfg(not(any(target_os = "linux", windows)))]
        {
            let _ = level;
            Err(PlatformError::Unsupported("brightness control".to_string()))
        }
    }

    async fn suspend(&self) -> Result<(), PlatformError> {
        if cfg!(windows) {
            run_command("rundll32.exe", &["powrprof.dll,SetSuspendState", "0,1,0"]).await?;
        } else if cfg!(target_os = "linux") {
            run_command("systemctl", &["suspend"]).await?;
        } else if cfg!(target_os = "macos") {
            run_command("pmset", &["sleepnow"]).await?;
        } else {
            return Err(PlatformError::Unsupported("sleep".to_string()));
        }
        Ok(())
    }

    async fn hibernate(&self) -> Result<(), PlatformError> {
        if cfg!(windows) {
            run_command("shutdown", &["/h"]).await?;
        } else if cfg!(target_os = "linux") {
            run_command("systemctl", &["hibernate"]).await?;
        } else {
            return Err(PlatformError::Unsupported("hibernate".to_string()));
        }
        Ok(())
    }
}

// =============================================================================
// Helpers
// =============================================================================

async fn blocking<T, F>(f: F) -> Result<T, PlatformError>
where
    F: FnOnce() -> Result<T, PlatformError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| PlatformError::Failed(format!("Blocking task failed: {}", e)))?
}

async fn is_alive(pid: u32) -> Result<bool, PlatformError> {
    blocking(move || {
        let sys = System::new_all();
        Ok(sys
            .process(Pid::from_u32(pid))
            .is_some_and(|p| !matches!(p.status(), ProcessStatus::Zombie | ProcessStatus::Dead)))
    })
    .await
}

#[cfg(target_os = "linux")]
async fn memory_usage() -> Result<(u64, u64), PlatformError> {
    blocking(|| {
        let sys = System::new_all();
        Ok((sys.used_memory(), sys.total_memory()))
    })
    .await
}

async fn run_command(program: &str, args: &[&str]) -> Result<String, PlatformError> {
    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                PlatformError::Unsupported(format!("{} is not available", program))
            } else {
                PlatformError::Io(e)
            }
        })?;

    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    } else {
        Err(PlatformError::CommandFailed {
            command: format!("{} {}", program, args.join(" ")),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}

#[cfg(windows)]
async fn powershell(script: &str) -> Result<String, PlatformError> {
    run_command("powershell", &["-NoProfile", "-NonInteractive", "-Command", script]).await
}

#[cfg(unix)]
fn os_error(pid: u32, err: std::io::Error) -> PlatformError {
    match err.raw_os_error() {
        Some(libc::ESRCH) => PlatformError::ProcessNotFound(pid),
        Some(libc::EPERM) | Some(libc::EACCES) => {
            PlatformError::PermissionDenied(format!("process {}: {}", pid, err))
        }
        _ => PlatformError::Io(err),
    }
}

#[cfg(target_os = "linux")]
fn backlight_device() -> Option<std::path::PathBuf> {
    let mut entries: Vec<std::path::PathBuf> = std::fs::read_dir("/sys/class/backlight")
        .ok()?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .collect();
    entries.sort();
    entries.into_iter().next()
}

#[cfg(target_os = "linux")]
fn read_number(path: &Path) -> Result<u64, PlatformError> {
    let raw = std::fs::read_to_string(path)?;
    raw.trim()
        .parse()
        .map_err(|_| PlatformError::Failed(format!("Unexpected value in {}", path.display())))
}

fn percent(part: u64, whole: u64) -> f32 {
    if whole == 0 {
        0.0
    } else {
        (part as f64 / whole as f64 * 100.0) as f32
    }
}

/// Remove every entry directly under `dir`, stopping at `deadline`.
/// Entries that cannot be removed are counted as skipped.
fn sweep_dir(dir: &Path, deadline: Instant) -> Result<CleanupReport, PlatformError> {
    let mut report = CleanupReport::default();
    for entry in std::fs::read_dir(dir)? {
        if Instant::now() >= deadline {
            report.deadline_hit = true;
            break;
        }
        let Ok(entry) = entry else {
            report.items_skipped += 1;
            continue;
        };
        let path = entry.path();
        let size = entry_size(&path);
        let removed = if path.is_dir() {
            std::fs::remove_dir_all(&path)
        } else {
            std::fs::remove_file(&path)
        };
        match removed {
            Ok(()) => {
                report.items_removed += 1;
                report.bytes_freed += size;
            }
            Err(e) => {
                debug!(path = %path.display(), error = %e, "Skipped temp entry");
                report.items_skipped += 1;
            }
        }
    }
    Ok(report)
}

fn entry_size(path: &Path) -> u64 {
    let Ok(meta) = std::fs::symlink_metadata(path) else {
        return 0;
    };
    if !meta.is_dir() {
        return meta.len();
    }
    std::fs::read_dir(path)
        .map(|entries| {
            entries
                .filter_map(Result::ok)
                .map(|e| entry_size(&e.path()))
                .sum()
        })
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent() {
        assert_eq!(percent(0, 0), 0.0);
        assert_eq!(percent(50, 200), 25.0);
    }

    #[test]
    fn test_sweep_dir_removes_entries() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.tmp"), b"12345").unwrap();
        let nested = dir.path().join("cache");
        std::fs::create_dir(&nested).unwrap();
        std::fs::write(nested.join("b.tmp"), b"123").unwrap();

        let report = sweep_dir(dir.path(), Instant::now() + Duration::from_secs(10)).unwrap();
        assert_eq!(report.items_removed, 2);
        assert_eq!(report.bytes_freed, 8);
        assert!(!report.deadline_hit);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_sweep_dir_stops_at_deadline() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.tmp"), b"1").unwrap();

        let report = sweep_dir(dir.path(), Instant::now()).unwrap();
        assert!(report.deadline_hit);
        assert_eq!(report.items_removed, 0);
        assert!(dir.path().join("a.tmp").exists());
    }

    #[tokio::test]
    async fn test_list_processes_includes_self() {
        let system = NativeSystem::new();
        let own = std::process::id();
        let processes = system.list_processes().await.unwrap();
        let me = processes.iter().find(|p| p.pid == own).unwrap();
        assert!(!me.name.is_empty());
    }

    #[test]
    fn test_cpu_count_positive() {
        assert!(NativeSystem::new().cpu_count() >= 1);
    }
}
