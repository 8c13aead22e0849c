//! Pre-action system snapshots.
//!
//! Snapshots live in memory only. The store is bounded: inserting past
//! capacity evicts the oldest snapshot that is not pinned by an in-flight
//! dispatch.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::PlatformError;
use crate::platform::{PowerPlan, ProcessInfo, SystemControl};

/// Point-in-time capture of the state an action may change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub snapshot_id: Uuid,
    pub action_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub processes: Vec<ProcessInfo>,
    pub system_state: serde_json::Map<String, Value>,
    /// False when capture failed; automatic rollback is skipped.
    pub can_restore: bool,
}

impl Snapshot {
    /// Active power plan at capture time, if it was readable.
    pub fn power_plan(&self) -> Option<PowerPlan> {
        self.system_state
            .get("power_plan")
            .and_then(Value::as_str)
            .and_then(|s| s.parse().ok())
    }

    /// Display brightness at capture time, if it was readable.
    pub fn brightness(&self) -> Option<u8> {
        self.system_state
            .get("brightness")
            .and_then(Value::as_u64)
            .and_then(|b| u8::try_from(b).ok())
    }

    /// Captured processes named `name`, case-insensitively.
    pub fn processes_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a ProcessInfo> {
        self.processes
            .iter()
            .filter(move |p| p.name.eq_ignore_ascii_case(name.trim()))
    }
}

struct Entry {
    snapshot: Arc<Snapshot>,
    pinned: bool,
}

#[derive(Default)]
struct StoreInner {
    entries: HashMap<Uuid, Entry>,
    /// Insertion order, oldest first.
    order: VecDeque<Uuid>,
}

/// Bounded in-memory snapshot table keyed by `snapshot_id`.
pub struct SnapshotStore {
    inner: Mutex<StoreInner>,
    capacity: usize,
    process_limit: usize,
}

impl SnapshotStore {
    pub fn new(capacity: usize, process_limit: usize) -> Self {
        Self {
            inner: Mutex::new(StoreInner::default()),
            capacity: capacity.max(1),
            process_limit,
        }
    }

    /// Capture current state for `action_id` and store it pinned.
    ///
    /// Processes named `target` are kept first when the process list is
    /// truncated. Every system read is bounded by `deadline`. If the process
    /// list or metrics cannot be read, or any read runs past the deadline,
    /// the snapshot is stored with `can_restore = false`.
    pub async fn capture(
        &self,
        action_id: Uuid,
        target: &str,
        system: &dyn SystemControl,
        deadline: Instant,
    ) -> Arc<Snapshot> {
        let snapshot_id = Uuid::new_v4();
        let mut can_restore = true;

        let processes = match within(deadline, "process list", system.list_processes()).await {
            Ok(mut processes) => {
                let target = target.trim().to_lowercase();
                processes.sort_by(|a, b| {
                    let a_hit = a.name.to_lowercase() == target;
                    let b_hit = b.name.to_lowercase() == target;
                    b_hit.cmp(&a_hit).then(
                        b.memory_percent
                            .partial_cmp(&a.memory_percent)
                            .unwrap_or(std::cmp::Ordering::Equal),
                    )
                });
                processes.truncate(self.process_limit);
                processes
            }
            Err(e) => {
                warn!(action_id = %action_id, error = %e, "Snapshot process capture failed");
                can_restore = false;
                Vec::new()
            }
        };

        let mut system_state = serde_json::Map::new();
        match within(deadline, "metrics", system.metrics()).await {
            Ok(m) => {
                system_state.insert("cpu_percent".into(), json!(m.cpu_percent));
                system_state.insert("cpu_count".into(), json!(m.cpu_count));
                system_state.insert("memory_percent".into(), json!(m.memory_percent));
                system_state.insert(
                    "memory_used_gb".into(),
                    json!(m.memory_used_bytes as f64 / 1024f64.powi(3)),
                );
                system_state.insert("disk_percent".into(), json!(m.disk_percent));
            }
            Err(e) => {
                warn!(action_id = %action_id, error = %e, "Snapshot metrics capture failed");
                can_restore = false;
            }
        }

        // Platform state is optional; absence only limits what can be
        // restored. A stalled read still marks the snapshot unusable.
        match within(deadline, "power plan", system.power_plan()).await {
            Ok(Some(plan)) => {
                system_state.insert("power_plan".into(), json!(plan.to_string()));
            }
            Err(e @ PlatformError::TimedOut(_)) => {
                warn!(action_id = %action_id, error = %e, "Snapshot power plan capture failed");
                can_restore = false;
            }
            _ => {}
        }
        match within(deadline, "brightness", system.brightness()).await {
            Ok(Some(level)) => {
                system_state.insert("brightness".into(), json!(level));
            }
            Err(e @ PlatformError::TimedOut(_)) => {
                warn!(action_id = %action_id, error = %e, "Snapshot brightness capture failed");
                can_restore = false;
            }
            _ => {}
        }

        let snapshot = Snapshot {
            snapshot_id,
            action_id,
            timestamp: Utc::now(),
            processes,
            system_state,
            can_restore,
        };
        info!(
            snapshot_id = %snapshot_id,
            action_id = %action_id,
            processes = snapshot.processes.len(),
            can_restore,
            "Snapshot captured"
        );
        self.insert(snapshot, true)
    }

    /// Store a snapshot, evicting the oldest unpinned ones past capacity.
    pub fn insert(&self, snapshot: Snapshot, pinned: bool) -> Arc<Snapshot> {
        let snapshot = Arc::new(snapshot);
        let id = snapshot.snapshot_id;
        let mut inner = self.lock();
        if inner
            .entries
            .insert(
                id,
                Entry {
                    snapshot: Arc::clone(&snapshot),
                    pinned,
                },
            )
            .is_none()
        {
            inner.order.push_back(id);
        }
        self.evict_over_capacity(&mut inner);
        snapshot
    }

    pub fn get(&self, snapshot_id: Uuid) -> Option<Arc<Snapshot>> {
        self.lock()
            .entries
            .get(&snapshot_id)
            .map(|e| Arc::clone(&e.snapshot))
    }

    pub fn contains(&self, snapshot_id: Uuid) -> bool {
        self.lock().entries.contains_key(&snapshot_id)
    }

    /// Make a snapshot eligible for capacity eviction.
    pub fn unpin(&self, snapshot_id: Uuid) {
        let mut inner = self.lock();
        if let Some(entry) = inner.entries.get_mut(&snapshot_id) {
            entry.pinned = false;
        }
        self.evict_over_capacity(&mut inner);
    }

    pub fn remove(&self, snapshot_id: Uuid) -> bool {
        let mut inner = self.lock();
        let removed = inner.entries.remove(&snapshot_id).is_some();
        if removed {
            inner.order.retain(|id| *id != snapshot_id);
            debug!(snapshot_id = %snapshot_id, "Snapshot removed");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StoreInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn evict_over_capacity(&self, inner: &mut StoreInner) {
        while inner.entries.len() > self.capacity {
            let victim = inner
                .order
                .iter()
                .position(|id| inner.entries.get(id).is_some_and(|e| !e.pinned));
            let Some(pos) = victim else {
                warn!(
                    held = inner.entries.len(),
                    capacity = self.capacity,
                    "All snapshots pinned, store over capacity"
                );
                return;
            };
            if let Some(id) = inner.order.remove(pos) {
                inner.entries.remove(&id);
                debug!(snapshot_id = %id, "Snapshot evicted");
            }
        }
    }
}

async fn within<T>(
    deadline: Instant,
    what: &'static str,
    fut: impl Future<Output = Result<T, PlatformError>>,
) -> Result<T, PlatformError> {
    tokio::time::timeout_at(deadline, fut)
        .await
        .unwrap_or_else(|_| Err(PlatformError::TimedOut(what)))
}
