//! Per-coordinator table of in-flight executions.
//!
//! Every request is registered on entry and removed on its terminal
//! transition, whichever backend runs it. Entries carry the request's own
//! cancellation token, so `cancel_current` and stuck-run reaping reach the
//! engine or child process through the same path an external cancel does.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::{subprocess, BackendKind};

#[derive(Debug, Clone)]
pub struct TrackedExecution {
    pub backend: BackendKind,
    pub cancel: CancellationToken,
    pub started_at: Instant,
    pub deadline: Instant,
    pub pid: Option<u32>,
}

#[derive(Debug, Default)]
pub struct ExecutionRegistry {
    entries: Mutex<HashMap<Uuid, TrackedExecution>>,
}

impl ExecutionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, TrackedExecution>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn register(&self, id: Uuid, backend: BackendKind, cancel: CancellationToken, budget: Duration) {
        let started_at = Instant::now();
        self.lock().insert(
            id,
            TrackedExecution {
                backend,
                cancel,
                started_at,
                deadline: started_at + budget,
                pid: None,
            },
        );
    }

    /// Record the child process running `id`.
    pub fn attach_pid(&self, id: Uuid, pid: u32) {
        if let Some(entry) = self.lock().get_mut(&id) {
            entry.pid = Some(pid);
        }
    }

    /// Drop `id` from the table, returning how long it ran.
    pub fn finish(&self, id: Uuid) -> Option<Duration> {
        self.lock().remove(&id).map(|entry| entry.started_at.elapsed())
    }

    /// Cancel everything in flight. Entries stay until their runs finish.
    pub fn cancel_all(&self) -> usize {
        let entries = self.lock();
        for entry in entries.values() {
            entry.cancel.cancel();
        }
        entries.len()
    }

    /// Cancel and kill `backend` entries still running `grace` past their
    /// deadline. Returns how many were reaped.
    pub fn reap_stuck(&self, backend: BackendKind, now: Instant, grace: Duration) -> usize {
        let mut entries = self.lock();
        let stuck: Vec<Uuid> = entries
            .iter()
            .filter(|(_, entry)| entry.backend == backend && now >= entry.deadline + grace)
            .map(|(id, _)| *id)
            .collect();

        for id in &stuck {
            if let Some(entry) = entries.remove(id) {
                tracing::warn!(request_id = %id, pid = ?entry.pid, %backend, "Reaping stuck execution");
                entry.cancel.cancel();
                if let Some(pid) = entry.pid {
                    subprocess::kill_process_tree(pid);
                }
            }
        }
        stuck.len()
    }

    pub fn in_flight(&self) -> usize {
        self.lock().len()
    }

    pub fn in_flight_for(&self, backend: BackendKind) -> usize {
        self.lock().values().filter(|entry| entry.backend == backend).count()
    }

    pub fn get(&self, id: Uuid) -> Option<TrackedExecution> {
        self.lock().get(&id).cloned()
    }
}
