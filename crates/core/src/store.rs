//! In-memory store of the last known [`Job`] snapshot per audit id.
//!
//! [`JobStore`] is a cheap-to-clone handle; every clone sees the same map.
//! Once a job's status is terminal its snapshot is frozen and further
//! writes are refused with [`ApplyOutcome::Frozen`].

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::job::{clamp_progress, Job};

/// Result of writing a snapshot into the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// No snapshot existed for this id.
    Inserted,
    /// The existing non-terminal snapshot was replaced.
    Updated,
    /// The existing snapshot is terminal; nothing was written.
    Frozen,
    /// Partial update for an id the store has never seen.
    Unknown,
}

#[derive(Clone, Default)]
pub struct JobStore {
    jobs: Arc<RwLock<HashMap<String, Job>>>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a placeholder for `id` unless a snapshot already exists.
    ///
    /// Returns `true` when a placeholder was inserted.
    pub fn seed(&self, id: &str) -> bool {
        let mut jobs = self.write();
        if jobs.contains_key(id) {
            return false;
        }
        jobs.insert(id.to_string(), Job::placeholder(id));
        true
    }

    /// Write a full snapshot.
    ///
    /// `created_at` is fixed by the first write for an id; later snapshots
    /// keep it so ordering in [`snapshot`](Self::snapshot) stays stable.
    pub fn apply(&self, job: Job) -> ApplyOutcome {
        let mut jobs = self.write();
        match jobs.get_mut(&job.id) {
            Some(existing) if existing.is_terminal() => {
                tracing::debug!(
                    job_id = %job.id,
                    status = %existing.status,
                    "Ignoring update for terminal job",
                );
                ApplyOutcome::Frozen
            }
            Some(existing) => {
                let created_at = existing.created_at;
                *existing = Job { created_at, ..job };
                ApplyOutcome::Updated
            }
            None => {
                jobs.insert(job.id.clone(), job);
                ApplyOutcome::Inserted
            }
        }
    }

    /// Partial update from a push progress event.
    pub fn apply_progress(&self, id: &str, progress: i64, step: Option<String>) -> ApplyOutcome {
        let mut jobs = self.write();
        let Some(existing) = jobs.get_mut(id) else {
            return ApplyOutcome::Unknown;
        };
        if existing.is_terminal() {
            return ApplyOutcome::Frozen;
        }
        existing.progress = clamp_progress(progress);
        if step.is_some() {
            existing.current_step = step;
        }
        ApplyOutcome::Updated
    }

    pub fn get(&self, id: &str) -> Option<Job> {
        self.read().get(id).cloned()
    }

    /// All known snapshots, ordered by creation time.
    pub fn snapshot(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self.read().values().cloned().collect();
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        jobs
    }

    /// Drop the snapshot for `id`. Only the owning consumer should call this.
    pub fn forget(&self, id: &str) -> Option<Job> {
        self.write().remove(id)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Job>> {
        self.jobs.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Job>> {
        self.jobs.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
