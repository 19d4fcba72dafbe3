//! Job registry: an injected store abstraction over any concurrent-safe
//! key-value backend.
//!
//! The lifecycle logic only ever sees [`JobStore`], so storage choice is a
//! wiring decision and tests run against the in-memory implementation
//! deterministically. [`MemoryJobStore`] is the default backend: a
//! `RwLock<HashMap>` accessed concurrently by upload handlers (create,
//! read) and workers (update). Mutation of a single job's fields is
//! confined to the one worker processing it; the store additionally
//! rejects any update that would move a status backwards, so the
//! forward-only invariant holds even against a misbehaving caller.

use crate::error::ProcmapError;
use crate::job::{Job, JobSummary};
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::warn;

/// Storage interface for the job registry.
pub trait JobStore: Send + Sync {
    /// Insert a new job. Fails on a duplicate id.
    fn create(&self, job: Job) -> Result<(), ProcmapError>;

    /// Fetch a snapshot of a job by id.
    fn get(&self, id: &str) -> Option<Job>;

    /// Replace a job by id. Fails for unknown ids and for status
    /// regressions.
    fn update(&self, job: &Job) -> Result<(), ProcmapError>;

    /// Summaries of all jobs, newest first.
    fn list(&self) -> Vec<JobSummary>;
}

/// In-memory registry keyed by job id.
#[derive(Default)]
pub struct MemoryJobStore {
    jobs: RwLock<HashMap<String, Job>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Job>> {
        match self.jobs.read() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("job store lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Job>> {
        match self.jobs.write() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("job store lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }
}

impl JobStore for MemoryJobStore {
    fn create(&self, job: Job) -> Result<(), ProcmapError> {
        let mut jobs = self.write();
        if jobs.contains_key(&job.id) {
            return Err(ProcmapError::Internal(format!(
                "duplicate job id: {}",
                job.id
            )));
        }
        jobs.insert(job.id.clone(), job);
        Ok(())
    }

    fn get(&self, id: &str) -> Option<Job> {
        self.read().get(id).cloned()
    }

    fn update(&self, job: &Job) -> Result<(), ProcmapError> {
        let mut jobs = self.write();
        let existing = jobs.get(&job.id).ok_or_else(|| ProcmapError::NotFound {
            what: format!("job {}", job.id),
        })?;

        let same = existing.status == job.status;
        if !same && !existing.status.can_advance_to(job.status) {
            return Err(ProcmapError::InvalidTransition {
                id: job.id.clone(),
                from: existing.status.as_str().into(),
                to: job.status.as_str().into(),
            });
        }

        jobs.insert(job.id.clone(), job.clone());
        Ok(())
    }

    fn list(&self) -> Vec<JobSummary> {
        let mut summaries: Vec<JobSummary> = self.read().values().map(JobSummary::from).collect();
        summaries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        summaries
    }
}
