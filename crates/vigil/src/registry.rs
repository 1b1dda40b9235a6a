//! Job Registry
//!
//! In-memory store of outstanding jobs keyed by id. The registry is the sole
//! owner of each job's remote handle while the job is outstanding; terminal
//! jobs are taken out of it the moment they are first observed.
//!
//! Nothing here is persisted. A fresh process starts with an empty registry,
//! so every id from a previous run probes as not found.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;

use crate::domain::{Job, JobId, JobStatus};

/// Counts for diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryStats {
    pub total: usize,
    pub pending: usize,
    pub processing: usize,
}

/// Registry trait for pluggable storage backends.
///
/// No method fails: an unknown id is always an explicit `None`.
pub trait JobRegistry: Send + Sync {
    /// Insert or replace a job.
    fn put(&self, job: Job);

    /// Insert only if no job with this id exists. Returns whether it was inserted.
    fn insert_new(&self, job: Job) -> bool;

    /// Snapshot of a job.
    fn get(&self, id: &JobId) -> Option<Job>;

    /// Take a job out of the registry. When several callers race on the same
    /// id, exactly one of them gets `Some`.
    fn remove(&self, id: &JobId) -> Option<Job>;

    /// Move a job forward in place and return the updated snapshot.
    /// Returns `None` if the id is unknown; an illegal transition leaves the
    /// entry unchanged.
    fn advance(&self, id: &JobId, status: JobStatus) -> Option<Job>;

    /// All outstanding jobs, in no particular order.
    fn list(&self) -> Vec<Job>;

    fn stats(&self) -> RegistryStats;
}

/// In-memory registry using DashMap.
#[derive(Debug, Default)]
pub struct InMemoryJobRegistry {
    jobs: DashMap<String, Job>,
}

impl InMemoryJobRegistry {
    pub fn new() -> Self {
        Self {
            jobs: DashMap::new(),
        }
    }

    /// Create a new registry wrapped in Arc for sharing.
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

impl JobRegistry for InMemoryJobRegistry {
    fn put(&self, job: Job) {
        self.jobs.insert(job.id.as_str().to_string(), job);
    }

    fn insert_new(&self, job: Job) -> bool {
        match self.jobs.entry(job.id.as_str().to_string()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(job);
                true
            }
        }
    }

    fn get(&self, id: &JobId) -> Option<Job> {
        self.jobs.get(id.as_str()).map(|job| job.clone())
    }

    fn remove(&self, id: &JobId) -> Option<Job> {
        self.jobs.remove(id.as_str()).map(|(_, job)| job)
    }

    fn advance(&self, id: &JobId, status: JobStatus) -> Option<Job> {
        let mut job = self.jobs.get_mut(id.as_str())?;
        if let Err(e) = job.advance(status) {
            tracing::warn!(job.id = %id, error = %e, "Ignoring status regression");
        }
        Some(job.clone())
    }

    fn list(&self) -> Vec<Job> {
        self.jobs.iter().map(|entry| entry.value().clone()).collect()
    }

    fn stats(&self) -> RegistryStats {
        let mut stats = RegistryStats::default();

        for entry in self.jobs.iter() {
            stats.total += 1;
            match entry.value().status {
                JobStatus::Pending => stats.pending += 1,
                JobStatus::Processing => stats.processing += 1,
                // Terminal jobs never stay in the registry.
                JobStatus::Completed | JobStatus::Failed => {}
            }
        }

        stats
    }
}
