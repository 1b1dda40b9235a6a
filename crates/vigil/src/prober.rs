//! Status Prober
//!
//! Queries the remote state of one job and folds it into the registry.
//!
//! Terminal jobs are *taken* out of the registry (an atomic remove) before
//! anything else happens. Whoever wins that remove is the only caller that
//! sees the terminal state, which is what keeps materialization to at most
//! once per id. Everyone else, now and later, gets [`ProbeOutcome::NotFound`].

use crate::domain::{Job, JobId, JobStatus, RemoteResult};
use crate::error::JobError;
use crate::registry::JobRegistry;
use crate::remote::BackendSet;

/// Normalized result of one probe.
#[derive(Debug, Clone)]
pub enum ProbeOutcome {
    /// Still running remotely. Carries the updated registry snapshot.
    Processing(Job),
    /// Remote reported success. The job has left the registry; `result` is
    /// the raw payload to materialize (absent if the remote sent none).
    Completed { job: Job, result: Option<RemoteResult> },
    /// Remote reported failure or cancellation; `job.error` holds the cause.
    Failed(Job),
    /// Unknown id: never launched here, already reported terminal, or lost
    /// to a process restart. These cases are indistinguishable.
    NotFound,
}

impl ProbeOutcome {
    pub fn status(&self) -> Option<JobStatus> {
        match self {
            ProbeOutcome::Processing(job) => Some(job.status),
            ProbeOutcome::Completed { .. } => Some(JobStatus::Completed),
            ProbeOutcome::Failed(_) => Some(JobStatus::Failed),
            ProbeOutcome::NotFound => None,
        }
    }
}

/// Probe job `id` once.
///
/// Returns `Err(JobError::TransientPoll)` if the remote call itself failed;
/// in that case the registry has not been touched.
#[tracing::instrument(
    name = "vigil.probe",
    skip(registry, backends, id),
    fields(
        job.id = %id,
        job.status = tracing::field::Empty,
    )
)]
pub async fn probe(
    registry: &dyn JobRegistry,
    backends: &BackendSet,
    id: &JobId,
) -> Result<ProbeOutcome, JobError> {
    let Some(job) = registry.get(id) else {
        tracing::debug!("Job not in registry");
        return Ok(ProbeOutcome::NotFound);
    };

    let backend = backends
        .get(job.kind)
        .ok_or(JobError::NoBackend(job.kind))?;

    let report = backend
        .probe(&job.remote_handle)
        .await
        .map_err(|source| JobError::TransientPoll {
            id: id.clone(),
            source,
        })?;

    let outcome = if !report.done {
        match registry.advance(id, JobStatus::Processing) {
            Some(updated) => ProbeOutcome::Processing(updated),
            // Another prober finished it while we were waiting on the network.
            None => ProbeOutcome::NotFound,
        }
    } else if let Some(error) = report.error {
        match registry.remove(id) {
            Some(mut taken) => {
                let error = if error.trim().is_empty() {
                    "remote job failed without an error message".to_string()
                } else {
                    error
                };
                if let Err(e) = taken.fail(error) {
                    tracing::warn!(error = %e, "Unexpected terminal transition");
                }
                tracing::error!(
                    job.kind = %taken.kind,
                    job.duration_secs = taken.elapsed().as_secs(),
                    job.error = taken.error.as_deref().unwrap_or_default(),
                    "Job failed"
                );
                ProbeOutcome::Failed(taken)
            }
            None => ProbeOutcome::NotFound,
        }
    } else {
        match registry.remove(id) {
            Some(mut taken) => {
                if let Err(e) = taken.advance(JobStatus::Completed) {
                    tracing::warn!(error = %e, "Unexpected terminal transition");
                }
                tracing::info!(
                    job.kind = %taken.kind,
                    job.duration_secs = taken.elapsed().as_secs(),
                    has_result = report.result.is_some(),
                    "Job completed"
                );
                ProbeOutcome::Completed {
                    job: taken,
                    result: report.result,
                }
            }
            None => ProbeOutcome::NotFound,
        }
    };

    if let Some(status) = outcome.status() {
        tracing::Span::current().record("job.status", status.as_str());
    }

    Ok(outcome)
}
