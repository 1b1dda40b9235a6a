//! JobManager - the operations callers use.
//!
//! Composes the registry, per-kind backends, the materializer and a clock.
//! Each operation is a thin step over the launcher / prober / poller; the
//! manager's own job is turning their outcomes into [`JobReport`]s.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::domain::{Job, JobId, JobKind, JobStatus};
use crate::error::JobError;
use crate::launcher;
use crate::materializer::Materializer;
use crate::poller::{self, Clock, TokioClock, WaitOptions, WaitOutcome};
use crate::prober::{self, ProbeOutcome};
use crate::registry::{JobRegistry, RegistryStats};
use crate::remote::{BackendSet, JobRequest};

/// Returned by [`JobManager::start_job`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobTicket {
    pub id: JobId,
    pub kind: JobKind,
    pub status: JobStatus,
}

/// Status as seen by a caller. Adds `NotFound` to the job states: the id
/// was never launched here, was already reported terminal, or was lost to a
/// restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    NotFound,
}

impl ReportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportStatus::Pending => "pending",
            ReportStatus::Processing => "processing",
            ReportStatus::Completed => "completed",
            ReportStatus::Failed => "failed",
            ReportStatus::NotFound => "not_found",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ReportStatus::Pending | ReportStatus::Processing)
    }
}

impl std::fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<JobStatus> for ReportStatus {
    fn from(status: JobStatus) -> Self {
        match status {
            JobStatus::Pending => ReportStatus::Pending,
            JobStatus::Processing => ReportStatus::Processing,
            JobStatus::Completed => ReportStatus::Completed,
            JobStatus::Failed => ReportStatus::Failed,
        }
    }
}

pub const NOT_FOUND_MESSAGE: &str =
    "operation not found; it may have expired or the process was restarted";

/// Result of one [`JobManager::check_job`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobReport {
    pub id: JobId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<JobKind>,
    pub status: ReportStatus,
    /// Local path of the saved artifact (completed jobs only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Set when a completed job could not be materialized.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
    #[serde(skip)]
    pub elapsed: Option<Duration>,
}

impl JobReport {
    pub fn not_found(id: JobId) -> Self {
        Self {
            id,
            kind: None,
            status: ReportStatus::NotFound,
            artifact: None,
            error: Some(NOT_FOUND_MESSAGE.to_string()),
            warning: None,
            elapsed: None,
        }
    }

    fn from_job(job: &Job) -> Self {
        Self {
            id: job.id.clone(),
            kind: Some(job.kind),
            status: job.status.into(),
            artifact: job.artifact.clone(),
            error: job.error.clone(),
            warning: None,
            elapsed: Some(job.elapsed()),
        }
    }
}

pub struct JobManager {
    registry: Arc<dyn JobRegistry>,
    backends: BackendSet,
    materializer: Materializer,
    clock: Arc<dyn Clock>,
}

impl JobManager {
    pub fn new(
        registry: Arc<dyn JobRegistry>,
        backends: BackendSet,
        materializer: Materializer,
    ) -> Self {
        Self {
            registry,
            backends,
            materializer,
            clock: Arc::new(TokioClock),
        }
    }

    /// Replace the clock used between polling ticks.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn registry(&self) -> &Arc<dyn JobRegistry> {
        &self.registry
    }

    /// Launch a job. Nothing is registered if the remote start fails.
    #[tracing::instrument(name = "vigil.start_job", skip(self, request), fields(job.kind = %request.kind()))]
    pub async fn start_job(&self, request: JobRequest) -> Result<JobTicket, JobError> {
        let kind = request.kind();
        let backend = self.backends.get(kind).ok_or(JobError::NoBackend(kind))?;

        let job = launcher::launch(self.registry.as_ref(), backend, &request).await?;

        Ok(JobTicket {
            id: job.id,
            kind: job.kind,
            status: job.status,
        })
    }

    /// Probe a job once. A completed job is materialized before this
    /// returns; a failed download shows up as `warning`.
    ///
    /// Only a transient probe failure (or a missing backend) is an `Err`.
    #[tracing::instrument(
        name = "vigil.check_job",
        skip(self, id),
        fields(job.id = %id, job.status = tracing::field::Empty)
    )]
    pub async fn check_job(&self, id: &JobId) -> Result<JobReport, JobError> {
        let outcome = prober::probe(self.registry.as_ref(), &self.backends, id).await?;

        let report = match outcome {
            ProbeOutcome::NotFound => JobReport::not_found(id.clone()),
            ProbeOutcome::Processing(job) | ProbeOutcome::Failed(job) => JobReport::from_job(&job),
            ProbeOutcome::Completed { mut job, result } => {
                let backend = self
                    .backends
                    .get(job.kind)
                    .ok_or(JobError::NoBackend(job.kind))?;
                let materialized = self
                    .materializer
                    .materialize(backend, &mut job, result.as_ref())
                    .await;

                let mut report = JobReport::from_job(&job);
                report.warning = materialized.warning();
                report
            }
        };

        tracing::Span::current().record("job.status", report.status.as_str());
        Ok(report)
    }

    /// Poll until the job is terminal, the schedule runs out, or
    /// `options.cancel` fires.
    pub async fn wait_for_job(
        &self,
        id: &JobId,
        options: WaitOptions,
    ) -> Result<WaitOutcome, JobError> {
        poller::poll_until_terminal(id, self.clock.as_ref(), &options, || self.check_job(id)).await
    }

    /// Jobs still in flight (terminal jobs leave the registry).
    pub fn list_jobs(&self) -> Vec<Job> {
        self.registry.list()
    }

    pub fn stats(&self) -> RegistryStats {
        self.registry.stats()
    }
}
