//! Job Launcher
//!
//! Starts a remote job and registers it. If the remote start call fails,
//! nothing is registered and the error goes straight back to the caller.

use crate::domain::{Job, JobId};
use crate::error::JobError;
use crate::registry::JobRegistry;
use crate::remote::{JobBackend, JobRequest};

/// Start `request` on `backend` and record it in `registry` as pending.
#[tracing::instrument(
    name = "vigil.launch",
    skip(registry, backend, request),
    fields(
        job.kind = %request.kind(),
        job.id = tracing::field::Empty,
    )
)]
pub async fn launch(
    registry: &dyn JobRegistry,
    backend: &dyn JobBackend,
    request: &JobRequest,
) -> Result<Job, JobError> {
    let kind = request.kind();

    let started = backend
        .start(request)
        .await
        .map_err(|source| JobError::Launch { kind, source })?;

    let preferred = started
        .remote_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(JobId::from);

    let mut job = Job::new(
        preferred.unwrap_or_else(|| JobId::local(kind)),
        kind,
        started.handle,
    );

    // A remote id colliding with a live entry would alias two jobs; mint a
    // local id instead.
    while !registry.insert_new(job.clone()) {
        let replacement = JobId::local(kind);
        tracing::warn!(
            job.id = %job.id,
            replacement = %replacement,
            "Job id already registered, using a local id"
        );
        job.id = replacement;
    }

    tracing::Span::current().record("job.id", job.id.as_str());
    tracing::info!(job.id = %job.id, job.kind = %kind, "Job started");

    Ok(job)
}
