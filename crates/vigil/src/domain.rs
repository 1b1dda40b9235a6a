//! Job domain types.
//!
//! A [`Job`] is one outstanding or recently finished remote computation.
//! Its status only ever moves forward:
//!
//! ```text
//! pending ──► processing ──► completed
//!    │             │
//!    └─────────────┴──────► failed
//! ```
//!
//! Skipping `processing` is allowed (a remote job may already be done on the
//! first probe); moving backwards or out of a terminal state is not.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use uuid::Uuid;

// ============================================================================
// JobId
// ============================================================================

/// Opaque job identifier, either echoed back by the remote service or
/// minted locally.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Mint a local id for a job whose remote start call returned none.
    ///
    /// Shape: `{kind}-{unix_millis}-{8 hex}`. The random suffix keeps ids
    /// distinct when two launches land in the same millisecond.
    pub fn local(kind: JobKind) -> Self {
        let suffix = Uuid::new_v4().simple().to_string();
        Self(format!(
            "{}-{}-{}",
            kind,
            Utc::now().timestamp_millis(),
            &suffix[..8]
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// ============================================================================
// JobKind
// ============================================================================

/// Job family. Determines which backend starts, probes and fetches it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Video,
    Research,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Video => "video",
            JobKind::Research => "research",
        }
    }
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// JobStatus
// ============================================================================

/// Local view of a job's progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    /// Position in the lifecycle; both terminal states share the top rank.
    fn rank(&self) -> u8 {
        match self {
            JobStatus::Pending => 0,
            JobStatus::Processing => 1,
            JobStatus::Completed | JobStatus::Failed => 2,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rejected status change.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("job {id} cannot move from {from} to {to}")]
pub struct InvalidTransition {
    pub id: JobId,
    pub from: JobStatus,
    pub to: JobStatus,
}

// ============================================================================
// Opaque remote values
// ============================================================================

/// Whatever the remote start call returned; handed back unchanged on every
/// probe and only ever read by the backend that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RemoteHandle(serde_json::Value);

impl RemoteHandle {
    pub fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    pub fn as_value(&self) -> &serde_json::Value {
        &self.0
    }
}

/// Raw result payload of a completed remote job, consumed by materialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RemoteResult(serde_json::Value);

impl RemoteResult {
    pub fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    pub fn as_value(&self) -> &serde_json::Value {
        &self.0
    }
}

// ============================================================================
// Job
// ============================================================================

/// One tracked remote computation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub kind: JobKind,
    pub remote_handle: RemoteHandle,
    pub started_at: DateTime<Utc>,
    pub status: JobStatus,
    pub artifact: Option<PathBuf>,
    pub error: Option<String>,
}

impl Job {
    pub fn new(id: JobId, kind: JobKind, remote_handle: RemoteHandle) -> Self {
        Self {
            id,
            kind,
            remote_handle,
            started_at: Utc::now(),
            status: JobStatus::Pending,
            artifact: None,
            error: None,
        }
    }

    /// Move to `next`. Returns `Ok(false)` when `next` is the current
    /// non-terminal status (nothing to do).
    pub fn advance(&mut self, next: JobStatus) -> Result<bool, InvalidTransition> {
        let rejected = InvalidTransition {
            id: self.id.clone(),
            from: self.status,
            to: next,
        };

        if self.status.is_terminal() {
            return Err(rejected);
        }
        if next == self.status {
            return Ok(false);
        }
        if next.rank() < self.status.rank() {
            return Err(rejected);
        }

        self.status = next;
        Ok(true)
    }

    /// Move to `failed`, recording the cause.
    pub fn fail(&mut self, error: impl Into<String>) -> Result<(), InvalidTransition> {
        self.advance(JobStatus::Failed)?;
        self.error = Some(error.into());
        Ok(())
    }

    /// Record the materialized artifact. Only the first call has effect.
    pub fn attach_artifact(&mut self, path: &Path) -> bool {
        if self.artifact.is_some() {
            return false;
        }
        self.artifact = Some(path.to_path_buf());
        true
    }

    /// Wall time since launch.
    pub fn elapsed(&self) -> Duration {
        (Utc::now() - self.started_at).to_std().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> Job {
        Job::new(
            JobId::from("job-1"),
            JobKind::Video,
            RemoteHandle::new(serde_json::json!({"name": "operations/1"})),
        )
    }

    #[test]
    fn local_ids_carry_kind_and_differ() {
        let a = JobId::local(JobKind::Research);
        let b = JobId::local(JobKind::Research);
        assert!(a.as_str().starts_with("research-"));
        assert_ne!(a, b);
    }

    #[test]
    fn forward_transitions() {
        let mut job = job();
        assert_eq!(job.advance(JobStatus::Processing), Ok(true));
        assert_eq!(job.advance(JobStatus::Processing), Ok(false));
        assert_eq!(job.advance(JobStatus::Completed), Ok(true));
        assert!(job.status.is_terminal());
    }

    #[test]
    fn pending_may_skip_to_terminal() {
        let mut job = job();
        job.fail("quota exceeded").unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some("quota exceeded"));
    }

    #[test]
    fn no_backwards_or_out_of_terminal() {
        let mut job = job();
        job.advance(JobStatus::Processing).unwrap();
        assert!(job.advance(JobStatus::Pending).is_err());

        job.advance(JobStatus::Completed).unwrap();
        let err = job.advance(JobStatus::Failed).unwrap_err();
        assert_eq!(err.from, JobStatus::Completed);
        assert_eq!(err.to, JobStatus::Failed);
        assert!(job.advance(JobStatus::Completed).is_err());
        assert_eq!(job.status, JobStatus::Completed);
    }

    #[test]
    fn artifact_is_set_once() {
        let mut job = job();
        assert!(job.attach_artifact(Path::new("/tmp/a.mp4")));
        assert!(!job.attach_artifact(Path::new("/tmp/b.mp4")));
        assert_eq!(job.artifact, Some(PathBuf::from("/tmp/a.mp4")));
    }

    #[test]
    fn status_strings() {
        assert_eq!(JobStatus::Processing.to_string(), "processing");
        assert_eq!(JobKind::Video.to_string(), "video");
        assert_eq!(
            serde_json::to_value(JobStatus::Completed).unwrap(),
            serde_json::json!("completed")
        );
    }
}
