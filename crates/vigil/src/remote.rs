//! Contract between the job core and a remote generative service.
//!
//! One [`JobBackend`] exists per [`JobKind`]. The core never looks inside
//! [`RemoteHandle`] or [`RemoteResult`]; only the backend that produced them
//! does.

use async_trait::async_trait;

use crate::domain::{JobKind, RemoteHandle, RemoteResult};
use crate::error::RemoteError;

/// Parameters for a video render.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VideoRequest {
    pub prompt: String,
    /// e.g. "16:9" or "9:16"
    pub aspect_ratio: Option<String>,
    /// e.g. "720p" or "1080p"
    pub resolution: Option<String>,
    pub negative_prompt: Option<String>,
    pub duration_seconds: Option<u32>,
}

/// Parameters for a research agent run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResearchRequest {
    pub prompt: String,
    /// Free-form instructions for the shape of the final report.
    pub format: Option<String>,
}

/// Kind-specific launch parameters.
#[derive(Debug, Clone, PartialEq)]
pub enum JobRequest {
    Video(VideoRequest),
    Research(ResearchRequest),
}

impl JobRequest {
    pub fn kind(&self) -> JobKind {
        match self {
            JobRequest::Video(_) => JobKind::Video,
            JobRequest::Research(_) => JobKind::Research,
        }
    }

    pub fn prompt(&self) -> &str {
        match self {
            JobRequest::Video(r) => &r.prompt,
            JobRequest::Research(r) => &r.prompt,
        }
    }
}

/// What the remote start call handed back.
#[derive(Debug, Clone)]
pub struct StartedJob {
    pub handle: RemoteHandle,
    /// Id assigned by the remote service, if it returned one.
    pub remote_id: Option<String>,
}

/// One probe's view of the remote job.
#[derive(Debug, Clone, Default)]
pub struct ProbeReport {
    pub done: bool,
    pub error: Option<String>,
    pub result: Option<RemoteResult>,
}

impl ProbeReport {
    pub fn running() -> Self {
        Self::default()
    }

    pub fn succeeded(result: Option<RemoteResult>) -> Self {
        Self {
            done: true,
            error: None,
            result,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            done: true,
            error: Some(error.into()),
            result: None,
        }
    }
}

/// Bytes of a produced artifact plus the file extension to save them under.
#[derive(Debug, Clone)]
pub struct FetchedArtifact {
    pub bytes: Vec<u8>,
    pub extension: String,
}

/// Remote operations for one job kind.
///
/// Every method is a suspension point; all may fail transiently.
#[async_trait]
pub trait JobBackend: Send + Sync {
    /// The job kind this backend serves.
    fn kind(&self) -> JobKind;

    /// Start a remote job.
    async fn start(&self, request: &JobRequest) -> Result<StartedJob, RemoteError>;

    /// Ask the remote service how the job is doing.
    async fn probe(&self, handle: &RemoteHandle) -> Result<ProbeReport, RemoteError>;

    /// Retrieve the produced artifact. `Ok(None)` means the result carries
    /// nothing to save.
    async fn fetch(&self, result: &RemoteResult) -> Result<Option<FetchedArtifact>, RemoteError>;
}

/// Backends indexed by the job kind they serve.
#[derive(Clone, Default)]
pub struct BackendSet {
    backends: std::collections::HashMap<JobKind, std::sync::Arc<dyn JobBackend>>,
}

impl BackendSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a backend under its own kind, replacing any previous one.
    pub fn with(mut self, backend: std::sync::Arc<dyn JobBackend>) -> Self {
        self.backends.insert(backend.kind(), backend);
        self
    }

    pub fn get(&self, kind: JobKind) -> Option<&dyn JobBackend> {
        self.backends.get(&kind).map(|b| b.as_ref())
    }
}
