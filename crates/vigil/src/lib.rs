//! Vigil - watches long-running remote generative jobs.
//!
//! Starts video renders and research agents on a remote service, polls them
//! to a terminal state within a local budget, and saves each produced
//! artifact exactly once. Job state lives in memory only: after a restart
//! every id reports "not found".

pub mod domain;
pub mod error;
pub mod gemini;
pub mod launcher;
pub mod manager;
pub mod materializer;
pub mod poller;
pub mod prober;
pub mod registry;
pub mod remote;
pub mod telemetry;

#[cfg(test)]
pub(crate) mod testing;

pub use domain::{Job, JobId, JobKind, JobStatus};
pub use error::{JobError, RemoteError};
pub use manager::{JobManager, JobReport, JobTicket, ReportStatus};
pub use materializer::{Materializer, OutputDir};
pub use poller::{PollProgress, PollSchedule, WaitOptions, WaitOutcome};
pub use registry::{InMemoryJobRegistry, JobRegistry};
pub use remote::{BackendSet, JobBackend, JobRequest, ResearchRequest, VideoRequest};
