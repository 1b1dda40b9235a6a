//! Error types.
//!
//! Only launch failures and transient probe failures are errors. A job that
//! the remote service reports as failed, an unknown id, a local timeout and
//! a failed artifact download are all *outcomes* and travel in
//! [`crate::manager::JobReport`] / [`crate::poller::WaitOutcome`].

use crate::domain::{JobId, JobKind};

/// Errors from talking to the remote service.
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    /// The HTTP request itself failed (network, DNS, TLS, timeout).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The service returned a non-2xx status code.
    #[error("remote API error ({status}): {body}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },

    /// The response parsed but did not have the expected shape.
    #[error("unexpected response: {0}")]
    Malformed(String),

    /// An inline base64 payload could not be decoded.
    #[error("failed to decode inline payload: {0}")]
    Decode(#[from] base64::DecodeError),
}

/// Errors surfaced by [`crate::manager::JobManager`].
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    /// The remote start call failed. No job exists and nothing was registered.
    #[error("failed to launch {kind} job: {source}")]
    Launch {
        kind: JobKind,
        #[source]
        source: RemoteError,
    },

    /// The remote probe call failed. The registry entry is untouched and the
    /// job can be probed again.
    #[error("probe for job {id} failed, will retry: {source}")]
    TransientPoll {
        id: JobId,
        #[source]
        source: RemoteError,
    },

    #[error("no backend registered for {0} jobs")]
    NoBackend(JobKind),
}
