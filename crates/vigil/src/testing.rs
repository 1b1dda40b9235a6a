//! Scripted fakes for unit tests.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::domain::{JobKind, RemoteHandle, RemoteResult};
use crate::error::RemoteError;
use crate::poller::Clock;
use crate::remote::{FetchedArtifact, JobBackend, JobRequest, ProbeReport, StartedJob};

/// One scripted probe response.
#[derive(Debug, Clone)]
pub enum Step {
    Running,
    Done(Option<serde_json::Value>),
    Error(String),
    Transient,
}

#[derive(Debug, Clone)]
enum FetchScript {
    Bytes(Vec<u8>),
    Nothing,
    Fail,
}

/// Backend whose responses are fixed up front. Once the probe script runs
/// out, every further probe reports "not done".
pub struct ScriptedBackend {
    kind: JobKind,
    remote_ids: Mutex<VecDeque<String>>,
    fail_start: bool,
    steps: Mutex<VecDeque<Step>>,
    fetch: FetchScript,
    starts: AtomicUsize,
    probes: AtomicUsize,
    fetches: AtomicUsize,
}

impl ScriptedBackend {
    pub fn new(kind: JobKind) -> Self {
        Self {
            kind,
            remote_ids: Mutex::new(VecDeque::new()),
            fail_start: false,
            steps: Mutex::new(VecDeque::new()),
            fetch: FetchScript::Bytes(b"rendered".to_vec()),
            starts: AtomicUsize::new(0),
            probes: AtomicUsize::new(0),
            fetches: AtomicUsize::new(0),
        }
    }

    pub fn with_remote_ids<I, S>(self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        *self.remote_ids.lock().unwrap() = ids.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_steps(self, steps: impl IntoIterator<Item = Step>) -> Self {
        *self.steps.lock().unwrap() = steps.into_iter().collect();
        self
    }

    pub fn failing_start(mut self) -> Self {
        self.fail_start = true;
        self
    }

    pub fn failing_fetch(mut self) -> Self {
        self.fetch = FetchScript::Fail;
        self
    }

    pub fn fetching_nothing(mut self) -> Self {
        self.fetch = FetchScript::Nothing;
        self
    }

    pub fn start_count(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn probe_count(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl JobBackend for ScriptedBackend {
    fn kind(&self) -> JobKind {
        self.kind
    }

    async fn start(&self, request: &JobRequest) -> Result<StartedJob, RemoteError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        if self.fail_start {
            return Err(RemoteError::Api {
                status: 400,
                body: "invalid prompt".to_string(),
            });
        }

        Ok(StartedJob {
            handle: RemoteHandle::new(serde_json::json!({ "prompt": request.prompt() })),
            remote_id: self.remote_ids.lock().unwrap().pop_front(),
        })
    }

    async fn probe(&self, _handle: &RemoteHandle) -> Result<ProbeReport, RemoteError> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        let step = self.steps.lock().unwrap().pop_front().unwrap_or(Step::Running);

        match step {
            Step::Running => Ok(ProbeReport::running()),
            Step::Done(result) => Ok(ProbeReport::succeeded(result.map(RemoteResult::new))),
            Step::Error(message) => Ok(ProbeReport::failed(message)),
            Step::Transient => Err(RemoteError::Api {
                status: 503,
                body: "unavailable".to_string(),
            }),
        }
    }

    async fn fetch(&self, _result: &RemoteResult) -> Result<Option<FetchedArtifact>, RemoteError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);

        match &self.fetch {
            FetchScript::Bytes(bytes) => Ok(Some(FetchedArtifact {
                bytes: bytes.clone(),
                extension: "mp4".to_string(),
            })),
            FetchScript::Nothing => Ok(None),
            FetchScript::Fail => Err(RemoteError::Api {
                status: 404,
                body: "file expired".to_string(),
            }),
        }
    }
}

/// Clock that records every requested sleep and returns immediately.
#[derive(Default)]
pub struct RecordingClock {
    sleeps: Mutex<Vec<Duration>>,
}

impl RecordingClock {
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap().clone()
    }
}

#[async_trait]
impl Clock for RecordingClock {
    async fn sleep(&self, duration: Duration) {
        self.sleeps.lock().unwrap().push(duration);
        tokio::task::yield_now().await;
    }
}
