//! Polling Loop
//!
//! Caller-side driver that re-checks one job at a fixed interval until it
//! reaches a terminal state, the attempt budget runs out, or the caller
//! cancels. Cancelling only stops *local* polling; the remote job keeps
//! running and can be checked again later.

use std::future::Future;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::domain::JobId;
use crate::error::JobError;
use crate::manager::{JobReport, ReportStatus};

/// Progress never reaches this far; only a terminal report means done.
pub const PROGRESS_CEILING: u8 = 95;

/// Source of delays between ticks. Swapped out in tests so no wall-clock
/// time passes.
#[async_trait]
pub trait Clock: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// [`Clock`] backed by `tokio::time`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// How often, and how many times, to probe before giving up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSchedule {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl PollSchedule {
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts,
        }
    }

    /// Upper bound on wall time spent sleeping.
    pub fn budget(&self) -> Duration {
        self.interval * self.max_attempts
    }
}

impl From<&vigilconf::PollBudget> for PollSchedule {
    fn from(budget: &vigilconf::PollBudget) -> Self {
        Self::new(budget.interval(), budget.max_attempts)
    }
}

/// Synthetic progress for a job that is still running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollProgress {
    pub id: JobId,
    pub attempt: u32,
    pub max_attempts: u32,
    /// Estimate derived from the attempt count alone. Not a real fraction of
    /// work done; the remote service exposes none.
    pub percent: u8,
    pub status: ReportStatus,
    pub elapsed: Duration,
}

/// `95 × attempt / max_attempts`, but never less than one point per attempt,
/// so every tick moves the estimate until it hits the ceiling.
pub fn synthetic_percent(attempt: u32, max_attempts: u32) -> u8 {
    if max_attempts == 0 {
        return 0;
    }
    let attempt = u64::from(attempt.min(max_attempts));
    let ceiling = u64::from(PROGRESS_CEILING);
    let linear = ceiling * attempt / u64::from(max_attempts);
    linear.max(attempt).min(ceiling) as u8
}

/// Caller knobs for one wait.
#[derive(Debug, Clone)]
pub struct WaitOptions {
    pub schedule: PollSchedule,
    /// Cancelling stops local polling at the next tick boundary or mid-sleep.
    pub cancel: CancellationToken,
    pub progress: Option<mpsc::UnboundedSender<PollProgress>>,
}

impl WaitOptions {
    pub fn new(schedule: PollSchedule) -> Self {
        Self {
            schedule,
            cancel: CancellationToken::new(),
            progress: None,
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_progress(mut self, progress: mpsc::UnboundedSender<PollProgress>) -> Self {
        self.progress = Some(progress);
        self
    }
}

/// How a wait ended. Every variant renders to a different message.
#[derive(Debug, Clone)]
pub enum WaitOutcome {
    Completed { report: JobReport },
    Failed { report: JobReport },
    NotFound,
    /// Budget exhausted. The job is still registered and can be waited on
    /// again.
    TimedOut { attempts: u32 },
    /// Caller cancelled. Nothing was sent to the remote service.
    Cancelled { attempts: u32 },
}

impl WaitOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, WaitOutcome::Completed { .. })
    }

    pub fn message(&self) -> String {
        match self {
            WaitOutcome::Completed { report } => match (&report.artifact, &report.warning) {
                (Some(path), _) => format!("completed: saved to {}", path.display()),
                (None, Some(warning)) => format!("completed without artifact: {}", warning),
                (None, None) => "completed without artifact".to_string(),
            },
            WaitOutcome::Failed { report } => format!(
                "failed: {}",
                report.error.as_deref().unwrap_or("unknown error")
            ),
            WaitOutcome::NotFound => {
                "not found: it may have expired or the process was restarted".to_string()
            }
            WaitOutcome::TimedOut { attempts } => format!(
                "timed out after {} attempts; the remote job may still finish, check it again later",
                attempts
            ),
            WaitOutcome::Cancelled { attempts } => format!(
                "stopped polling after {} attempts; the remote job was not cancelled",
                attempts
            ),
        }
    }
}

/// Drive `check` until a terminal report.
///
/// Transient probe failures are logged and count as an ordinary tick. Any
/// other error ends the wait.
#[tracing::instrument(
    name = "vigil.wait",
    skip(id, clock, options, check),
    fields(
        job.id = %id,
        poll.interval_ms = options.schedule.interval.as_millis() as u64,
        poll.max_attempts = options.schedule.max_attempts,
        poll.attempts = tracing::field::Empty,
        poll.outcome = tracing::field::Empty,
    )
)]
pub async fn poll_until_terminal<F, Fut>(
    id: &JobId,
    clock: &dyn Clock,
    options: &WaitOptions,
    mut check: F,
) -> Result<WaitOutcome, JobError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<JobReport, JobError>>,
{
    let started = Instant::now();
    let schedule = options.schedule;
    let mut attempt = 0;

    let outcome = loop {
        if options.cancel.is_cancelled() {
            break WaitOutcome::Cancelled { attempts: attempt };
        }
        if attempt >= schedule.max_attempts {
            break WaitOutcome::TimedOut { attempts: attempt };
        }

        tokio::select! {
            biased;
            _ = options.cancel.cancelled() => {
                break WaitOutcome::Cancelled { attempts: attempt };
            }
            _ = clock.sleep(schedule.interval) => {}
        }

        attempt += 1;

        let report = match check().await {
            Ok(report) => report,
            Err(JobError::TransientPoll { source, .. }) => {
                tracing::warn!(poll.attempt = attempt, error = %source, "Transient probe failure");
                continue;
            }
            Err(e) => return Err(e),
        };

        match report.status {
            ReportStatus::Completed => break WaitOutcome::Completed { report },
            ReportStatus::Failed => break WaitOutcome::Failed { report },
            ReportStatus::NotFound => break WaitOutcome::NotFound,
            ReportStatus::Pending | ReportStatus::Processing => {
                let progress = PollProgress {
                    id: id.clone(),
                    attempt,
                    max_attempts: schedule.max_attempts,
                    percent: synthetic_percent(attempt, schedule.max_attempts),
                    status: report.status,
                    elapsed: started.elapsed(),
                };
                tracing::debug!(
                    poll.attempt = attempt,
                    poll.percent = progress.percent,
                    job.status = %report.status,
                    "Still running"
                );
                if let Some(tx) = &options.progress {
                    // Receiver gone just means nobody is watching.
                    let _ = tx.send(progress);
                }
            }
        }
    };

    let span = tracing::Span::current();
    span.record("poll.attempts", attempt);
    span.record("poll.outcome", outcome_name(&outcome));

    Ok(outcome)
}

fn outcome_name(outcome: &WaitOutcome) -> &'static str {
    match outcome {
        WaitOutcome::Completed { .. } => "completed",
        WaitOutcome::Failed { .. } => "failed",
        WaitOutcome::NotFound => "not_found",
        WaitOutcome::TimedOut { .. } => "timed_out",
        WaitOutcome::Cancelled { .. } => "cancelled",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RemoteError;
    use crate::testing::RecordingClock;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    fn report(status: ReportStatus) -> JobReport {
        JobReport {
            id: JobId::from("job-1"),
            kind: None,
            status,
            artifact: None,
            error: None,
            warning: None,
            elapsed: None,
        }
    }

    fn transient() -> JobError {
        JobError::TransientPoll {
            id: JobId::from("job-1"),
            source: RemoteError::Api {
                status: 503,
                body: "unavailable".to_string(),
            },
        }
    }

    /// Closure-friendly script of check results; runs `Processing` once empty.
    struct Script(Mutex<VecDeque<Result<JobReport, JobError>>>, Mutex<u32>);

    impl Script {
        fn new(items: Vec<Result<JobReport, JobError>>) -> Self {
            Self(Mutex::new(items.into()), Mutex::new(0))
        }

        async fn next(&self) -> Result<JobReport, JobError> {
            *self.1.lock().unwrap() += 1;
            self.0
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(report(ReportStatus::Processing)))
        }

        fn calls(&self) -> u32 {
            *self.1.lock().unwrap()
        }
    }

    fn options(max_attempts: u32) -> WaitOptions {
        WaitOptions::new(PollSchedule::new(Duration::from_secs(10), max_attempts))
    }

    #[test]
    fn percent_is_monotonic_and_capped() {
        let values: Vec<u8> = (0..=60).map(|a| synthetic_percent(a, 60)).collect();
        assert!(values.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(values[60], PROGRESS_CEILING);
        assert!(values.iter().all(|&p| p < 100));
        assert_eq!(synthetic_percent(500, 60), PROGRESS_CEILING);
        assert_eq!(synthetic_percent(1, 0), 0);
    }

    #[test]
    fn percent_keeps_rising_under_long_research_budget() {
        let values: Vec<u8> = (1..=180).map(|a| synthetic_percent(a, 180)).collect();

        let below_ceiling: Vec<u8> = values
            .iter()
            .copied()
            .take_while(|&p| p < PROGRESS_CEILING)
            .collect();
        assert_eq!(&values[..6], &[1, 2, 3, 4, 5, 6]);
        assert!(below_ceiling.windows(2).all(|w| w[0] < w[1]));
        assert!(values.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(values[179], PROGRESS_CEILING);
    }

    #[test]
    fn schedule_from_budget() {
        let schedule = PollSchedule::from(&vigilconf::PollBudget::new(30, 180));
        assert_eq!(schedule.interval, Duration::from_secs(30));
        assert_eq!(schedule.max_attempts, 180);
        assert_eq!(schedule.budget(), Duration::from_secs(90 * 60));
    }

    #[tokio::test]
    async fn sleeps_before_every_probe() {
        let clock = RecordingClock::default();
        let script = Script::new(vec![
            Ok(report(ReportStatus::Processing)),
            Ok(report(ReportStatus::Completed)),
        ]);

        let outcome = poll_until_terminal(&JobId::from("job-1"), &clock, &options(5), || {
            script.next()
        })
        .await
        .unwrap();

        assert!(outcome.is_success());
        assert_eq!(script.calls(), 2);
        assert_eq!(clock.sleeps(), vec![Duration::from_secs(10); 2]);
    }

    #[tokio::test]
    async fn times_out_after_max_attempts() {
        let clock = RecordingClock::default();
        let script = Script::new(vec![]);

        let outcome = poll_until_terminal(&JobId::from("job-1"), &clock, &options(3), || {
            script.next()
        })
        .await
        .unwrap();

        assert!(matches!(outcome, WaitOutcome::TimedOut { attempts: 3 }));
        assert_eq!(script.calls(), 3);
    }

    #[tokio::test]
    async fn transient_errors_consume_ticks() {
        let clock = RecordingClock::default();
        let script = Script::new(vec![Err(transient()), Err(transient()), Err(transient())]);

        let outcome = poll_until_terminal(&JobId::from("job-1"), &clock, &options(3), || {
            script.next()
        })
        .await
        .unwrap();

        assert!(matches!(outcome, WaitOutcome::TimedOut { attempts: 3 }));
        assert_eq!(script.calls(), 3);
    }

    #[tokio::test]
    async fn transient_error_then_completion() {
        let clock = RecordingClock::default();
        let script = Script::new(vec![Err(transient()), Ok(report(ReportStatus::Completed))]);

        let outcome = poll_until_terminal(&JobId::from("job-1"), &clock, &options(3), || {
            script.next()
        })
        .await
        .unwrap();

        assert!(outcome.is_success());
    }

    #[tokio::test]
    async fn non_transient_error_ends_wait() {
        let clock = RecordingClock::default();
        let script = Script::new(vec![Err(JobError::NoBackend(crate::domain::JobKind::Video))]);

        let result = poll_until_terminal(&JobId::from("job-1"), &clock, &options(3), || {
            script.next()
        })
        .await;

        assert!(matches!(result, Err(JobError::NoBackend(_))));
        assert_eq!(script.calls(), 1);
    }

    #[tokio::test]
    async fn cancelled_before_start_never_probes() {
        let clock = RecordingClock::default();
        let script = Script::new(vec![]);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = poll_until_terminal(
            &JobId::from("job-1"),
            &clock,
            &options(10).with_cancel(cancel),
            || script.next(),
        )
        .await
        .unwrap();

        assert!(matches!(outcome, WaitOutcome::Cancelled { attempts: 0 }));
        assert_eq!(script.calls(), 0);
        assert!(clock.sleeps().is_empty());
    }

    #[tokio::test]
    async fn cancel_mid_wait_stops_at_next_tick() {
        let clock = RecordingClock::default();
        let script = &Script::new(vec![]);
        let cancel = CancellationToken::new();
        let opts = options(10).with_cancel(cancel.clone());

        let outcome = poll_until_terminal(&JobId::from("job-1"), &clock, &opts, || {
            let fut = script.next();
            let cancel = cancel.clone();
            async move {
                let result = fut.await;
                if script.calls() == 2 {
                    cancel.cancel();
                }
                result
            }
        })
        .await
        .unwrap();

        assert!(matches!(outcome, WaitOutcome::Cancelled { attempts: 2 }));
        assert_eq!(script.calls(), 2);
    }

    #[tokio::test]
    async fn cancel_interrupts_real_sleep() {
        let script = Script::new(vec![]);
        let cancel = CancellationToken::new();
        let opts = WaitOptions::new(PollSchedule::new(Duration::from_secs(3600), 5))
            .with_cancel(cancel.clone());

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let outcome = poll_until_terminal(&JobId::from("job-1"), &TokioClock, &opts, || {
            script.next()
        })
        .await
        .unwrap();

        assert!(matches!(outcome, WaitOutcome::Cancelled { attempts: 0 }));
        assert_eq!(script.calls(), 0);
    }

    #[tokio::test]
    async fn progress_reports_rise_below_ceiling() {
        let clock = RecordingClock::default();
        let script = Script::new(vec![
            Ok(report(ReportStatus::Pending)),
            Ok(report(ReportStatus::Processing)),
            Ok(report(ReportStatus::Processing)),
            Ok(report(ReportStatus::Completed)),
        ]);
        let (tx, mut rx) = mpsc::unbounded_channel();

        poll_until_terminal(
            &JobId::from("job-1"),
            &clock,
            &options(4).with_progress(tx),
            || script.next(),
        )
        .await
        .unwrap();

        let mut seen = Vec::new();
        while let Ok(progress) = rx.try_recv() {
            seen.push(progress);
        }
        assert_eq!(seen.len(), 3);
        assert!(seen.windows(2).all(|w| w[0].percent < w[1].percent));
        assert!(seen.iter().all(|p| p.percent < 100));
        assert_eq!(seen.iter().map(|p| p.attempt).collect::<Vec<_>>(), vec![1, 2, 3]);
    }

    #[test]
    fn outcome_messages_are_distinct() {
        let mut with_artifact = report(ReportStatus::Completed);
        with_artifact.artifact = Some("/out/video-x.mp4".into());
        let mut without = report(ReportStatus::Completed);
        without.warning = Some("fetch failed".to_string());
        let mut failed = report(ReportStatus::Failed);
        failed.error = Some("cancelled".to_string());

        let messages = vec![
            WaitOutcome::Completed { report: with_artifact }.message(),
            WaitOutcome::Completed { report: without }.message(),
            WaitOutcome::Failed { report: failed }.message(),
            WaitOutcome::NotFound.message(),
            WaitOutcome::TimedOut { attempts: 3 }.message(),
            WaitOutcome::Cancelled { attempts: 1 }.message(),
        ];

        let unique: std::collections::HashSet<_> = messages.iter().collect();
        assert_eq!(unique.len(), messages.len());
        assert!(messages[2].contains("cancelled"));
    }
}
