//! vigil CLI
//!
//! Starts a remote job and, unless told not to, stays to watch it finish.
//! Job state lives in this process only, so `vigil check` from a fresh
//! process reports "not found".

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use vigil::gemini::{GeminiClient, ResearchBackend, VideoBackend};
use vigil::{
    telemetry, BackendSet, InMemoryJobRegistry, JobId, JobKind, JobManager, JobReport, JobRequest,
    Materializer, OutputDir, PollProgress, PollSchedule, ReportStatus, ResearchRequest,
    VideoRequest, WaitOptions, WaitOutcome,
};
use vigilconf::VigilConfig;

/// Exit code when the user interrupts local polling.
const EXIT_INTERRUPTED: u8 = 130;

#[derive(Parser, Debug)]
#[command(name = "vigil", version, about = "Start and watch long-running remote generative jobs")]
struct Cli {
    /// Config file to load after the system and user configs
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Render a video from a text prompt
    Video {
        prompt: String,

        /// e.g. "16:9" or "9:16"
        #[arg(long)]
        aspect_ratio: Option<String>,

        /// e.g. "720p" or "1080p"
        #[arg(long)]
        resolution: Option<String>,

        /// What the video should avoid
        #[arg(long)]
        negative_prompt: Option<String>,

        /// Clip length in seconds
        #[arg(long)]
        duration: Option<u32>,

        /// Print the job id and exit instead of polling
        #[arg(long)]
        no_wait: bool,
    },

    /// Run a deep research agent on a question
    Research {
        prompt: String,

        /// Instructions for the shape of the final report
        #[arg(long)]
        format: Option<String>,

        /// Print the job id and exit instead of polling
        #[arg(long)]
        no_wait: bool,
    },

    /// Probe a job once
    Check { id: String },

    /// Show the effective configuration and where it came from
    Config,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<ExitCode> {
    let cli = Cli::parse();

    let (config, sources) = VigilConfig::load_with_sources_from(cli.config.as_deref())
        .context("Failed to load configuration")?;

    if let Command::Config = cli.command {
        print!("{}", config.to_toml());
        println!();
        for file in &sources.files {
            println!("# loaded: {}", file.display());
        }
        for var in &sources.env_overrides {
            println!("# env override: {}", var);
        }
        return Ok(ExitCode::SUCCESS);
    }

    let telemetry = telemetry::init(&config.telemetry).context("Failed to initialize telemetry")?;
    let result = execute(cli.command, &config).await;
    telemetry.shutdown();
    result
}

fn gemini_backends(config: &VigilConfig) -> Result<BackendSet> {
    let client = Arc::new(GeminiClient::from_config(&config.remote)?);
    Ok(BackendSet::new()
        .with(Arc::new(VideoBackend::new(
            client.clone(),
            &config.remote.video_model,
        )))
        .with(Arc::new(ResearchBackend::new(
            client,
            &config.remote.research_agent,
        ))))
}

async fn build_manager(config: &VigilConfig, backends: BackendSet) -> Result<JobManager> {
    let output = OutputDir::resolve(&config.paths.output_dir)
        .await
        .with_context(|| {
            format!(
                "Failed to create output directory {}",
                config.paths.output_dir.display()
            )
        })?;
    tracing::debug!(output_dir = %output.path().display(), "Output directory resolved");

    Ok(JobManager::new(
        InMemoryJobRegistry::new_shared(),
        backends,
        Materializer::new(output),
    ))
}

async fn execute(command: Command, config: &VigilConfig) -> Result<ExitCode> {
    if let Command::Check { id } = command {
        return check(config, JobId::from(id)).await;
    }

    let manager = build_manager(config, gemini_backends(config)?).await?;

    let (request, no_wait) = match command {
        Command::Video {
            prompt,
            aspect_ratio,
            resolution,
            negative_prompt,
            duration,
            no_wait,
        } => (
            JobRequest::Video(VideoRequest {
                prompt,
                aspect_ratio,
                resolution,
                negative_prompt,
                duration_seconds: duration,
            }),
            no_wait,
        ),
        Command::Research {
            prompt,
            format,
            no_wait,
        } => (
            JobRequest::Research(ResearchRequest { prompt, format }),
            no_wait,
        ),
        Command::Check { .. } | Command::Config => return Ok(ExitCode::SUCCESS),
    };

    let ticket = manager.start_job(request).await?;
    println!("{} job {} {}", ticket.kind, ticket.id, ticket.status);

    if no_wait {
        return Ok(ExitCode::SUCCESS);
    }

    let budget = match ticket.kind {
        JobKind::Video => &config.polling.video,
        JobKind::Research => &config.polling.research,
    };
    let cancel = CancellationToken::new();
    let (progress_tx, progress_rx) = mpsc::unbounded_channel();
    let options = WaitOptions::new(PollSchedule::from(budget))
        .with_cancel(cancel.clone())
        .with_progress(progress_tx);

    tokio::spawn(cancel_on_ctrl_c(cancel));
    let printer = tokio::spawn(print_progress(progress_rx));

    let outcome = manager.wait_for_job(&ticket.id, options).await?;
    // The options (and their sender) are gone, so the printer drains and exits.
    let _ = printer.await;

    println!("{} job {} {}", ticket.kind, ticket.id, outcome.message());
    Ok(exit_code(&outcome))
}

async fn check(config: &VigilConfig, id: JobId) -> Result<ExitCode> {
    let report = check_report(config, id).await?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(match report.status {
        ReportStatus::Failed | ReportStatus::NotFound => ExitCode::FAILURE,
        _ => ExitCode::SUCCESS,
    })
}

/// A fresh process has an empty registry, so an id only reaches the remote
/// service if it is registered. Without an API key the check still answers
/// from the registry.
async fn check_report(config: &VigilConfig, id: JobId) -> Result<JobReport> {
    let backends = gemini_backends(config).unwrap_or_else(|e| {
        tracing::debug!(error = %e, "No remote client; answering from the local registry");
        BackendSet::new()
    });
    let manager = build_manager(config, backends).await?;
    Ok(manager.check_job(&id).await?)
}

async fn cancel_on_ctrl_c(cancel: CancellationToken) {
    if tokio::signal::ctrl_c().await.is_ok() {
        eprintln!("interrupted; stopping local polling (the remote job keeps running)");
        cancel.cancel();
    }
}

async fn print_progress(mut rx: mpsc::UnboundedReceiver<PollProgress>) {
    while let Some(progress) = rx.recv().await {
        eprintln!(
            "  {:>3}%  {}  attempt {}/{}  {}s",
            progress.percent,
            progress.status,
            progress.attempt,
            progress.max_attempts,
            progress.elapsed.as_secs()
        );
    }
}

fn exit_code(outcome: &WaitOutcome) -> ExitCode {
    match outcome {
        WaitOutcome::Completed { .. } => ExitCode::SUCCESS,
        WaitOutcome::Cancelled { .. } => ExitCode::from(EXIT_INTERRUPTED),
        WaitOutcome::Failed { .. } | WaitOutcome::NotFound | WaitOutcome::TimedOut { .. } => {
            ExitCode::FAILURE
        }
    }
}
