//! Render worker binary.
//!
//! Usage: `reel-worker <job.json>`

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use reel_media::{check_ffmpeg, check_ffprobe, FfprobeInspector};
use reel_models::JobStatus;
use reel_worker::{JobCallbacks, JobEvent, JobManifest, ProcessingService, WorkerConfig};

fn init_tracing() -> anyhow::Result<()> {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::from_default_env()
        .add_directive("reel=info".parse().context("invalid log directive")?);

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }
    Ok(())
}

async fn run(manifest_path: PathBuf) -> anyhow::Result<JobStatus> {
    check_ffmpeg().context("ffmpeg is required")?;
    check_ffprobe().context("ffprobe is required")?;

    let config = WorkerConfig::from_env();
    info!("Worker config: {:?}", config);
    // One transcode timeout per stage, plus slack.
    let wait_limit = config.transcode_timeout * 4 + Duration::from_secs(60);

    let manifest = JobManifest::load(&manifest_path)
        .await
        .with_context(|| format!("reading {}", manifest_path.display()))?;
    let job = manifest.into_job(&FfprobeInspector::new()).await?;

    let service = ProcessingService::with_defaults(config)?;
    let mut events = service.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                JobEvent::Progress { job_id, percent } => {
                    info!(job_id = %job_id, percent, "progress")
                }
                JobEvent::StatusChanged { job_id, status } => {
                    info!(job_id = %job_id, status = %status, "status changed")
                }
                JobEvent::Completed { job_id, success } => {
                    info!(job_id = %job_id, success, "finished")
                }
            }
        }
    });

    let id = service.submit(job, JobCallbacks::new())?;

    let cancel_on_signal = async {
        tokio::signal::ctrl_c().await.ok();
        warn!("Received shutdown signal, cancelling job {}", id);
        service.cancel(&id);
    };
    let finished = tokio::select! {
        job = service.wait_for(&id, wait_limit) => Some(job?),
        _ = cancel_on_signal => None,
    };
    let finished = match finished {
        Some(job) => job,
        None => service.wait_for(&id, wait_limit).await?,
    };

    if let Some(message) = finished.error_message() {
        error!(job_id = %id, "Job failed: {}", message);
    }
    service.stop_processing().await;
    Ok(finished.status())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing()?;

    let manifest_path = std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .context("usage: reel-worker <job.json>")?;

    info!("Starting reel-worker");
    let status = run(manifest_path).await?;
    info!(status = %status, "reel-worker finished");

    if status != JobStatus::Completed {
        std::process::exit(1);
    }
    Ok(())
}
