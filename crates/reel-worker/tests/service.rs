//! Processing service behavior against a fake transcoder.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use reel_media::{
    transcoder::cancelled, EffectProcessorRegistry, FfmpegCommand, FfmpegProgress, GeneratedAssets,
    MediaError, MediaResult, TranscodeControl, Transcoder,
};
use reel_models::{Dimensions, Effect, EffectFamily, JobId, JobStatus, MediaAsset, ProcessingJob};
use reel_worker::{JobCallbacks, JobEvent, ProcessingService, WorkerConfig};

const WAIT: Duration = Duration::from_secs(10);

/// Behaves according to the main input's file name: `fail*` fails,
/// `block*` runs until cancelled, `slow*` takes a moment, anything else
/// succeeds at once.
#[derive(Default)]
struct FakeTranscoder {
    commands: Mutex<Vec<FfmpegCommand>>,
    saw_cancel: AtomicBool,
}

impl FakeTranscoder {
    fn commands(&self) -> Vec<FfmpegCommand> {
        self.commands.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transcoder for FakeTranscoder {
    async fn transcode(&self, command: &FfmpegCommand, control: TranscodeControl) -> MediaResult<()> {
        self.commands.lock().unwrap().push(command.clone());
        let name = command.inputs()[0]
            .path()
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        if name.starts_with("fail") {
            return Err(MediaError::ffmpeg_failed(
                "FFmpeg exited with status 1",
                Some("Invalid data found when processing input".into()),
                Some(1),
            ));
        }
        if name.starts_with("block") {
            let mut rx = control.cancel.clone().expect("cancel channel");
            cancelled(&mut rx).await;
            self.saw_cancel.store(true, Ordering::SeqCst);
            return Err(MediaError::Cancelled);
        }
        if name.starts_with("slow") {
            tokio::time::sleep(Duration::from_millis(300)).await;
        }

        if let Some(on_progress) = &control.on_progress {
            on_progress(FfmpegProgress {
                out_time_ms: 1000,
                ..Default::default()
            });
        }
        tokio::fs::write(command.output(), b"rendered").await?;
        Ok(())
    }
}

struct Fixture {
    dir: TempDir,
    transcoder: Arc<FakeTranscoder>,
    service: ProcessingService,
}

impl Fixture {
    fn new() -> Self {
        Self::with_shutdown_timeout(Duration::from_secs(2))
    }

    fn with_shutdown_timeout(shutdown_timeout: Duration) -> Self {
        let dir = TempDir::new().unwrap();
        let config = WorkerConfig {
            queue_poll_interval: Duration::from_millis(20),
            shutdown_timeout,
            work_dir: dir.path().join("work"),
            generated_assets_dir: dir.path().join("generated"),
            max_concurrent_transcodes: 2,
            ..WorkerConfig::default()
        };
        let registry =
            EffectProcessorRegistry::with_defaults(GeneratedAssets::new(&config.generated_assets_dir))
                .unwrap();
        let transcoder = Arc::new(FakeTranscoder::default());
        let service = ProcessingService::new(config, registry, transcoder.clone()).unwrap();
        Self {
            dir,
            transcoder,
            service,
        }
    }

    fn asset(&self, name: &str) -> MediaAsset {
        let path = self.dir.path().join(name);
        if !path.exists() {
            std::fs::write(&path, b"video").unwrap();
        }
        MediaAsset::new(path, 4.0, Dimensions::new(1920, 1080).unwrap()).unwrap()
    }

    fn output(&self, name: &str) -> PathBuf {
        self.dir.path().join("out").join(name)
    }

    fn job(&self, main: &str, output: &str) -> ProcessingJob {
        ProcessingJob::new(self.asset(main), self.output(output))
    }
}

fn completion_log() -> (JobCallbacks, Arc<Mutex<Vec<(JobId, bool)>>>) {
    let log = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&log);
    let callbacks = JobCallbacks::new().on_complete(move |id, ok| sink.lock().unwrap().push((id.clone(), ok)));
    (callbacks, log)
}

fn written(path: &Path) -> Vec<u8> {
    std::fs::read(path).unwrap()
}

async fn wait_until_processing(events: &mut tokio::sync::broadcast::Receiver<JobEvent>, id: &JobId) {
    loop {
        match tokio::time::timeout(WAIT, events.recv()).await.unwrap().unwrap() {
            JobEvent::StatusChanged { job_id, status: JobStatus::Processing } if &job_id == id => return,
            _ => continue,
        }
    }
}

#[tokio::test]
async fn test_cancelling_queued_job_skips_it() {
    let fx = Fixture::new();
    std::fs::create_dir_all(fx.dir.path().join("out")).unwrap();
    let (callbacks, completions) = completion_log();

    let ids: Vec<JobId> = (0..3)
        .map(|i| {
            fx.service
                .submit(fx.job("main.mp4", &format!("out{i}.mp4")), callbacks.clone())
                .unwrap()
        })
        .collect();
    assert!(fx.service.cancel(&ids[1]));
    assert!(!fx.service.cancel(&ids[1]), "second cancel is a no-op");

    let first = fx.service.wait_for(&ids[0], WAIT).await.unwrap();
    let third = fx.service.wait_for(&ids[2], WAIT).await.unwrap();
    let second = fx.service.get_job(&ids[1]).unwrap();

    assert_eq!(first.status(), JobStatus::Completed);
    assert_eq!(second.status(), JobStatus::Cancelled);
    assert_eq!(third.status(), JobStatus::Completed);
    assert_eq!(first.progress(), 100.0);
    assert_eq!(written(first.output_path()), b"rendered");
    assert!(!second.output_path().exists());

    let completions = completions.lock().unwrap().clone();
    assert_eq!(completions.len(), 3);
    assert!(completions.contains(&(ids[1].clone(), false)));
    assert_eq!(completions.iter().filter(|(id, _)| id == &ids[1]).count(), 1);
    assert!(completions.contains(&(ids[0].clone(), true)));
    assert!(completions.contains(&(ids[2].clone(), true)));

    // Only the two surviving jobs reached the transcoder.
    assert_eq!(fx.transcoder.commands().len(), 2);
}

#[tokio::test]
async fn test_failures_and_success_rate() {
    let fx = Fixture::new();
    std::fs::create_dir_all(fx.dir.path().join("out")).unwrap();
    assert_eq!(fx.service.get_statistics().success_rate, 0.0);

    let ok = fx.service.submit(fx.job("main.mp4", "ok.mp4"), JobCallbacks::new()).unwrap();
    let bad = fx.service.submit(fx.job("fail.mp4", "bad.mp4"), JobCallbacks::new()).unwrap();

    fx.service.wait_for(&ok, WAIT).await.unwrap();
    let failed = fx.service.wait_for(&bad, WAIT).await.unwrap();

    assert_eq!(failed.status(), JobStatus::Failed);
    assert!(failed.error_message().unwrap().contains("FFmpeg exited"));
    assert!(!failed.output_path().exists());

    let stats = fx.service.get_statistics();
    assert_eq!(stats.total_jobs, 2);
    assert_eq!(stats.completed, 1);
    assert_eq!(stats.failed, 1);
    assert!((stats.success_rate - 0.5).abs() < 1e-9);

    let queue = fx.service.get_queue_status();
    assert_eq!((queue.completed, queue.failed, queue.total), (1, 1, 2));
    assert_eq!(fx.service.get_jobs_by_status(JobStatus::Failed).len(), 1);
}

#[tokio::test]
async fn test_retry_requeues_failed_job() {
    let fx = Fixture::new();
    std::fs::create_dir_all(fx.dir.path().join("out")).unwrap();
    let (callbacks, completions) = completion_log();

    let id = fx.service.submit(fx.job("fail.mp4", "retry.mp4"), callbacks).unwrap();
    assert_eq!(fx.service.wait_for(&id, WAIT).await.unwrap().status(), JobStatus::Failed);

    assert!(fx.service.retry(&id));
    let job = fx.service.wait_for(&id, WAIT).await.unwrap();
    assert_eq!(job.status(), JobStatus::Failed);
    assert_eq!(completions.lock().unwrap().len(), 2, "one completion per attempt");

    let unknown = JobId::from_string("missing");
    assert!(!fx.service.retry(&unknown));
}

#[tokio::test]
async fn test_invalid_job_is_rejected_with_every_issue() {
    let fx = Fixture::new();
    let existing = fx.dir.path().join("taken.mp4");
    std::fs::write(&existing, b"old").unwrap();

    let job = ProcessingJob::new(fx.asset("main.mp4"), &existing)
        .with_effect(Effect::gif_overlay(fx.dir.path().join("missing.gif").display().to_string(), 2.0).unwrap());

    let err = fx.service.submit(job, JobCallbacks::new()).unwrap_err();
    let issues = err.validation_issues().expect("validation error");
    assert!(issues.iter().any(|i| i.contains("already exists")));
    assert!(issues.iter().any(|i| i.contains("gif_overlay")));
    assert!(fx.service.get_all_jobs().is_empty());
    assert!(!fx.service.is_running());
}

#[tokio::test]
async fn test_effects_chain_and_extra_transitions_are_skipped() {
    let fx = Fixture::new();
    std::fs::create_dir_all(fx.dir.path().join("out")).unwrap();

    let progress = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&progress);
    let callbacks = JobCallbacks::new().on_progress(move |_, p| sink.lock().unwrap().push(p));

    let job = fx.job("main.mp4", "fx.mp4").with_effects([
        Effect::none(),
        Effect::new(EffectFamily::SlideLeftToRight, 1.0).unwrap(),
        Effect::new(EffectFamily::CircleExpand, 1.0).unwrap(),
    ]);
    let id = fx.service.submit(job, callbacks).unwrap();
    let done = fx.service.wait_for(&id, WAIT).await.unwrap();
    assert_eq!(done.status(), JobStatus::Completed);

    // compose, then the slide; the circle is skipped.
    let commands = fx.transcoder.commands();
    assert_eq!(commands.len(), 2);
    let compose_graph = commands[0].output_value("-filter_complex").unwrap();
    assert!(compose_graph.contains("scale=1080:1920"));
    assert!(commands[1].inputs()[0].path().ends_with("composed.mp4"));

    let progress = progress.lock().unwrap().clone();
    assert!(!progress.is_empty());
    assert!(progress.windows(2).all(|w| w[0] <= w[1]));
    assert!(progress.iter().all(|p| (0.0..=100.0).contains(p)));

    // Scratch files are gone once the job is done.
    let leftovers = std::fs::read_dir(fx.dir.path().join("work")).unwrap().count();
    assert_eq!(leftovers, 0);
}

#[tokio::test]
async fn test_cancel_while_processing_stops_transcoder() {
    let fx = Fixture::new();
    std::fs::create_dir_all(fx.dir.path().join("out")).unwrap();
    let (callbacks, completions) = completion_log();
    let mut events = fx.service.subscribe();

    let id = fx.service.submit(fx.job("block.mp4", "blocked.mp4"), callbacks).unwrap();
    loop {
        match tokio::time::timeout(WAIT, events.recv()).await.unwrap().unwrap() {
            JobEvent::StatusChanged { status: JobStatus::Processing, .. } => break,
            _ => continue,
        }
    }

    assert!(fx.service.cancel(&id));
    let job = fx.service.wait_for(&id, WAIT).await.unwrap();
    assert_eq!(job.status(), JobStatus::Cancelled);

    for _ in 0..50 {
        if fx.transcoder.saw_cancel.load(Ordering::SeqCst) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(fx.transcoder.saw_cancel.load(Ordering::SeqCst));

    // The worker's own view of the cancelled render must not report again.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(*completions.lock().unwrap(), vec![(id.clone(), false)]);
    assert_eq!(fx.service.get_job(&id).unwrap().status(), JobStatus::Cancelled);
}

#[tokio::test]
async fn test_stop_processing_cancels_queue_and_restarts_on_submit() {
    let fx = Fixture::new();
    std::fs::create_dir_all(fx.dir.path().join("out")).unwrap();
    let mut events = fx.service.subscribe();

    let first = fx.service.submit(fx.job("slow.mp4", "a.mp4"), JobCallbacks::new()).unwrap();
    let second = fx.service.submit(fx.job("main.mp4", "b.mp4"), JobCallbacks::new()).unwrap();
    let third = fx.service.submit(fx.job("main.mp4", "c.mp4"), JobCallbacks::new()).unwrap();
    loop {
        if let JobEvent::StatusChanged { job_id, status: JobStatus::Processing } =
            tokio::time::timeout(WAIT, events.recv()).await.unwrap().unwrap()
        {
            assert_eq!(job_id, first);
            break;
        }
    }

    fx.service.stop_processing().await;
    assert!(!fx.service.is_running());
    assert_eq!(fx.service.get_job(&first).unwrap().status(), JobStatus::Completed);
    assert_eq!(fx.service.get_job(&second).unwrap().status(), JobStatus::Cancelled);
    assert_eq!(fx.service.get_job(&third).unwrap().status(), JobStatus::Cancelled);

    let cleared = fx.service.clear_completed_jobs();
    assert_eq!(cleared, 3);
    assert!(fx.service.get_all_jobs().is_empty());
    assert_eq!(fx.service.get_statistics().cancelled, 2);

    let again = fx.service.submit(fx.job("main.mp4", "d.mp4"), JobCallbacks::new()).unwrap();
    assert_eq!(fx.service.wait_for(&again, WAIT).await.unwrap().status(), JobStatus::Completed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_submits_lose_nothing() {
    let fx = Arc::new(Fixture::new());
    std::fs::create_dir_all(fx.dir.path().join("out")).unwrap();
    fx.asset("main.mp4");

    let submitted: Vec<JobId> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let fx = Arc::clone(&fx);
                scope.spawn(move || {
                    (0..5)
                        .map(|i| {
                            fx.service
                                .submit(fx.job("main.mp4", &format!("t{t}-{i}.mp4")), JobCallbacks::new())
                                .unwrap()
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        handles.into_iter().flat_map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(submitted.len(), 40);
    let unique: HashSet<_> = submitted.iter().cloned().collect();
    assert_eq!(unique.len(), 40);
    assert_eq!(fx.service.get_all_jobs().len(), 40);
    assert_eq!(fx.service.get_statistics().total_jobs, 40);

    for id in &submitted {
        let job = fx.service.wait_for(id, WAIT).await.unwrap();
        assert_eq!(job.status(), JobStatus::Completed);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_callbacks_arrive_in_transition_order() {
    let fx = Fixture::new();
    std::fs::create_dir_all(fx.dir.path().join("out")).unwrap();
    fx.asset("main.mp4");

    let log: Arc<Mutex<HashMap<JobId, Vec<String>>>> = Arc::new(Mutex::new(HashMap::new()));
    let (on_status, on_progress, on_complete) = (Arc::clone(&log), Arc::clone(&log), Arc::clone(&log));
    let callbacks = JobCallbacks::new()
        .on_status_change(move |id, status| {
            on_status.lock().unwrap().entry(id.clone()).or_default().push(status.to_string())
        })
        .on_progress(move |id, _| {
            on_progress.lock().unwrap().entry(id.clone()).or_default().push("progress".into())
        })
        .on_complete(move |id, ok| {
            on_complete.lock().unwrap().entry(id.clone()).or_default().push(format!("done:{ok}"))
        });

    let mut ids = Vec::new();
    for i in 0..200 {
        let id = fx
            .service
            .submit(fx.job("main.mp4", &format!("order-{i}.mp4")), callbacks.clone())
            .unwrap();
        ids.push(id);
    }
    for id in &ids {
        assert_eq!(fx.service.wait_for(id, WAIT).await.unwrap().status(), JobStatus::Completed);
    }

    // The job table settles before the last callback has necessarily run.
    for _ in 0..100 {
        let settled = {
            let log = log.lock().unwrap();
            ids.iter().all(|id| log.get(id).and_then(|l| l.last()).map(String::as_str) == Some("done:true"))
        };
        if settled {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let log = log.lock().unwrap();
    for id in &ids {
        let entries = &log[id];
        let n = entries.len();
        assert!(n >= 4, "job {id}: {entries:?}");
        assert_eq!(entries[..2], ["queued", "processing"], "job {id}: {entries:?}");
        assert_eq!(entries[n - 2..], ["completed", "done:true"], "job {id}: {entries:?}");
        assert!(entries[2..n - 2].iter().all(|e| e == "progress"), "job {id}: {entries:?}");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_restarted_worker_stops_even_if_previous_one_is_still_rendering() {
    let fx = Fixture::with_shutdown_timeout(Duration::from_millis(100));
    std::fs::create_dir_all(fx.dir.path().join("out")).unwrap();
    let mut events = fx.service.subscribe();

    let blocked = fx.service.submit(fx.job("block.mp4", "blocked.mp4"), JobCallbacks::new()).unwrap();
    wait_until_processing(&mut events, &blocked).await;
    assert!(!fx.service.stop_processing().await, "the render outlives the timeout");
    assert!(!fx.service.is_running());

    // The old generation still owns the queue, so the new one never gets to it.
    let later = fx.service.submit(fx.job("main.mp4", "later.mp4"), JobCallbacks::new()).unwrap();
    assert!(fx.service.is_running());
    assert!(fx.service.stop_processing().await);
    assert!(!fx.service.is_running());
    assert_eq!(fx.service.get_job(&later).unwrap().status(), JobStatus::Cancelled);

    assert!(fx.service.cancel(&blocked));
    let job = fx.service.wait_for(&blocked, WAIT).await.unwrap();
    assert_eq!(job.status(), JobStatus::Cancelled);
    assert!(!fx.service.get_job(&later).unwrap().output_path().exists());
}
