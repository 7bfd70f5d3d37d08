//! Processing service: job table, FIFO queue and the background worker.
//!
//! The job table, callback registry, per-job cancel senders and running
//! statistics sit behind one mutex. Every state change queues its
//! notifications on the outbox before that lock is released, and they are
//! delivered in that order once it is. A single worker task pops job ids in
//! submission order; each render runs in its own task so a panic fails the
//! job instead of killing the worker.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, info, warn};

use reel_media::{
    EffectProcessorRegistry, FfmpegRunner, GeneratedAssets, PercentCallback, Transcoder,
};
use reel_models::{JobId, JobStatus, ProcessingJob, ValidationError};

use crate::callbacks::{JobCallbacks, JobEvent, Notification, Outbox};
use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::logging::JobLogger;
use crate::metrics;
use crate::pipeline::RenderPipeline;
use crate::stats::{QueueStatus, RunningStats, ServiceStatistics};

#[derive(Default)]
struct State {
    jobs: HashMap<JobId, ProcessingJob>,
    /// Submission order, for stable listings.
    order: Vec<JobId>,
    callbacks: HashMap<JobId, JobCallbacks>,
    cancels: HashMap<JobId, watch::Sender<bool>>,
    stats: RunningStats,
}

impl State {
    fn callbacks_for(&self, id: &JobId) -> JobCallbacks {
        self.callbacks.get(id).cloned().unwrap_or_default()
    }

    /// Status change plus, for terminal states, the completion event.
    fn transition_notes(&self, id: &JobId, status: JobStatus) -> Vec<Notification> {
        let callbacks = self.callbacks_for(id);
        let mut notes = vec![Notification::new(
            callbacks.clone(),
            JobEvent::StatusChanged {
                job_id: id.clone(),
                status,
            },
        )];
        if status.is_terminal() {
            notes.push(Notification::new(
                callbacks,
                JobEvent::Completed {
                    job_id: id.clone(),
                    success: status == JobStatus::Completed,
                },
            ));
        }
        notes
    }
}

/// One generation of the background worker and its own stop flag.
struct Worker {
    task: JoinHandle<()>,
    shutdown: watch::Sender<bool>,
}

struct Inner {
    config: WorkerConfig,
    pipeline: RenderPipeline,
    state: Mutex<State>,
    outbox: Outbox,
    queue_tx: mpsc::UnboundedSender<JobId>,
    queue_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<JobId>>,
    events: broadcast::Sender<JobEvent>,
    worker: Mutex<Option<Worker>>,
    runtime: Handle,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn worker(&self) -> MutexGuard<'_, Option<Worker>> {
        self.worker.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Deliver queued notifications. Call after releasing the state lock.
    fn flush(&self) {
        self.outbox.flush(|note| {
            note.deliver();
            // No subscribers is fine.
            let _ = self.events.send(note.event);
        });
    }

    async fn process(self: &Arc<Self>, id: JobId) {
        let (job, cancel_rx) = {
            let mut state = self.lock();
            let Some(job) = state.jobs.get_mut(&id) else {
                debug!(job_id = %id, "dequeued job no longer tracked");
                return;
            };
            if job.status() != JobStatus::Queued {
                debug!(job_id = %id, status = %job.status(), "skipping dequeued job");
                return;
            }
            job.transition_to(JobStatus::Processing);
            let job = job.clone();

            let (tx, rx) = watch::channel(false);
            state.cancels.insert(id.clone(), tx);
            self.outbox.push(state.transition_notes(&id, JobStatus::Processing));
            (job, rx)
        };
        self.flush();

        let logger = JobLogger::new(&id, "worker");
        logger.log_start(&format!("processing {}", job.main_asset().display_name()));

        let pipeline = self.pipeline.clone();
        let on_progress = self.progress_sink(id.clone());
        let handle = self.runtime.spawn(async move {
            pipeline.render(&job, cancel_rx, on_progress).await.map(|_| ())
        });
        let result = handle.await;
        self.finish(&id, result, &logger);
    }

    /// Progress updates for one job; only whole-percent increases are announced.
    fn progress_sink(self: &Arc<Self>, id: JobId) -> PercentCallback {
        let inner = Arc::clone(self);
        Arc::new(move |percent: f64| {
            let percent = percent.clamp(0.0, 100.0) as f32;
            {
                let mut state = inner.lock();
                let Some(job) = state.jobs.get_mut(&id) else {
                    return;
                };
                if job.status() != JobStatus::Processing || percent <= job.progress() {
                    return;
                }
                let announce = percent.floor() > job.progress().floor();
                if job.set_progress(percent).is_err() || !announce {
                    return;
                }
                inner.outbox.push([Notification::new(
                    state.callbacks_for(&id),
                    JobEvent::Progress {
                        job_id: id.clone(),
                        percent,
                    },
                )]);
            }
            inner.flush();
        })
    }

    fn finish(&self, id: &JobId, result: Result<WorkerResult<()>, JoinError>, logger: &JobLogger) {
        {
            let mut state = self.lock();
            state.cancels.remove(id);
            let Some(job) = state.jobs.get_mut(id) else {
                return;
            };
            if job.status() != JobStatus::Processing {
                // Cancelled while rendering; cancel() already reported it.
                logger.log_warning(&format!("render ended after job became {}", job.status()));
                return;
            }

            match result {
                Ok(Ok(())) => {
                    job.complete();
                    let elapsed = job.processing_time().unwrap_or_default();
                    logger.log_completion("rendered", elapsed.as_millis() as u64);
                    metrics::record_job_completed(elapsed.as_secs_f64());
                }
                Ok(Err(e)) if e.is_cancelled() => {
                    job.transition_to(JobStatus::Cancelled);
                    logger.log_warning("render cancelled");
                    metrics::record_job_cancelled("processing");
                }
                Ok(Err(e)) => {
                    logger.log_error(&e.to_string());
                    let reason = match &e {
                        WorkerError::Media(m) if m.is_transcoder_fault() => "transcoder",
                        WorkerError::Media(_) => "processor",
                        _ => "worker",
                    };
                    if let WorkerError::Media(m) = &e {
                        if let Some(stderr) = m.diagnostics() {
                            debug!(job_id = %id, stderr, "transcoder diagnostics");
                        }
                    }
                    job.fail(e.to_string());
                    metrics::record_job_failed(reason);
                }
                Err(join_error) => {
                    let message = format!("render task aborted: {}", join_error);
                    logger.log_error(&message);
                    job.fail(message);
                    metrics::record_job_failed("panic");
                }
            }

            let status = job.status();
            let elapsed = job.processing_time();
            state.stats.record_terminal(status, elapsed);
            self.outbox.push(state.transition_notes(id, status));
        }
        self.flush();
    }
}

async fn run_worker(inner: Arc<Inner>, mut shutdown: watch::Receiver<bool>) {
    // An earlier generation may still hold the queue while it finishes a render.
    let mut queue = tokio::select! {
        queue = inner.queue_rx.lock() => queue,
        _ = shutdown.wait_for(|stop| *stop) => {
            debug!("worker stopped before taking the queue");
            return;
        }
    };
    info!(
        max_transcodes = inner.config.max_concurrent_transcodes,
        "processing worker started"
    );

    loop {
        if *shutdown.borrow_and_update() {
            break;
        }
        let next = tokio::select! {
            _ = shutdown.changed() => continue,
            next = tokio::time::timeout(inner.config.queue_poll_interval, queue.recv()) => next,
        };
        match next {
            Ok(Some(id)) => inner.process(id).await,
            Ok(None) => break,
            Err(_) => continue,
        }
    }

    info!("processing worker stopped");
}

/// Queue-backed processing service.
///
/// Public methods are safe to call from any thread; `submit` and `cancel`
/// never block on rendering.
pub struct ProcessingService {
    inner: Arc<Inner>,
}

impl ProcessingService {
    /// Create a service on the current Tokio runtime.
    pub fn new(
        config: WorkerConfig,
        registry: EffectProcessorRegistry,
        transcoder: Arc<dyn Transcoder>,
    ) -> WorkerResult<Self> {
        config.validate()?;
        let runtime = Handle::try_current()
            .map_err(|e| WorkerError::runtime(format!("no Tokio runtime: {}", e)))?;

        let pipeline = RenderPipeline::new(config.clone(), Arc::new(registry), transcoder);
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(config.event_buffer);

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                pipeline,
                state: Mutex::new(State::default()),
                outbox: Outbox::default(),
                queue_tx,
                queue_rx: tokio::sync::Mutex::new(queue_rx),
                events,
                worker: Mutex::new(None),
                runtime,
            }),
        })
    }

    /// Service wired to the default processors and the ffmpeg CLI.
    pub fn with_defaults(config: WorkerConfig) -> WorkerResult<Self> {
        let registry =
            EffectProcessorRegistry::with_defaults(GeneratedAssets::new(&config.generated_assets_dir))?;
        let runner = FfmpegRunner::new()
            .with_timeout(config.transcode_timeout)
            .with_grace_period(config.cancel_grace_period);
        Self::new(config, registry, Arc::new(runner))
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.inner.config
    }

    pub fn registry(&self) -> &EffectProcessorRegistry {
        self.inner.pipeline.registry()
    }

    /// Validate, queue and start working on `job`.
    ///
    /// Every violation is reported at once; an invalid job is never queued.
    pub fn submit(&self, mut job: ProcessingJob, callbacks: JobCallbacks) -> WorkerResult<JobId> {
        let mut issues = job.validation_issues();
        if job.status() != JobStatus::Pending {
            issues.push(format!("job must be pending to submit (is {})", job.status()));
        }
        for (index, effect) in job.effects().iter().enumerate() {
            let prefix = format!("effect {} (", index);
            if issues.iter().any(|issue| issue.starts_with(&prefix)) {
                continue;
            }
            issues.extend(
                self.registry()
                    .validate(effect)
                    .into_iter()
                    .map(|issue| format!("effect {} ({}): {}", index, effect.family(), issue)),
            );
        }

        let id = job.id().clone();
        {
            let mut state = self.inner.lock();
            if state.jobs.contains_key(&id) {
                issues.push(format!("job {} was already submitted", id));
            }
            let claimed = state.jobs.values().find(|other| {
                other.status().is_active() && other.output_path() == job.output_path()
            });
            if let Some(other) = claimed {
                issues.push(format!(
                    "output path {} is already claimed by job {}",
                    job.output_path().display(),
                    other.id()
                ));
            }
            ValidationError::check(issues)?;

            // The worker cannot look the id up before this block releases the lock.
            self.inner
                .queue_tx
                .send(id.clone())
                .map_err(|_| WorkerError::runtime("job queue closed"))?;
            job.transition_to(JobStatus::Queued);
            let effects = job.effect_count();
            state.jobs.insert(id.clone(), job);
            state.order.push(id.clone());
            state.callbacks.insert(id.clone(), callbacks);
            state.stats.record_submitted();
            metrics::record_job_submitted(effects);
            self.inner.outbox.push(state.transition_notes(&id, JobStatus::Queued));
        }

        info!(job_id = %id, "job queued");
        self.inner.flush();
        self.ensure_worker();
        Ok(id)
    }

    /// Cancel a queued or running job. `false` if unknown or already terminal.
    pub fn cancel(&self, id: &JobId) -> bool {
        let stage = {
            let mut state = self.inner.lock();
            let Some(job) = state.jobs.get_mut(id) else {
                return false;
            };
            let previous = job.status();
            if job.is_terminal() || !job.transition_to(JobStatus::Cancelled) {
                return false;
            }
            let elapsed = job.processing_time();
            if let Some(cancel) = state.cancels.get(id) {
                cancel.send_replace(true);
            }
            state.stats.record_terminal(JobStatus::Cancelled, elapsed);
            self.inner.outbox.push(state.transition_notes(id, JobStatus::Cancelled));
            if previous == JobStatus::Processing { "processing" } else { "queued" }
        };

        info!(job_id = %id, stage, "job cancelled");
        metrics::record_job_cancelled(stage);
        self.inner.flush();
        true
    }

    /// Re-queue a failed or cancelled job as a fresh attempt.
    pub fn retry(&self, id: &JobId) -> bool {
        {
            let mut state = self.inner.lock();
            let Some(job) = state.jobs.get_mut(id) else {
                return false;
            };
            if !matches!(job.status(), JobStatus::Failed | JobStatus::Cancelled) {
                return false;
            }
            if job.output_path().exists() {
                warn!(job_id = %id, "not retrying: output already exists");
                return false;
            }
            if self.inner.queue_tx.send(id.clone()).is_err() {
                warn!(job_id = %id, "job queue closed; retry not scheduled");
                return false;
            }
            job.reset_for_retry();
            self.inner.outbox.push(state.transition_notes(id, JobStatus::Queued));
        }

        info!(job_id = %id, "job re-queued");
        self.inner.flush();
        self.ensure_worker();
        true
    }

    pub fn get_job(&self, id: &JobId) -> Option<ProcessingJob> {
        self.inner.lock().jobs.get(id).cloned()
    }

    /// Every tracked job, in submission order.
    pub fn get_all_jobs(&self) -> Vec<ProcessingJob> {
        let state = self.inner.lock();
        state
            .order
            .iter()
            .filter_map(|id| state.jobs.get(id).cloned())
            .collect()
    }

    pub fn get_jobs_by_status(&self, status: JobStatus) -> Vec<ProcessingJob> {
        self.get_all_jobs()
            .into_iter()
            .filter(|job| job.status() == status)
            .collect()
    }

    pub fn get_queue_status(&self) -> QueueStatus {
        QueueStatus::from_jobs(self.inner.lock().jobs.values())
    }

    pub fn get_statistics(&self) -> ServiceStatistics {
        self.inner.lock().stats.snapshot()
    }

    /// Forget terminal jobs and their callbacks. Output files are untouched.
    pub fn clear_completed_jobs(&self) -> usize {
        let mut state = self.inner.lock();
        let finished: Vec<JobId> = state
            .jobs
            .values()
            .filter(|job| job.is_terminal())
            .map(|job| job.id().clone())
            .collect();
        for id in &finished {
            state.jobs.remove(id);
            state.callbacks.remove(id);
        }
        state.order.retain(|id| !finished.contains(id));
        debug!(cleared = finished.len(), "cleared finished jobs");
        finished.len()
    }

    /// Live stream of progress, status and completion events for all jobs.
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.inner.events.subscribe()
    }

    /// Wait until `id` reaches a terminal status.
    pub async fn wait_for(&self, id: &JobId, timeout: Duration) -> WorkerResult<ProcessingJob> {
        let mut events = self.subscribe();
        let wait = async {
            loop {
                let job = self
                    .get_job(id)
                    .ok_or_else(|| WorkerError::JobNotFound(id.clone()))?;
                if job.is_terminal() {
                    return Ok(job);
                }
                match events.recv().await {
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => {
                        return Err(WorkerError::runtime("event stream closed"))
                    }
                }
            }
        };
        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| WorkerError::runtime(format!("timed out waiting for job {}", id)))?
    }

    /// Cancel everything still queued and stop the worker.
    ///
    /// A render already in progress is allowed to finish until the
    /// shutdown timeout elapses; after that the worker is left to wind down
    /// on its own. Returns `false` only when that timeout was hit.
    pub async fn stop_processing(&self) -> bool {
        let worker = self.inner.worker().take();
        if let Some(worker) = &worker {
            worker.shutdown.send_replace(true);
        }

        let cancelled = {
            let mut state = self.inner.lock();
            let queued: Vec<JobId> = state
                .order
                .iter()
                .filter(|id| state.jobs.get(*id).map(|j| j.status()) == Some(JobStatus::Queued))
                .cloned()
                .collect();
            for id in &queued {
                if let Some(job) = state.jobs.get_mut(id) {
                    job.transition_to(JobStatus::Cancelled);
                }
                state.stats.record_terminal(JobStatus::Cancelled, None);
                metrics::record_job_cancelled("queued");
                self.inner.outbox.push(state.transition_notes(id, JobStatus::Cancelled));
            }
            queued.len()
        };
        if cancelled > 0 {
            info!(cancelled, "cancelled queued jobs on shutdown");
        }
        self.inner.flush();

        let Some(worker) = worker else {
            return true;
        };
        match tokio::time::timeout(self.inner.config.shutdown_timeout, worker.task).await {
            Ok(Ok(())) => {
                info!("worker joined");
                true
            }
            Ok(Err(e)) => {
                warn!("worker task ended abnormally: {}", e);
                true
            }
            Err(_) => {
                warn!(
                    timeout_secs = self.inner.config.shutdown_timeout.as_secs_f64(),
                    "worker did not stop in time"
                );
                false
            }
        }
    }

    /// Whether a worker task is currently alive.
    pub fn is_running(&self) -> bool {
        self.inner
            .worker()
            .as_ref()
            .is_some_and(|worker| !worker.task.is_finished())
    }

    /// Start a new worker generation if none is running.
    fn ensure_worker(&self) {
        let mut worker = self.inner.worker();
        if worker.as_ref().is_some_and(|w| !w.task.is_finished()) {
            return;
        }
        if worker.is_some() {
            warn!("processing worker exited; restarting");
        }
        let (shutdown, stop) = watch::channel(false);
        let task = self.inner.runtime.spawn(run_worker(Arc::clone(&self.inner), stop));
        *worker = Some(Worker { task, shutdown });
    }
}

impl Drop for ProcessingService {
    fn drop(&mut self) {
        if let Some(worker) = self.inner.worker().as_ref() {
            worker.shutdown.send_replace(true);
        }
    }
}

impl std::fmt::Debug for ProcessingService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessingService")
            .field("registry", self.registry())
            .field("running", &self.is_running())
            .finish()
    }
}
