//! Job notifications: per-job callbacks and the service-wide event stream.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;

use reel_models::{JobId, JobStatus};

pub type ProgressFn = Arc<dyn Fn(&JobId, f32) + Send + Sync>;
pub type StatusFn = Arc<dyn Fn(&JobId, JobStatus) + Send + Sync>;
pub type CompleteFn = Arc<dyn Fn(&JobId, bool) + Send + Sync>;

/// Optional hooks registered with a job at submission.
///
/// `on_complete` fires exactly once for every attempt that leaves `Pending`,
/// with `true` only for `Completed`.
#[derive(Clone, Default)]
pub struct JobCallbacks {
    pub on_progress: Option<ProgressFn>,
    pub on_status_change: Option<StatusFn>,
    pub on_complete: Option<CompleteFn>,
}

impl JobCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_progress(mut self, f: impl Fn(&JobId, f32) + Send + Sync + 'static) -> Self {
        self.on_progress = Some(Arc::new(f));
        self
    }

    pub fn on_status_change(mut self, f: impl Fn(&JobId, JobStatus) + Send + Sync + 'static) -> Self {
        self.on_status_change = Some(Arc::new(f));
        self
    }

    pub fn on_complete(mut self, f: impl Fn(&JobId, bool) + Send + Sync + 'static) -> Self {
        self.on_complete = Some(Arc::new(f));
        self
    }

    pub(crate) fn progress(&self, id: &JobId, percent: f32) {
        if let Some(f) = &self.on_progress {
            f(id, percent);
        }
    }

    pub(crate) fn status(&self, id: &JobId, status: JobStatus) {
        if let Some(f) = &self.on_status_change {
            f(id, status);
        }
    }

    pub(crate) fn complete(&self, id: &JobId, success: bool) {
        if let Some(f) = &self.on_complete {
            f(id, success);
        }
    }
}

impl fmt::Debug for JobCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobCallbacks")
            .field("on_progress", &self.on_progress.is_some())
            .field("on_status_change", &self.on_status_change.is_some())
            .field("on_complete", &self.on_complete.is_some())
            .finish()
    }
}

/// Event broadcast to every subscriber of a service.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobEvent {
    Progress { job_id: JobId, percent: f32 },
    StatusChanged { job_id: JobId, status: JobStatus },
    Completed { job_id: JobId, success: bool },
}

impl JobEvent {
    pub fn job_id(&self) -> &JobId {
        match self {
            JobEvent::Progress { job_id, .. }
            | JobEvent::StatusChanged { job_id, .. }
            | JobEvent::Completed { job_id, .. } => job_id,
        }
    }
}

/// A notification ready to be delivered outside the service lock.
#[derive(Debug)]
pub(crate) struct Notification {
    pub callbacks: JobCallbacks,
    pub event: JobEvent,
}

impl Notification {
    pub fn new(callbacks: JobCallbacks, event: JobEvent) -> Self {
        Self { callbacks, event }
    }

    /// Invoke the matching callback.
    pub fn deliver(&self) {
        match &self.event {
            JobEvent::Progress { job_id, percent } => self.callbacks.progress(job_id, *percent),
            JobEvent::StatusChanged { job_id, status } => self.callbacks.status(job_id, *status),
            JobEvent::Completed { job_id, success } => self.callbacks.complete(job_id, *success),
        }
    }
}

/// Notifications in the order they were produced, delivered one at a time.
///
/// Producers push while still holding the service lock, so queue order is
/// the order the job table changed in. Whoever finds nobody delivering
/// drains the queue; no lock is held while a callback runs.
#[derive(Default)]
pub(crate) struct Outbox {
    queue: Mutex<Pending>,
}

#[derive(Default)]
struct Pending {
    notes: VecDeque<Notification>,
    draining: bool,
}

impl Outbox {
    fn lock(&self) -> MutexGuard<'_, Pending> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push(&self, notes: impl IntoIterator<Item = Notification>) {
        self.lock().notes.extend(notes);
    }

    /// Deliver everything queued, unless another caller is already doing so.
    pub fn flush(&self, mut deliver: impl FnMut(Notification)) {
        {
            let mut pending = self.lock();
            if pending.draining {
                return;
            }
            pending.draining = true;
        }
        let _release = Draining(self);
        loop {
            let next = {
                let mut pending = self.lock();
                let next = pending.notes.pop_front();
                if next.is_none() {
                    pending.draining = false;
                }
                next
            };
            match next {
                Some(note) => deliver(note),
                None => break,
            }
        }
    }
}

impl fmt::Debug for Outbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pending = self.lock();
        f.debug_struct("Outbox")
            .field("pending", &pending.notes.len())
            .field("draining", &pending.draining)
            .finish()
    }
}

/// Hands draining back if a callback panics.
struct Draining<'a>(&'a Outbox);

impl Drop for Draining<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.0.lock().draining = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_notifications_route_to_matching_callback() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (a, b) = (Arc::clone(&seen), Arc::clone(&seen));
        let callbacks = JobCallbacks::new()
            .on_status_change(move |_, status| a.lock().unwrap().push(format!("status:{status}")))
            .on_complete(move |_, ok| b.lock().unwrap().push(format!("complete:{ok}")));

        let id = JobId::from_string("j1");
        for event in [
            JobEvent::Progress { job_id: id.clone(), percent: 10.0 },
            JobEvent::StatusChanged { job_id: id.clone(), status: JobStatus::Processing },
            JobEvent::Completed { job_id: id.clone(), success: false },
        ] {
            Notification::new(callbacks.clone(), event).deliver();
        }

        assert_eq!(*seen.lock().unwrap(), vec!["status:processing", "complete:false"]);
    }

    #[test]
    fn test_event_serializes_with_type_tag() {
        let event = JobEvent::Completed {
            job_id: JobId::from_string("j1"),
            success: true,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "completed");
        assert_eq!(json["job_id"], "j1");
    }

    #[test]
    fn test_outbox_keeps_push_order_across_threads() {
        let outbox = Arc::new(Outbox::default());
        let delivered = Arc::new(Mutex::new(Vec::new()));
        let order = Arc::new(Mutex::new(0u32));

        std::thread::scope(|scope| {
            for _ in 0..4 {
                let (outbox, delivered, order) = (&outbox, &delivered, &order);
                scope.spawn(move || {
                    for _ in 0..250 {
                        {
                            // stands in for the service lock
                            let mut next = order.lock().unwrap();
                            *next += 1;
                            let id = JobId::from_string(next.to_string());
                            outbox.push([Notification::new(
                                JobCallbacks::new(),
                                JobEvent::Completed { job_id: id, success: true },
                            )]);
                        }
                        outbox.flush(|note| {
                            let n: u32 = note.event.job_id().as_str().parse().unwrap();
                            delivered.lock().unwrap().push(n);
                        });
                    }
                });
            }
        });

        let delivered = delivered.lock().unwrap().clone();
        assert_eq!(delivered, (1..=1000).collect::<Vec<_>>());
    }

    #[test]
    fn test_reentrant_push_is_delivered_by_the_active_drainer() {
        let outbox = Outbox::default();
        let id = JobId::from_string("j1");
        outbox.push([Notification::new(
            JobCallbacks::new(),
            JobEvent::StatusChanged { job_id: id.clone(), status: JobStatus::Processing },
        )]);

        let mut seen = Vec::new();
        outbox.flush(|note| {
            if let JobEvent::StatusChanged { .. } = note.event {
                outbox.push([Notification::new(
                    JobCallbacks::new(),
                    JobEvent::Completed { job_id: id.clone(), success: true },
                )]);
                // already draining: returns without delivering
                outbox.flush(|_| panic!("nested flush must not deliver"));
            }
            seen.push(note.event);
        });

        assert_eq!(seen.len(), 2);
        assert!(matches!(seen[1], JobEvent::Completed { .. }));
    }
}
