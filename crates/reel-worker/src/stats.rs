//! Queue snapshots and running service statistics.

use std::time::{Duration, Instant};

use serde::Serialize;

use reel_models::{JobStatus, ProcessingJob};

/// Count of jobs currently held by the service, per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStatus {
    pub pending: usize,
    pub queued: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub total: usize,
}

impl QueueStatus {
    pub fn from_jobs<'a>(jobs: impl IntoIterator<Item = &'a ProcessingJob>) -> Self {
        let mut status = Self::default();
        for job in jobs {
            status.total += 1;
            match job.status() {
                JobStatus::Pending => status.pending += 1,
                JobStatus::Queued => status.queued += 1,
                JobStatus::Processing => status.processing += 1,
                JobStatus::Completed => status.completed += 1,
                JobStatus::Failed => status.failed += 1,
                JobStatus::Cancelled => status.cancelled += 1,
            }
        }
        status
    }

    /// Jobs that still have work ahead of them.
    pub fn active(&self) -> usize {
        self.queued + self.processing
    }
}

/// Aggregate figures over every attempt the service has finished.
///
/// Unlike [`QueueStatus`] these survive `clear_completed_jobs`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceStatistics {
    pub total_jobs: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
    /// `completed / (completed + failed)`, 0 when neither happened.
    pub success_rate: f64,
    /// Mean wall time of completed jobs, in seconds.
    pub average_processing_time: f64,
    pub throughput_per_hour: f64,
}

#[derive(Debug)]
pub(crate) struct RunningStats {
    started: Instant,
    submitted: u64,
    completed: u64,
    failed: u64,
    cancelled: u64,
    processing_time: Duration,
}

impl Default for RunningStats {
    fn default() -> Self {
        Self {
            started: Instant::now(),
            submitted: 0,
            completed: 0,
            failed: 0,
            cancelled: 0,
            processing_time: Duration::ZERO,
        }
    }
}

impl RunningStats {
    pub fn record_submitted(&mut self) {
        self.submitted += 1;
    }

    /// Count a terminal outcome. Only completed runs feed the average.
    pub fn record_terminal(&mut self, status: JobStatus, elapsed: Option<Duration>) {
        match status {
            JobStatus::Completed => {
                self.completed += 1;
                self.processing_time += elapsed.unwrap_or_default();
            }
            JobStatus::Failed => self.failed += 1,
            JobStatus::Cancelled => self.cancelled += 1,
            _ => {}
        }
    }

    pub fn snapshot(&self) -> ServiceStatistics {
        self.snapshot_at(self.started.elapsed())
    }

    fn snapshot_at(&self, uptime: Duration) -> ServiceStatistics {
        let finished = self.completed + self.failed;
        let success_rate = if finished == 0 {
            0.0
        } else {
            self.completed as f64 / finished as f64
        };
        let average_processing_time = if self.completed == 0 {
            0.0
        } else {
            self.processing_time.as_secs_f64() / self.completed as f64
        };
        let hours = uptime.as_secs_f64() / 3600.0;
        let throughput_per_hour = if hours > 0.0 {
            self.completed as f64 / hours
        } else {
            0.0
        };

        ServiceStatistics {
            total_jobs: self.submitted,
            completed: self.completed,
            failed: self.failed,
            cancelled: self.cancelled,
            success_rate,
            average_processing_time,
            throughput_per_hour,
        }
    }
}
