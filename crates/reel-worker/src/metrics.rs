//! Job metrics.
//!
//! Recorded through the `metrics` facade; nothing is exported until the
//! embedding application installs a recorder.

use metrics::{counter, histogram};

/// Metric names as constants for consistency.
pub mod names {
    pub const JOBS_SUBMITTED_TOTAL: &str = "reel_jobs_submitted_total";
    pub const JOBS_COMPLETED_TOTAL: &str = "reel_jobs_completed_total";
    pub const JOBS_FAILED_TOTAL: &str = "reel_jobs_failed_total";
    pub const JOBS_CANCELLED_TOTAL: &str = "reel_jobs_cancelled_total";
    pub const JOB_DURATION_SECONDS: &str = "reel_job_duration_seconds";
}

pub fn record_job_submitted(effects: usize) {
    let labels = [("has_effects", (effects > 0).to_string())];
    counter!(names::JOBS_SUBMITTED_TOTAL, &labels).increment(1);
}

pub fn record_job_completed(duration_secs: f64) {
    counter!(names::JOBS_COMPLETED_TOTAL).increment(1);
    histogram!(names::JOB_DURATION_SECONDS).record(duration_secs);
}

/// `reason` is a short, low-cardinality tag such as "transcoder" or "panic".
pub fn record_job_failed(reason: &str) {
    let labels = [("reason", reason.to_string())];
    counter!(names::JOBS_FAILED_TOTAL, &labels).increment(1);
}

/// `stage` is "queued" or "processing".
pub fn record_job_cancelled(stage: &str) {
    let labels = [("stage", stage.to_string())];
    counter!(names::JOBS_CANCELLED_TOTAL, &labels).increment(1);
}
