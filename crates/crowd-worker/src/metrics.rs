//! Analysis engine metrics.
//!
//! Recorded through the `metrics` facade; the API binary installs the
//! Prometheus recorder that exports them.

use metrics::{counter, gauge, histogram};

/// Metric names as constants for consistency.
pub mod names {
    pub const TASKS_SUBMITTED_TOTAL: &str = "crowd_tasks_submitted_total";
    pub const TASKS_COMPLETED_TOTAL: &str = "crowd_tasks_completed_total";
    pub const TASKS_FAILED_TOTAL: &str = "crowd_tasks_failed_total";
    pub const TASKS_EVICTED_TOTAL: &str = "crowd_tasks_evicted_total";
    pub const FRAMES_PROCESSED_TOTAL: &str = "crowd_frames_processed_total";
    pub const FRAMES_SKIPPED_TOTAL: &str = "crowd_frames_skipped_total";
    pub const RUNNERS_ACTIVE: &str = "crowd_runners_active";
    pub const FRAME_CLASSIFY_SECONDS: &str = "crowd_frame_classify_seconds";
}

pub fn record_task_submitted() {
    counter!(names::TASKS_SUBMITTED_TOTAL).increment(1);
}

pub fn record_task_completed() {
    counter!(names::TASKS_COMPLETED_TOTAL).increment(1);
}

/// `stage` is `open`, `processing` or `aborted`.
pub fn record_task_failed(stage: &'static str) {
    counter!(names::TASKS_FAILED_TOTAL, "stage" => stage).increment(1);
}

pub fn record_tasks_evicted(count: usize) {
    counter!(names::TASKS_EVICTED_TOTAL).increment(count as u64);
}

pub fn record_frame_processed(classify_secs: f64) {
    counter!(names::FRAMES_PROCESSED_TOTAL).increment(1);
    histogram!(names::FRAME_CLASSIFY_SECONDS).record(classify_secs);
}

pub fn record_frame_skipped() {
    counter!(names::FRAMES_SKIPPED_TOTAL).increment(1);
}

/// Counts a runner as active until dropped, including on unwind.
pub struct ActiveRunner(());

impl ActiveRunner {
    pub fn start() -> Self {
        gauge!(names::RUNNERS_ACTIVE).increment(1.0);
        Self(())
    }
}

impl Drop for ActiveRunner {
    fn drop(&mut self) {
        gauge!(names::RUNNERS_ACTIVE).decrement(1.0);
    }
}
