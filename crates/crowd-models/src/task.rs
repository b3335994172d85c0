//! Video analysis task records.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::utils::round_to;
use crate::CrowdLevel;

/// Unique identifier for a task.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct TaskId(pub String);

impl TaskId {
    /// Generate a new random task ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Task lifecycle status. Only `Processing -> Completed | Error` is allowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Processing,
    Completed,
    Error,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Error => "error",
        }
    }

    /// Check if this is a terminal state (no more updates expected).
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Error)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One successfully processed frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TimelineEntry {
    /// Seconds from the start of the video, rounded to 2 decimals
    pub timestamp: f64,
    pub count: u32,
    pub level: CrowdLevel,
}

impl TimelineEntry {
    pub fn new(timestamp: f64, count: u32, level: CrowdLevel) -> Self {
        Self {
            timestamp: round_to(timestamp, 2),
            count,
            level,
        }
    }
}

/// The frame holding the maximum count observed so far.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PeakFrame {
    pub count: u32,
    pub level: CrowdLevel,
    pub timestamp: f64,
}

/// Min/max of the distinct count values seen in a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
pub struct CountRange {
    pub min: u32,
    pub max: u32,
}

/// Final aggregation handed to [`TaskRecord::complete`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AnalysisSummary {
    pub timeline: Vec<TimelineEntry>,
    pub peak: Option<PeakFrame>,
    pub frames_processed: usize,
    pub unique_count_values: usize,
    pub count_range: CountRange,
}

/// Status record of one video analysis task, as returned to status queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TaskRecord {
    pub task_id: TaskId,

    pub status: TaskStatus,

    /// Client-supplied grouping key
    pub bus_id: String,

    /// Original upload file name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,

    /// Upload size in bytes
    pub file_size: u64,

    pub started_at: DateTime<Utc>,

    /// Set once, when the task reaches a terminal status
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,

    /// Progress (0-100)
    pub progress: u8,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub fps: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_frames: Option<u64>,

    /// One entry per processed frame, in frame order
    #[serde(default)]
    pub timeline: Vec<TimelineEntry>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_count: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_level: Option<CrowdLevel>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_timestamp: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_frames_processed: Option<usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub unique_count_values: Option<usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub count_range: Option<CountRange>,

    /// Failure cause, present only when status is `error`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TaskRecord {
    /// Create a fresh record in `processing` state with an empty timeline.
    pub fn new(
        task_id: TaskId,
        bus_id: impl Into<String>,
        filename: Option<String>,
        file_size: u64,
    ) -> Self {
        Self {
            task_id,
            status: TaskStatus::Processing,
            bus_id: bus_id.into(),
            filename,
            file_size,
            started_at: Utc::now(),
            completed_at: None,
            progress: 0,
            fps: None,
            total_frames: None,
            timeline: Vec::new(),
            max_count: None,
            max_level: None,
            max_timestamp: None,
            total_frames_processed: None,
            unique_count_values: None,
            count_range: None,
            error: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Record the source's frame rate and frame count once it is opened.
    pub fn set_source(&mut self, fps: u32, total_frames: u64) {
        if self.is_terminal() {
            return;
        }
        self.fps = Some(fps);
        self.total_frames = Some(total_frames.max(1));
    }

    /// Append a processed frame and move progress/peak forward.
    ///
    /// Progress never decreases; `total_frames` grows if the source reported
    /// fewer frames than it actually delivered. Returns false on a terminal record.
    pub fn record_frame(&mut self, entry: TimelineEntry, progress: u8, peak: Option<PeakFrame>) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.timeline.push(entry);
        let seen = self.timeline.len() as u64;
        if let Some(total) = self.total_frames.as_mut() {
            if *total < seen {
                *total = seen;
            }
        }
        self.bump_progress(progress);
        if let Some(peak) = peak {
            self.apply_peak(&peak);
        }
        true
    }

    /// Move progress forward for a frame that was consumed but not recorded.
    ///
    /// Returns false on a terminal record.
    pub fn advance_progress(&mut self, progress: u8) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.bump_progress(progress);
        true
    }

    fn bump_progress(&mut self, progress: u8) {
        self.progress = self.progress.max(progress.min(100));
    }

    fn apply_peak(&mut self, peak: &PeakFrame) {
        self.max_count = Some(peak.count);
        self.max_level = Some(peak.level);
        self.max_timestamp = Some(round_to(peak.timestamp, 2));
    }

    /// Transition to `completed` with the final aggregation.
    ///
    /// Returns false (and changes nothing) if the record is already terminal.
    pub fn complete(&mut self, summary: AnalysisSummary) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.timeline = summary.timeline;
        match summary.peak {
            Some(peak) => self.apply_peak(&peak),
            None => {
                self.max_count = Some(0);
                self.max_level = Some(CrowdLevel::Low);
                self.max_timestamp = Some(0.0);
            }
        }
        self.total_frames_processed = Some(summary.frames_processed);
        self.unique_count_values = Some(summary.unique_count_values);
        self.count_range = Some(summary.count_range);
        self.progress = 100;
        self.status = TaskStatus::Completed;
        self.completed_at = Some(Utc::now());
        true
    }

    /// Transition to `error`, keeping whatever partial results were recorded.
    ///
    /// Returns false (and changes nothing) if the record is already terminal.
    pub fn fail(&mut self, cause: impl Into<String>) -> bool {
        if self.is_terminal() {
            return false;
        }
        let cause = cause.into();
        self.error = Some(if cause.trim().is_empty() {
            "Video processing failed".to_string()
        } else {
            cause
        });
        self.status = TaskStatus::Error;
        self.completed_at = Some(Utc::now());
        true
    }

    /// True if the record reached a terminal status before `cutoff`.
    pub fn finished_before(&self, cutoff: DateTime<Utc>) -> bool {
        self.is_terminal() && self.completed_at.map(|at| at < cutoff).unwrap_or(false)
    }
}
