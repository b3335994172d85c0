//! Job runner: drives one uploaded video from open to terminal status.
//!
//! ```text
//! Starting ──open ok──▶ Running ──end of stream──▶ Completed
//!    │                     │
//!    └──open failed──▶ Failed ◀──classifier/read error
//! ```
//!
//! Every processed frame is written to the registry right away, so status
//! queries see the timeline grow. The uploaded file is deleted on every exit
//! path.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Instant;

use crowd_media::{FrameClassifier, FrameRead, FrameSource, VideoOpener};
use crowd_models::FrameClassification;
use image::RgbImage;
use tempfile::TempPath;
use tracing::{debug, enabled, trace, Instrument, Level};

use crate::error::{WorkerError, WorkerResult};
use crate::logging::JobLogger;
use crate::metrics;
use crate::registry::TaskWriter;
use crate::tracker::AggregationTracker;

/// Frames between periodic progress log lines.
const LOG_EVERY_FRAMES: u64 = 30;

/// Runs analyses. Cheap to clone; one instance serves every task.
#[derive(Clone)]
pub struct JobRunner {
    opener: Arc<dyn VideoOpener>,
    classifier: FrameClassifier,
}

impl JobRunner {
    pub fn new(opener: Arc<dyn VideoOpener>, classifier: FrameClassifier) -> Self {
        Self { opener, classifier }
    }

    /// Analyze `video` and write the outcome through `writer`.
    ///
    /// Never returns an error: failures end up in the task record.
    pub async fn run(&self, writer: TaskWriter, video: TempPath) {
        let logger = JobLogger::new(writer.task_id(), "crowd_analysis");
        let span = logger.create_span();

        async move {
            let _active = metrics::ActiveRunner::start();
            self.run_inner(writer, video, &logger).await;
        }
        .instrument(span)
        .await
    }

    async fn run_inner(&self, writer: TaskWriter, video: TempPath, logger: &JobLogger) {
        logger.log_start(&format!("analyzing {}", video.display()));

        // Starting
        let mut source = match self.opener.open(&video).await {
            Ok(source) => source,
            Err(e) => {
                let err = WorkerError::open_failed(e.to_string());
                logger.log_error(&err.to_string());
                writer.fail(err.to_string()).await;
                metrics::record_task_failed("open");
                remove_upload(video, logger);
                return;
            }
        };

        let fps = source.frame_rate().max(1);
        let total_frames = source.total_frames().max(1);
        writer.update(|r| r.set_source(fps, total_frames)).await;
        logger.log_progress(&format!("{} frames at {} fps", total_frames, fps));

        // Running
        let mut tracker = AggregationTracker::new();
        let result = self
            .process_frames(&writer, source.as_mut(), &mut tracker, logger)
            .await;
        source.close().await;
        remove_upload(video, logger);

        match result {
            Ok(()) => {
                if tracker.is_degenerate() {
                    logger.log_warning(&format!(
                        "all {} frames had the same count ({})",
                        tracker.frames_observed(),
                        tracker.count_range().max
                    ));
                }
                let distinct: Vec<u32> = tracker.distinct_counts().collect();
                let summary = tracker.into_summary();
                let message = match summary.peak {
                    Some(peak) => format!(
                        "{} frames, max {} ({}) at {:.2}s, distinct counts {:?}",
                        summary.frames_processed, peak.count, peak.level, peak.timestamp, distinct
                    ),
                    None => "no frames decoded".to_string(),
                };
                writer.complete(summary).await;
                metrics::record_task_completed();
                logger.log_completion(&message);
            }
            Err(e) => {
                logger.log_error(&format!(
                    "failed after {} frames: {}",
                    tracker.frames_observed(),
                    e
                ));
                writer.fail(e.to_string()).await;
                metrics::record_task_failed("processing");
            }
        }
    }

    async fn process_frames(
        &self,
        writer: &TaskWriter,
        source: &mut dyn FrameSource,
        tracker: &mut AggregationTracker,
        logger: &JobLogger,
    ) -> WorkerResult<()> {
        let fps = source.frame_rate().max(1) as f64;
        let total_frames = source.total_frames().max(1);
        let mut frame_index: u64 = 0;

        loop {
            let frame = match source.next_frame().await? {
                FrameRead::EndOfStream => break,
                FrameRead::Skipped => {
                    debug!(frame = frame_index, "Skipping undecodable frame");
                    metrics::record_frame_skipped();
                    frame_index += 1;
                    let progress = progress_percent(frame_index, total_frames);
                    writer.update(|r| r.advance_progress(progress)).await;
                    continue;
                }
                FrameRead::Frame(frame) => frame,
            };

            if enabled!(Level::TRACE) {
                trace!(
                    frame = frame_index,
                    fingerprint = format_args!("{:016x}", fingerprint(&frame)),
                    "Frame fingerprint"
                );
            }

            let timestamp = frame_index as f64 / fps;
            let started = Instant::now();
            let classification = self.classify(frame).await?;
            metrics::record_frame_processed(started.elapsed().as_secs_f64());

            let is_peak = tracker.observe(timestamp, classification.count, classification.level);
            frame_index += 1;

            let progress = progress_percent(frame_index, total_frames);
            let peak = if is_peak { tracker.peak() } else { None };
            if let Some(entry) = tracker.last().cloned() {
                writer
                    .update(|r| r.record_frame(entry, progress, peak))
                    .await;
            }

            if is_peak || (frame_index - 1) % LOG_EVERY_FRAMES == 0 {
                let max = tracker.peak().map(|p| p.count).unwrap_or(0);
                logger.log_progress(&format!(
                    "frame {} | {:.1}s | count {} | max so far {} | {} | {}%",
                    frame_index - 1,
                    timestamp,
                    classification.count,
                    max,
                    classification.level,
                    progress
                ));
            }
        }

        Ok(())
    }

    /// Classify on the blocking pool so inference never stalls the reactor.
    async fn classify(&self, frame: RgbImage) -> WorkerResult<FrameClassification> {
        let classifier = self.classifier.clone();
        let result = tokio::task::spawn_blocking(move || classifier.classify(frame))
            .await
            .map_err(|e| WorkerError::processing_failed(format!("classifier task failed: {}", e)))?;
        Ok(result?)
    }
}

/// Whole percent of frames consumed, capped at 100.
pub(crate) fn progress_percent(consumed: u64, total: u64) -> u8 {
    let total = total.max(1);
    (consumed.saturating_mul(100) / total).min(100) as u8
}

/// Cheap content fingerprint over the first 1000 bytes of a frame.
fn fingerprint(frame: &RgbImage) -> u64 {
    let raw = frame.as_raw();
    let mut hasher = DefaultHasher::new();
    raw[..raw.len().min(1000)].hash(&mut hasher);
    hasher.finish()
}

fn remove_upload(video: TempPath, logger: &JobLogger) {
    let path = video.to_path_buf();
    if let Err(e) = video.close() {
        logger.log_warning(&format!(
            "failed to delete upload {}: {}",
            path.display(),
            e
        ));
    }
}
