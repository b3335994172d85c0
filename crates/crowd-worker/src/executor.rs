//! Job executor.
//!
//! Registers submitted videos and runs them in the background, at most
//! `max_concurrent_jobs` at a time. Submissions beyond that wait for a permit
//! and stay visible as `processing` with zero progress meanwhile.

use std::sync::Arc;
use std::time::Duration;

use crowd_models::{TaskId, TaskRecord};
use tempfile::TempPath;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::config::WorkerConfig;
use crate::error::WorkerResult;
use crate::metrics;
use crate::registry::TaskRegistry;
use crate::runner::JobRunner;

/// An uploaded video ready for analysis.
#[derive(Debug)]
pub struct VideoSubmission {
    /// Client-supplied grouping key
    pub bus_id: String,
    pub filename: Option<String>,
    pub file_size: u64,
    /// The stored upload; deleted once the analysis ends
    pub video: TempPath,
}

/// Bounded background executor for analysis runs.
#[derive(Clone)]
pub struct JobExecutor {
    registry: TaskRegistry,
    runner: JobRunner,
    job_semaphore: Arc<Semaphore>,
    max_concurrent_jobs: usize,
}

impl JobExecutor {
    pub fn new(config: &WorkerConfig, registry: TaskRegistry, runner: JobRunner) -> Self {
        let max_concurrent_jobs = config.max_concurrent_jobs.max(1);
        info!(
            "Job executor ready with {} max concurrent jobs",
            max_concurrent_jobs
        );
        Self {
            registry,
            runner,
            job_semaphore: Arc::new(Semaphore::new(max_concurrent_jobs)),
            max_concurrent_jobs,
        }
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    /// Register a task for `submission` and start it in the background.
    ///
    /// Returns as soon as the record is readable; the analysis itself runs
    /// detached from the caller.
    pub async fn submit(&self, submission: VideoSubmission) -> WorkerResult<TaskId> {
        let VideoSubmission {
            bus_id,
            filename,
            file_size,
            video,
        } = submission;

        let record = TaskRecord::new(TaskId::new(), bus_id, filename, file_size);
        let writer = self.registry.create(record).await?;
        let task_id = writer.task_id().clone();
        metrics::record_task_submitted();

        let semaphore = Arc::clone(&self.job_semaphore);
        let runner = self.runner.clone();
        let queued_id = task_id.clone();

        tokio::spawn(async move {
            let permit = match semaphore.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    warn!(task_id = %queued_id, "Executor closed before task could start");
                    writer.fail("Service shutting down").await;
                    metrics::record_task_failed("open");
                    // `video` drops here, deleting the upload.
                    return;
                }
            };
            let _permit = permit;
            debug!(task_id = %queued_id, "Task acquired runner slot");
            runner.run(writer, video).await;
        });

        Ok(task_id)
    }

    /// Number of analyses currently holding a runner slot.
    pub fn active_jobs(&self) -> usize {
        self.max_concurrent_jobs
            .saturating_sub(self.job_semaphore.available_permits())
    }

    /// Stop admitting queued tasks; they fail with a shutdown cause.
    pub fn shutdown(&self) {
        self.job_semaphore.close();
    }

    /// Wait until no analysis holds a slot, or `timeout` elapses.
    pub async fn wait_for_jobs(&self, timeout: Duration) -> bool {
        let wait = async {
            while self.active_jobs() > 0 {
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        };
        tokio::time::timeout(timeout, wait).await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::StatusCounts;
    use async_trait::async_trait;
    use crowd_media::{
        DetectionConfig, FrameClassifier, FrameSource, MediaError, MediaResult, VideoOpener,
    };
    use crowd_models::TaskStatus;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Holds each open for a while, tracking how many overlap.
    #[derive(Default)]
    struct SlowOpener {
        active: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl VideoOpener for SlowOpener {
        async fn open(&self, _path: &Path) -> MediaResult<Box<dyn FrameSource>> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(40)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            Err(MediaError::invalid_video("test video"))
        }
    }

    /// Panics inside the runner instead of returning an error.
    struct PanickingOpener;

    #[async_trait]
    impl VideoOpener for PanickingOpener {
        async fn open(&self, _path: &Path) -> MediaResult<Box<dyn FrameSource>> {
            panic!("decoder bug");
        }
    }

    fn executor(max_jobs: usize, opener: Arc<dyn VideoOpener>) -> JobExecutor {
        let config = WorkerConfig {
            max_concurrent_jobs: max_jobs,
            ..WorkerConfig::default()
        };
        let runner = JobRunner::new(opener, FrameClassifier::new(None, DetectionConfig::default()));
        JobExecutor::new(&config, TaskRegistry::new(), runner)
    }

    fn submission() -> VideoSubmission {
        VideoSubmission {
            bus_id: "bus-3".to_string(),
            filename: Some("clip.mp4".to_string()),
            file_size: 12,
            video: tempfile::NamedTempFile::new().unwrap().into_temp_path(),
        }
    }

    async fn wait_until_settled(registry: &TaskRegistry, expected: usize) -> StatusCounts {
        for _ in 0..200 {
            let counts = registry.status_counts().await;
            if counts.processing == 0 && counts.total() == expected {
                return counts;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        registry.status_counts().await
    }

    #[tokio::test]
    async fn test_submit_is_immediately_visible() {
        let exec = executor(1, Arc::new(SlowOpener::default()));
        let task_id = exec.submit(submission()).await.unwrap();

        let record = exec.registry().read(&task_id).await.unwrap();
        assert_eq!(record.status, TaskStatus::Processing);
        assert_eq!(record.progress, 0);
        assert_eq!(record.bus_id, "bus-3");
        assert_eq!(record.filename.as_deref(), Some("clip.mp4"));
    }

    #[tokio::test]
    async fn test_runners_are_bounded() {
        let opener = Arc::new(SlowOpener::default());
        let exec = executor(2, opener.clone());

        for _ in 0..5 {
            exec.submit(submission()).await.unwrap();
        }

        let counts = wait_until_settled(exec.registry(), 5).await;
        assert_eq!(counts.error, 5);
        assert!(opener.peak.load(Ordering::SeqCst) <= 2);
        assert!(exec.wait_for_jobs(Duration::from_secs(1)).await);
        assert_eq!(exec.active_jobs(), 0);
    }

    #[tokio::test]
    async fn test_panicking_runner_fails_task() {
        let exec = executor(1, Arc::new(PanickingOpener));
        let sub = submission();
        let upload = sub.video.to_path_buf();
        let task_id = exec.submit(sub).await.unwrap();

        let counts = wait_until_settled(exec.registry(), 1).await;
        assert_eq!(counts.error, 1);

        let record = exec.registry().read(&task_id).await.unwrap();
        assert_eq!(record.status, TaskStatus::Error);
        assert_eq!(record.error.as_deref(), Some(crate::registry::ABORTED_CAUSE));
        assert!(!upload.exists());

        // The slot is released for the next task.
        assert!(exec.wait_for_jobs(Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn test_shutdown_fails_queued_tasks() {
        let exec = executor(1, Arc::new(SlowOpener::default()));
        exec.shutdown();
        let task_id = exec.submit(submission()).await.unwrap();

        wait_until_settled(exec.registry(), 1).await;
        let record = exec.registry().read(&task_id).await.unwrap();
        assert_eq!(record.status, TaskStatus::Error);
        assert_eq!(record.error.as_deref(), Some("Service shutting down"));
    }
}
