//! Application state.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use crowd_media::{DetectionConfig, FfmpegVideoOpener, FrameClassifier, VideoOpener};
use crowd_worker::{JobExecutor, JobRunner, TaskRegistry, WorkerConfig};
use tracing::info;

use crate::config::ApiConfig;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    pub registry: TaskRegistry,
    pub executor: JobExecutor,
    pub classifier: FrameClassifier,
    /// Where uploaded videos are stored until analyzed
    pub work_dir: PathBuf,
}

impl AppState {
    /// Create application state with the FFmpeg frame source and the
    /// configured person detection model.
    pub fn new(
        config: ApiConfig,
        worker_config: &WorkerConfig,
        detection: DetectionConfig,
    ) -> anyhow::Result<Self> {
        std::fs::create_dir_all(&worker_config.work_dir).with_context(|| {
            format!(
                "failed to create work directory {}",
                worker_config.work_dir.display()
            )
        })?;

        let classifier = FrameClassifier::from_config(detection);
        info!(
            model_loaded = classifier.is_available(),
            detector = classifier.detector_name().unwrap_or("none"),
            "Frame classifier ready"
        );

        Ok(Self::with_components(
            config,
            worker_config,
            classifier,
            Arc::new(FfmpegVideoOpener),
        ))
    }

    /// Assemble state from explicit components.
    pub fn with_components(
        config: ApiConfig,
        worker_config: &WorkerConfig,
        classifier: FrameClassifier,
        opener: Arc<dyn VideoOpener>,
    ) -> Self {
        let registry = TaskRegistry::new();
        let runner = JobRunner::new(opener, classifier.clone());
        let executor = JobExecutor::new(worker_config, registry.clone(), runner);

        Self {
            config,
            registry,
            executor,
            classifier,
            work_dir: worker_config.work_dir.clone(),
        }
    }
}
