//! Asynchronous video analysis engine.
//!
//! This crate provides:
//! - The task registry shared by the HTTP layer and the runners
//! - The aggregation tracker (timeline, running maximum, count diagnostics)
//! - The job runner driving one video from open to terminal status
//! - A bounded job executor and a reaper evicting old terminal tasks

pub mod config;
pub mod error;
pub mod executor;
pub mod logging;
pub mod metrics;
pub mod reaper;
pub mod registry;
pub mod runner;
pub mod tracker;

pub use config::WorkerConfig;
pub use error::{WorkerError, WorkerResult};
pub use executor::{JobExecutor, VideoSubmission};
pub use logging::JobLogger;
pub use reaper::TaskReaper;
pub use registry::{StatusCounts, TaskRegistry, TaskWriter};
pub use runner::JobRunner;
pub use tracker::AggregationTracker;
