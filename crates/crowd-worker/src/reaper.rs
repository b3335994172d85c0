//! Background eviction of finished tasks.
//!
//! Terminal records are dropped once they have been finished for longer than
//! the configured TTL. Tasks that are still processing are never touched.

use std::time::Duration;

use tokio::time::interval;
use tracing::{debug, info};

use crate::config::WorkerConfig;
use crate::metrics;
use crate::registry::TaskRegistry;

pub struct TaskReaper {
    registry: TaskRegistry,
    ttl: Option<Duration>,
    reap_interval: Duration,
}

impl TaskReaper {
    pub fn new(registry: TaskRegistry, config: &WorkerConfig) -> Self {
        Self {
            registry,
            ttl: config.task_ttl,
            reap_interval: config.reap_interval,
        }
    }

    /// Run the eviction loop. Returns immediately when eviction is disabled.
    ///
    /// This function runs indefinitely and should be spawned as a background task.
    pub async fn run(&self) {
        let Some(ttl) = self.ttl else {
            info!("Task eviction is disabled");
            return;
        };

        info!(
            "Starting task reaper (ttl: {:?}, interval: {:?})",
            ttl, self.reap_interval
        );

        let mut ticker = interval(self.reap_interval);
        loop {
            ticker.tick().await;
            self.reap_once(ttl).await;
        }
    }

    /// Run a single eviction cycle.
    pub async fn reap_once(&self, ttl: Duration) -> usize {
        let evicted = self.registry.evict_terminal_older_than(ttl).await;
        if evicted > 0 {
            metrics::record_tasks_evicted(evicted);
            let remaining = self.registry.len().await;
            info!(evicted, remaining, "Evicted finished tasks");
        } else {
            debug!("No finished tasks to evict");
        }
        evicted
    }
}
