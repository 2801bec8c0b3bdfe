mod master;

pub use master::{SkewCommand, SkewMaster};

use ballast_common::config::SkewConfig;

#[derive(Debug, Clone)]
pub struct SkewOptions {
    /// The smallest number of active tasks for which a split is considered.
    pub min_active_tasks: usize,
    /// The threshold used instead of `min_active_tasks` when the newly
    /// registered task is the last of its set.
    pub min_active_tasks_last: usize,
    /// Assumed compute speed in bytes per millisecond for tasks that have
    /// not reported one yet.
    pub default_compute_speed: f64,
}

impl From<&SkewConfig> for SkewOptions {
    fn from(config: &SkewConfig) -> Self {
        Self {
            min_active_tasks: config.min_active_tasks,
            min_active_tasks_last: config.min_active_tasks_last,
            default_compute_speed: config.default_compute_speed,
        }
    }
}
