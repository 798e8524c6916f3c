use std::time::Duration;

use crate::ReconcileError;

fn default_retention_secs() -> u64 {
    3600
}
fn default_max_batch() -> usize {
    1000
}
fn default_concurrency() -> usize {
    8
}

/// Секция `[reconciler]`.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct ReconcilerConfig {
    /// Сколько запись может оставаться неполной, прежде чем её удалят.
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,
    /// Максимум кандидатов за один sweep.
    #[serde(default = "default_max_batch")]
    pub max_batch: usize,
    /// Сколько кандидатов удаляется одновременно.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Период для `run_periodic`. `None` — один sweep.
    #[serde(default)]
    pub interval_secs: Option<u64>,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            retention_secs: default_retention_secs(),
            max_batch: default_max_batch(),
            concurrency: default_concurrency(),
            interval_secs: None,
        }
    }
}

impl ReconcilerConfig {
    pub fn validate(&self) -> Result<(), ReconcileError> {
        if self.retention_secs == 0 {
            return Err(ReconcileError::Config("retention_secs must be > 0".into()));
        }
        if self.max_batch == 0 {
            return Err(ReconcileError::Config("max_batch must be > 0".into()));
        }
        if self.concurrency == 0 {
            return Err(ReconcileError::Config("concurrency must be > 0".into()));
        }
        if self.interval_secs == Some(0) {
            return Err(ReconcileError::Config("interval_secs must be > 0".into()));
        }
        Ok(())
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    pub fn interval(&self) -> Option<Duration> {
        self.interval_secs.map(Duration::from_secs)
    }
}
