//! Builder patterns for creating test configurations.

#![allow(dead_code)]

use mediaqueue::config::schema::{
    ActionsConfig, Config, LoggingConfig, RetryConfig, SchedulerConfig, WorkerConfig,
};
use mediaqueue::queue::BackoffStrategy;

/// Builder for creating `Config` instances.
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Defaults suited to tests: two workers, fast polling, no simulated work.
    pub fn new() -> Self {
        Self {
            config: Config {
                worker_count: 2,
                worker: WorkerConfig {
                    poll_interval_ms: 10,
                    store_retry_base_ms: 1,
                    ..WorkerConfig::default()
                },
                scheduler: SchedulerConfig::default(),
                retry: RetryConfig {
                    max_attempts: 3,
                    base_delay_ms: 0,
                    max_delay_ms: 0,
                    strategy: BackoffStrategy::Fixed,
                },
                actions: ActionsConfig {
                    max_jitter_ms: 0,
                    ..ActionsConfig::default()
                },
                logging: LoggingConfig::default(),
                ..Config::default()
            },
        }
    }

    pub fn worker_count(mut self, count: usize) -> Self {
        self.config.worker_count = count;
        self
    }

    pub fn lease_secs(mut self, secs: u64) -> Self {
        self.config.worker.lease_secs = secs;
        self
    }

    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.config.retry.max_attempts = attempts;
        self
    }

    /// Fixed retry backoff.
    pub fn retry_delay_ms(mut self, ms: u64) -> Self {
        self.config.retry.base_delay_ms = ms;
        self.config.retry.max_delay_ms = ms;
        self.config.retry.strategy = BackoffStrategy::Fixed;
        self
    }

    pub fn max_jitter_ms(mut self, ms: u64) -> Self {
        self.config.actions.max_jitter_ms = ms;
        self
    }

    pub fn encodable_extensions(mut self, extensions: &[&str]) -> Self {
        self.config.actions.encodable_extensions =
            extensions.iter().map(|e| e.to_string()).collect();
        self
    }

    pub fn upload_deferral_secs(mut self, secs: u64) -> Self {
        self.config.scheduler.deferrals.upload_secs = secs;
        self
    }

    pub fn reclaim_interval_secs(mut self, secs: u64) -> Self {
        self.config.scheduler.reclaim_interval_secs = secs;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
