use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::media::Action;
use crate::queue::{BackoffStrategy, RetryPolicy};

pub const CONFIG_VERSION: &str = "1.0";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub version: String,
    /// SQLite file. Defaults to `~/.mediaqueue/data/mediaqueue.db`.
    #[serde(default)]
    pub database_path: Option<PathBuf>,
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub actions: ActionsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_worker_count() -> usize {
    num_cpus::get()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION.to_string(),
            database_path: None,
            worker_count: default_worker_count(),
            worker: WorkerConfig::default(),
            scheduler: SchedulerConfig::default(),
            retry: RetryConfig::default(),
            actions: ActionsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Configured database path, falling back to the per-user default.
    pub fn resolved_database_path(&self) -> Option<PathBuf> {
        self.database_path
            .clone()
            .or_else(crate::db::default_database_path)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Idle wait between claim attempts when the queue is empty.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// How long a claim is reserved to its worker. Must outlast the longest action.
    #[serde(default = "default_lease_secs")]
    pub lease_secs: u64,
    /// Attempts for a queue call that fails with a persistence error.
    #[serde(default = "default_store_retry_attempts")]
    pub store_retry_attempts: u32,
    #[serde(default = "default_store_retry_base_ms")]
    pub store_retry_base_ms: u64,
    /// Capacity of the worker event channel.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_lease_secs() -> u64 {
    300
}

fn default_store_retry_attempts() -> u32 {
    5
}

fn default_store_retry_base_ms() -> u64 {
    100
}

fn default_event_capacity() -> usize {
    256
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            lease_secs: default_lease_secs(),
            store_retry_attempts: default_store_retry_attempts(),
            store_retry_base_ms: default_store_retry_base_ms(),
            event_capacity: default_event_capacity(),
        }
    }
}

impl WorkerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn lease(&self) -> Duration {
        Duration::from_secs(self.lease_secs)
    }

    /// Backoff between persistence retries at the worker boundary.
    pub fn store_retry(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.store_retry_attempts,
            base_delay: Duration::from_millis(self.store_retry_base_ms),
            max_delay: Duration::from_millis(self.store_retry_base_ms.saturating_mul(32)),
            strategy: BackoffStrategy::Exponential,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_reclaim_interval_secs")]
    pub reclaim_interval_secs: u64,
    #[serde(default)]
    pub deferrals: DeferralsConfig,
}

fn default_reclaim_interval_secs() -> u64 {
    30
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            reclaim_interval_secs: default_reclaim_interval_secs(),
            deferrals: DeferralsConfig::default(),
        }
    }
}

impl SchedulerConfig {
    pub fn reclaim_interval(&self) -> Duration {
        Duration::from_secs(self.reclaim_interval_secs)
    }
}

/// Default delay between scheduling an action and it becoming due.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeferralsConfig {
    #[serde(default)]
    pub encode_secs: u64,
    #[serde(default = "default_upload_deferral_secs")]
    pub upload_secs: u64,
    #[serde(default)]
    pub publish_secs: u64,
}

fn default_upload_deferral_secs() -> u64 {
    300
}

impl Default for DeferralsConfig {
    fn default() -> Self {
        Self {
            encode_secs: 0,
            upload_secs: default_upload_deferral_secs(),
            publish_secs: 0,
        }
    }
}

impl DeferralsConfig {
    pub fn for_action(&self, action: Action) -> Duration {
        Duration::from_secs(match action {
            Action::Encode => self.encode_secs,
            Action::Upload => self.upload_secs,
            Action::Publish => self.publish_secs,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default)]
    pub strategy: BackoffStrategy,
}

fn default_max_attempts() -> u32 {
    5
}

fn default_base_delay_ms() -> u64 {
    10_000
}

fn default_max_delay_ms() -> u64 {
    3_600_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            strategy: BackoffStrategy::default(),
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            strategy: self.strategy,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionsConfig {
    /// Video extensions that need real encoding; others pass straight through.
    #[serde(default = "default_encodable_extensions")]
    pub encodable_extensions: Vec<String>,
    /// Upper bound of the simulated work time per action.
    #[serde(default = "default_max_jitter_ms")]
    pub max_jitter_ms: u64,
}

fn default_encodable_extensions() -> Vec<String> {
    vec![".wma".to_string()]
}

fn default_max_jitter_ms() -> u64 {
    60_000
}

impl Default for ActionsConfig {
    fn default() -> Self {
        Self {
            encodable_extensions: default_encodable_extensions(),
            max_jitter_ms: default_max_jitter_ms(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}
