//! Job engine configuration.

use crate::job::QueueName;
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Job engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct JobsConfig {
    /// Store backend selection.
    #[serde(default)]
    pub backend: StoreBackend,

    /// Redis connection settings, used when the backend is `redis`.
    #[serde(default)]
    pub redis: RedisConfig,

    /// Worker pool settings shared by all queues.
    #[serde(default)]
    pub worker: WorkerConfig,

    /// Lease settings.
    #[serde(default)]
    pub lease: LeaseConfig,

    /// Automatic retry backoff settings.
    #[serde(default)]
    pub retry: RetryConfig,

    /// Per-queue tuning.
    #[serde(default)]
    pub queues: QueuesConfig,

    /// Anti-starvation settings for claim ordering.
    #[serde(default)]
    pub priority: PriorityConfig,

    /// Health reporting settings.
    #[serde(default)]
    pub health: HealthConfig,
}

impl JobsConfig {
    /// Returns the tuning for a queue.
    #[must_use]
    pub const fn tuning(&self, queue: QueueName) -> &QueueTuning {
        match queue {
            QueueName::DocumentProcessing => &self.queues.document_processing,
            QueueName::UserRequests => &self.queues.user_requests,
            QueueName::AiAnalysis => &self.queues.ai_analysis,
        }
    }

    /// Builds the retry policy from the configured delays.
    #[must_use]
    pub const fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retry.base_delay_ms, self.retry.max_delay_ms)
    }
}

/// Which job store backend to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// In-process store, state lost on restart.
    #[default]
    Memory,
    /// Redis-backed durable store.
    Redis,
}

/// Redis connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Redis URL.
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Connection pool size.
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    /// Key namespace prefix.
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            pool_size: default_pool_size(),
            key_prefix: default_key_prefix(),
        }
    }
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_pool_size() -> usize {
    16
}

fn default_key_prefix() -> String {
    "lexflow:jobs".to_string()
}

/// Worker pool configuration shared by all queues.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Idle sleep between claim attempts, in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Grace period for in-flight handlers on shutdown, in seconds.
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
}

impl WorkerConfig {
    /// Poll interval as a `Duration`.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Shutdown grace period as a `Duration`.
    #[must_use]
    pub const fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
        }
    }
}

fn default_poll_interval_ms() -> u64 {
    200
}

fn default_shutdown_timeout_secs() -> u64 {
    30
}

/// Lease configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaseConfig {
    /// Lease duration granted on claim and renewal, in seconds.
    #[serde(default = "default_lease_duration_secs")]
    pub duration_secs: u64,

    /// Interval between expired-lease sweeps, in seconds.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl LeaseConfig {
    /// Lease duration as a `Duration`.
    #[must_use]
    pub const fn duration(&self) -> Duration {
        Duration::from_secs(self.duration_secs)
    }

    /// Sweep interval as a `Duration`.
    #[must_use]
    pub const fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            duration_secs: default_lease_duration_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

fn default_lease_duration_secs() -> u64 {
    60
}

fn default_sweep_interval_secs() -> u64 {
    5
}

/// Automatic retry backoff configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Delay before the first retry, in milliseconds.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Upper bound on any single backoff delay, in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

fn default_base_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    60_000
}

/// Tuning for a single queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueTuning {
    /// Worker pool size.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Default attempt bound for jobs on this queue.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Maximum handler execution time, in seconds.
    #[serde(default = "default_handler_timeout_secs")]
    pub handler_timeout_secs: u64,
}

impl QueueTuning {
    /// Handler timeout as a `Duration`.
    #[must_use]
    pub const fn handler_timeout(&self) -> Duration {
        Duration::from_secs(self.handler_timeout_secs)
    }
}

impl Default for QueueTuning {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            max_attempts: default_max_attempts(),
            handler_timeout_secs: default_handler_timeout_secs(),
        }
    }
}

fn default_concurrency() -> usize {
    2
}

fn default_max_attempts() -> u32 {
    3
}

fn default_handler_timeout_secs() -> u64 {
    300
}

/// Per-queue tuning block.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct QueuesConfig {
    #[serde(default)]
    pub document_processing: QueueTuning,

    #[serde(default)]
    pub user_requests: QueueTuning,

    #[serde(default)]
    pub ai_analysis: QueueTuning,
}

/// Anti-starvation claim ordering configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriorityConfig {
    /// Wait time worth one priority level, in milliseconds.
    ///
    /// A waiting job effectively gains one priority level per this many
    /// milliseconds of queue age, so low-priority work cannot starve.
    #[serde(default = "default_boost_ms")]
    pub boost_ms: i64,
}

impl Default for PriorityConfig {
    fn default() -> Self {
        Self {
            boost_ms: default_boost_ms(),
        }
    }
}

fn default_boost_ms() -> i64 {
    60_000
}

/// Health reporting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    /// Fraction of terminal jobs allowed to be failures before the
    /// engine reports unhealthy.
    #[serde(default = "default_failed_ratio_threshold")]
    pub failed_ratio_threshold: f64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            failed_ratio_threshold: default_failed_ratio_threshold(),
        }
    }
}

fn default_failed_ratio_threshold() -> f64 {
    0.5
}
