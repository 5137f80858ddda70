//! # LexFlow Jobs
//!
//! Multi-queue job processing engine with durable job state, worker
//! pools, leases, and retry with exponential backoff.
//!
//! The engine serves a fixed set of queues. Callers enqueue typed
//! payloads and poll job state until a terminal status; worker pools
//! claim jobs under visibility-timeout leases, run application-supplied
//! handlers, and report results back through the record store, which is
//! the single authoritative source of job state.
//!
//! ## Example
//!
//! ```no_run
//! use lexflow_jobs::{handler_fn, JobEngine, JobControl, JobOptions, JobsConfig, QueueName};
//! use lexflow_jobs::store::MemoryJobStore;
//! use std::sync::Arc;
//!
//! # async fn run() -> lexflow_core::LexResult<()> {
//! let store = Arc::new(MemoryJobStore::new(60_000));
//! let engine = JobEngine::new(store, JobsConfig::default());
//!
//! let job = engine
//!     .enqueue(
//!         QueueName::DocumentProcessing,
//!         serde_json::json!({ "docId": 42 }),
//!         JobOptions::default(),
//!     )
//!     .await?;
//!
//! let pool = engine.worker_pool(
//!     QueueName::DocumentProcessing,
//!     handler_fn(|_payload, progress| async move {
//!         progress.report(50).await?;
//!         Ok(serde_json::json!({ "ok": true }))
//!     }),
//! );
//! # let _ = (job, pool);
//! # Ok(())
//! # }
//! ```

pub mod cancel;
pub mod config;
pub mod dispatcher;
pub mod engine;
pub mod job;
pub mod metrics;
pub mod retry;
pub mod stats;
pub mod store;
pub mod worker;

pub use cancel::CancelRegistry;
pub use config::{JobsConfig, QueueTuning, StoreBackend};
pub use dispatcher::Dispatcher;
pub use engine::{JobControl, JobEngine};
pub use job::{
    JobId, JobOptions, JobPayload, JobRecord, JobStatus, ProcessingStatus, QueueName,
};
pub use retry::{RetryController, RetryPolicy};
pub use stats::{EngineHealth, HealthStatus, QueueCounts, QueueStats, StatsAggregator};
pub use store::{JobStore, MemoryJobStore, RedisJobStore};
pub use worker::{handler_fn, JobHandler, ProgressHandle, WorkerPool};
