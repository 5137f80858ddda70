//! Queue statistics and engine health.

use crate::job::QueueName;
use crate::store::JobStore;
use chrono::Utc;
use lexflow_core::LexResult;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Per-status job counts for one queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    pub waiting: u64,
    pub active: u64,
    pub completed: u64,
    pub failed: u64,
}

impl QueueCounts {
    /// Total jobs currently stored for the queue.
    #[must_use]
    pub const fn total(&self) -> u64 {
        self.waiting + self.active + self.completed + self.failed
    }

    /// Jobs that reached a terminal state.
    #[must_use]
    pub const fn terminal(&self) -> u64 {
        self.completed + self.failed
    }
}

/// Point-in-time snapshot of all queues, keyed the way the monitoring
/// client expects.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStats {
    pub document_processing: QueueCounts,
    pub user_requests: QueueCounts,
    pub ai_analysis: QueueCounts,
    /// Snapshot time, epoch milliseconds.
    pub timestamp: i64,
}

impl QueueStats {
    /// Returns the counts for a queue.
    #[must_use]
    pub const fn counts(&self, queue: QueueName) -> QueueCounts {
        match queue {
            QueueName::DocumentProcessing => self.document_processing,
            QueueName::UserRequests => self.user_requests,
            QueueName::AiAnalysis => self.ai_analysis,
        }
    }

    /// Sums counts across all queues.
    #[must_use]
    pub const fn aggregate(&self) -> QueueCounts {
        QueueCounts {
            waiting: self.document_processing.waiting
                + self.user_requests.waiting
                + self.ai_analysis.waiting,
            active: self.document_processing.active
                + self.user_requests.active
                + self.ai_analysis.active,
            completed: self.document_processing.completed
                + self.user_requests.completed
                + self.ai_analysis.completed,
            failed: self.document_processing.failed
                + self.user_requests.failed
                + self.ai_analysis.failed,
        }
    }
}

/// Engine health verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

/// Health report for the monitoring endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineHealth {
    pub status: HealthStatus,
    /// Report time, epoch milliseconds.
    pub timestamp: i64,
    /// Present only when unhealthy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl EngineHealth {
    #[must_use]
    pub fn healthy() -> Self {
        Self {
            status: HealthStatus::Healthy,
            timestamp: Utc::now().timestamp_millis(),
            reason: None,
        }
    }

    #[must_use]
    pub fn unhealthy(reason: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Unhealthy,
            timestamp: Utc::now().timestamp_millis(),
            reason: Some(reason.into()),
        }
    }
}

/// Computes queue statistics and health from the store.
pub struct StatsAggregator {
    store: Arc<dyn JobStore>,
    failed_ratio_threshold: f64,
}

impl StatsAggregator {
    /// Creates an aggregator over `store`.
    ///
    /// `failed_ratio_threshold` is the fraction of terminal jobs allowed
    /// to be failures before health degrades.
    pub fn new(store: Arc<dyn JobStore>, failed_ratio_threshold: f64) -> Self {
        Self {
            store,
            failed_ratio_threshold,
        }
    }

    /// Snapshots all queues.
    pub async fn snapshot(&self) -> LexResult<QueueStats> {
        let document_processing = self.store.counts(QueueName::DocumentProcessing).await?;
        let user_requests = self.store.counts(QueueName::UserRequests).await?;
        let ai_analysis = self.store.counts(QueueName::AiAnalysis).await?;

        Ok(QueueStats {
            document_processing,
            user_requests,
            ai_analysis,
            timestamp: Utc::now().timestamp_millis(),
        })
    }

    /// Reports engine health.
    ///
    /// Unhealthy when the store is unreachable or when the overall
    /// failure ratio crosses the configured threshold.
    pub async fn health(&self) -> EngineHealth {
        if let Err(err) = self.store.ping().await {
            return EngineHealth::unhealthy(format!("store unreachable: {}", err));
        }

        match self.snapshot().await {
            Ok(stats) => {
                let totals = stats.aggregate();
                let terminal = totals.terminal();
                if terminal > 0 {
                    let ratio = totals.failed as f64 / terminal as f64;
                    if ratio > self.failed_ratio_threshold {
                        return EngineHealth::unhealthy(format!(
                            "failure ratio {:.2} exceeds threshold {:.2}",
                            ratio, self.failed_ratio_threshold
                        ));
                    }
                }
                EngineHealth::healthy()
            }
            Err(err) => EngineHealth::unhealthy(format!("stats unavailable: {}", err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_counts_total_and_terminal() {
        let counts = QueueCounts {
            waiting: 2,
            active: 1,
            completed: 5,
            failed: 3,
        };
        assert_eq!(counts.total(), 11);
        assert_eq!(counts.terminal(), 8);
    }

    #[test]
    fn test_stats_serde_uses_camel_case() {
        let stats = QueueStats {
            document_processing: QueueCounts::default(),
            user_requests: QueueCounts::default(),
            ai_analysis: QueueCounts::default(),
            timestamp: 1_700_000_000_000,
        };
        let value = serde_json::to_value(&stats).unwrap();
        assert!(value.get("documentProcessing").is_some());
        assert!(value.get("userRequests").is_some());
        assert!(value.get("aiAnalysis").is_some());
        assert_eq!(value["timestamp"], json!(1_700_000_000_000_i64));
    }

    #[test]
    fn test_health_serde() {
        let health = EngineHealth::healthy();
        let value = serde_json::to_value(&health).unwrap();
        assert_eq!(value["status"], json!("healthy"));
        assert!(value.get("reason").is_none());

        let health = EngineHealth::unhealthy("store unreachable");
        let value = serde_json::to_value(&health).unwrap();
        assert_eq!(value["status"], json!("unhealthy"));
        assert_eq!(value["reason"], json!("store unreachable"));
    }

    #[test]
    fn test_aggregate_sums_queues() {
        let stats = QueueStats {
            document_processing: QueueCounts {
                waiting: 1,
                active: 2,
                completed: 3,
                failed: 0,
            },
            user_requests: QueueCounts {
                waiting: 4,
                active: 0,
                completed: 1,
                failed: 2,
            },
            ai_analysis: QueueCounts {
                waiting: 0,
                active: 1,
                completed: 0,
                failed: 1,
            },
            timestamp: 0,
        };
        let totals = stats.aggregate();
        assert_eq!(totals.waiting, 5);
        assert_eq!(totals.active, 3);
        assert_eq!(totals.completed, 4);
        assert_eq!(totals.failed, 3);
    }
}
