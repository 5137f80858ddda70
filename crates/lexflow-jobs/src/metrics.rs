//! Metrics instrumentation for the job engine.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};

/// Metric names.
pub mod names {
    pub const JOBS_ENQUEUED: &str = "lexflow_jobs_enqueued_total";
    pub const JOBS_CLAIMED: &str = "lexflow_jobs_claimed_total";
    pub const JOBS_COMPLETED: &str = "lexflow_jobs_completed_total";
    pub const JOBS_FAILED: &str = "lexflow_jobs_failed_total";
    pub const JOBS_RETRIED: &str = "lexflow_jobs_retried_total";
    pub const JOBS_REMOVED: &str = "lexflow_jobs_removed_total";
    pub const LEASES_RECLAIMED: &str = "lexflow_jobs_leases_reclaimed_total";
    pub const PROCESSING_DURATION: &str = "lexflow_jobs_processing_duration_seconds";
    pub const QUEUE_WAITING: &str = "lexflow_jobs_waiting";
    pub const QUEUE_ACTIVE: &str = "lexflow_jobs_active";
}

/// Registers metric descriptions with the installed recorder.
pub fn register_metrics() {
    describe_counter!(names::JOBS_ENQUEUED, "Jobs accepted onto a queue");
    describe_counter!(names::JOBS_CLAIMED, "Jobs claimed by workers");
    describe_counter!(names::JOBS_COMPLETED, "Jobs completed successfully");
    describe_counter!(names::JOBS_FAILED, "Jobs that failed terminally");
    describe_counter!(names::JOBS_RETRIED, "Jobs requeued for automatic retry");
    describe_counter!(names::JOBS_REMOVED, "Jobs removed by clients");
    describe_counter!(
        names::LEASES_RECLAIMED,
        "Expired leases reclaimed by the sweeper"
    );
    describe_histogram!(
        names::PROCESSING_DURATION,
        "Handler execution time in seconds"
    );
    describe_gauge!(names::QUEUE_WAITING, "Jobs currently waiting per queue");
    describe_gauge!(names::QUEUE_ACTIVE, "Jobs currently active per queue");
}

/// Job engine metrics recorders.
pub struct JobMetrics;

impl JobMetrics {
    pub fn job_enqueued(queue: &str) {
        counter!(names::JOBS_ENQUEUED, "queue" => queue.to_string()).increment(1);
    }

    pub fn job_claimed(queue: &str) {
        counter!(names::JOBS_CLAIMED, "queue" => queue.to_string()).increment(1);
    }

    pub fn job_completed(queue: &str, duration_secs: f64) {
        counter!(names::JOBS_COMPLETED, "queue" => queue.to_string()).increment(1);
        histogram!(names::PROCESSING_DURATION, "queue" => queue.to_string()).record(duration_secs);
    }

    pub fn job_failed(queue: &str) {
        counter!(names::JOBS_FAILED, "queue" => queue.to_string()).increment(1);
    }

    pub fn job_retried(queue: &str) {
        counter!(names::JOBS_RETRIED, "queue" => queue.to_string()).increment(1);
    }

    pub fn job_removed(queue: &str) {
        counter!(names::JOBS_REMOVED, "queue" => queue.to_string()).increment(1);
    }

    pub fn leases_reclaimed(count: u64) {
        counter!(names::LEASES_RECLAIMED).increment(count);
    }

    pub fn queue_depth(queue: &str, waiting: u64, active: u64) {
        gauge!(names::QUEUE_WAITING, "queue" => queue.to_string()).set(waiting as f64);
        gauge!(names::QUEUE_ACTIVE, "queue" => queue.to_string()).set(active as f64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_names_share_prefix() {
        for name in [
            names::JOBS_ENQUEUED,
            names::JOBS_CLAIMED,
            names::JOBS_COMPLETED,
            names::JOBS_FAILED,
            names::JOBS_RETRIED,
            names::JOBS_REMOVED,
            names::LEASES_RECLAIMED,
            names::PROCESSING_DURATION,
            names::QUEUE_WAITING,
            names::QUEUE_ACTIVE,
        ] {
            assert!(name.starts_with("lexflow_jobs_"));
        }
    }

    #[test]
    fn test_recording_without_recorder_is_a_noop() {
        JobMetrics::job_enqueued("document-processing");
        JobMetrics::job_completed("document-processing", 0.25);
        JobMetrics::leases_reclaimed(2);
        JobMetrics::queue_depth("ai-analysis", 3, 1);
    }
}
