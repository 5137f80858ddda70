//! Cooperative cancellation for in-flight jobs.
//!
//! Removing an active job cannot interrupt its handler mid-await, so the
//! engine flips a per-job flag instead. Handlers observe the flag through
//! their progress handle and are expected to bail out at the next
//! convenient point.

use crate::job::JobId;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Tracks cancellation flags for jobs currently being executed.
#[derive(Default)]
pub struct CancelRegistry {
    flags: RwLock<HashMap<JobId, Arc<AtomicBool>>>,
}

impl CancelRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a fresh flag for a job entering execution.
    pub fn register(&self, id: &JobId) -> Arc<AtomicBool> {
        let flag = Arc::new(AtomicBool::new(false));
        self.flags.write().insert(id.clone(), Arc::clone(&flag));
        flag
    }

    /// Requests cancellation. Returns false when the job is not running.
    pub fn cancel(&self, id: &JobId) -> bool {
        match self.flags.read().get(id) {
            Some(flag) => {
                flag.store(true, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }

    /// Drops the flag once execution concludes.
    pub fn unregister(&self, id: &JobId) {
        self.flags.write().remove(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_flips_registered_flag() {
        let registry = CancelRegistry::new();
        let id = JobId::new();

        let flag = registry.register(&id);
        assert!(!flag.load(Ordering::SeqCst));

        assert!(registry.cancel(&id));
        assert!(flag.load(Ordering::SeqCst));
    }

    #[test]
    fn test_cancel_unknown_job_is_noop() {
        let registry = CancelRegistry::new();
        assert!(!registry.cancel(&JobId::new()));
    }

    #[test]
    fn test_unregister_removes_flag() {
        let registry = CancelRegistry::new();
        let id = JobId::new();
        registry.register(&id);
        registry.unregister(&id);
        assert!(!registry.cancel(&id));
    }
}
