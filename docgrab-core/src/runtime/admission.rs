use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::runtime::types::CoordinatorError;

/// RAII guard for an admitted task.
///
/// Holds the admission slot for the whole task lifetime.  The run slot is
/// attached once the worker is allowed to launch the external command.
pub struct Permit {
    #[allow(dead_code)]
    admitted: OwnedSemaphorePermit,
    #[allow(dead_code)]
    running: Option<OwnedSemaphorePermit>,
}

impl std::fmt::Debug for Permit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Permit")
            .field("running", &self.running.is_some())
            .finish()
    }
}

/// Bounded worker pool admission control.
///
/// `max_concurrent` tasks may run the external command at once and up to
/// `queue_capacity` more may wait for a run slot.  Submissions beyond that
/// receive [`CoordinatorError::Busy`] immediately.
#[derive(Debug, Clone)]
pub struct Admission {
    admitted: Arc<Semaphore>,
    running: Arc<Semaphore>,
    limit: usize,
}

impl Admission {
    pub fn new(max_concurrent: usize, queue_capacity: usize) -> Self {
        let max_concurrent = max_concurrent.max(1);
        let limit = max_concurrent + queue_capacity;
        Self {
            admitted: Arc::new(Semaphore::new(limit)),
            running: Arc::new(Semaphore::new(max_concurrent)),
            limit,
        }
    }

    /// Total number of tasks that may be in flight (running + queued).
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Number of tasks currently admitted.
    pub fn in_flight(&self) -> usize {
        self.limit - self.admitted.available_permits()
    }

    /// Try to admit one more task without waiting.
    pub fn try_admit(&self) -> Result<Permit, CoordinatorError> {
        Arc::clone(&self.admitted)
            .try_acquire_owned()
            .map(|admitted| Permit { admitted, running: None })
            .map_err(|_| CoordinatorError::Busy {
                running: self.in_flight(),
                limit: self.limit,
            })
    }

    /// Wait for a run slot.  The returned permit keeps both slots until it
    /// is dropped.
    pub async fn wait_run(&self, mut permit: Permit) -> Permit {
        if permit.running.is_none() {
            // Only fails if the semaphore is closed, which never happens.
            permit.running = Arc::clone(&self.running).acquire_owned().await.ok();
        }
        permit
    }
}

impl Default for Admission {
    fn default() -> Self {
        Self::new(4, 16)
    }
}
