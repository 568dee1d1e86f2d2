use std::sync::Arc;

use tokio::sync::{AcquireError, OwnedSemaphorePermit, Semaphore};

/// Process-wide cap on simultaneous archive streams. A capacity of 0 means unlimited.
#[derive(Clone, Debug)]
pub struct ConcurrencyGate {
    sem: Option<Arc<Semaphore>>,
    capacity: usize,
}

/// Slot in a [`ConcurrencyGate`]; released when dropped.
#[derive(Debug)]
pub struct GatePermit {
    _permit: Option<OwnedSemaphorePermit>,
}

impl ConcurrencyGate {
    pub fn new(capacity: usize) -> Self {
        let sem = (capacity > 0).then(|| Arc::new(Semaphore::new(capacity)));
        Self { sem, capacity }
    }

    /// Waits for a free slot. Returns immediately for an unlimited gate.
    pub async fn acquire(&self) -> Result<GatePermit, AcquireError> {
        let permit = match &self.sem {
            Some(sem) => Some(sem.clone().acquire_owned().await?),
            None => None,
        };
        Ok(GatePermit { _permit: permit })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_unlimited(&self) -> bool {
        self.sem.is_none()
    }

    /// Free slots right now, `None` for an unlimited gate.
    pub fn available(&self) -> Option<usize> {
        self.sem.as_ref().map(|s| s.available_permits())
    }
}
