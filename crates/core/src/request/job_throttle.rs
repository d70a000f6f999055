use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Counts jobs in flight and optionally caps them.
///
/// Without a limit the counter is informational only.
#[derive(Clone, Debug)]
pub struct JobThrottle {
    in_flight: Arc<AtomicUsize>,
    limit: Option<usize>,
}

/// Admission for one request. Dropping it frees the slot.
#[derive(Debug)]
pub struct ThrottlePermit {
    in_flight: Arc<AtomicUsize>,
}

impl JobThrottle {
    pub fn new(limit: Option<usize>) -> Self {
        Self {
            in_flight: Arc::new(AtomicUsize::new(0)),
            limit,
        }
    }

    pub fn limit(&self) -> Option<usize> {
        self.limit
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Takes a slot, or returns the current count when the limit is reached.
    pub fn try_acquire(&self) -> Result<ThrottlePermit, usize> {
        match self.limit {
            None => {
                self.in_flight.fetch_add(1, Ordering::AcqRel);
            }
            Some(limit) => {
                self.in_flight
                    .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                        (n < limit).then_some(n + 1)
                    })?;
            }
        }
        Ok(ThrottlePermit {
            in_flight: self.in_flight.clone(),
        })
    }
}

impl Drop for ThrottlePermit {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}
