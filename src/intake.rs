use crate::event::ChangeEvent;
use crossbeam_queue::ArrayQueue;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Default capacity for the change-feed intake buffer.
pub const INTAKE_QUEUE_CAPACITY: usize = 20_000;

/// Raised when the intake buffer is saturated; the feed transport decides
/// whether to retry, buffer upstream, or drop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("intake queue saturated at {capacity} events")]
pub struct IntakeError {
    pub capacity: usize,
}

/// Counters describing intake behaviour since construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IntakeAudit {
    pub accepted: u64,
    pub rejected: u64,
}

/// Lock-free bounded buffer between the change feed and dispatch workers.
/// Saturation is surfaced, never absorbed by unbounded growth; rejected
/// events rely on the feed's redelivery, which the Change Gate and
/// full-recompute idempotence make safe.
#[derive(Debug, Clone)]
pub struct IntakeQueue {
    queue: Arc<ArrayQueue<ChangeEvent>>,
    capacity: usize,
    accepted: Arc<AtomicU64>,
    rejected: Arc<AtomicU64>,
}

impl Default for IntakeQueue {
    fn default() -> Self {
        Self::new(INTAKE_QUEUE_CAPACITY)
    }
}

impl IntakeQueue {
    /// Creates a queue with a custom capacity.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "intake queue capacity must be > 0");
        Self {
            queue: Arc::new(ArrayQueue::new(capacity)),
            capacity,
            accepted: Arc::new(AtomicU64::new(0)),
            rejected: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Attempts to enqueue a change event, failing when saturated.
    pub fn offer(&self, event: ChangeEvent) -> Result<(), IntakeError> {
        match self.queue.push(event) {
            Ok(()) => {
                self.accepted.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(_) => {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                Err(IntakeError {
                    capacity: self.capacity,
                })
            }
        }
    }

    /// Dequeues the next pending event, if any.
    pub fn take(&self) -> Option<ChangeEvent> {
        self.queue.pop()
    }

    /// Drains up to `max` pending events.
    pub fn drain(&self, max: usize) -> Vec<ChangeEvent> {
        let mut drained = Vec::new();
        while drained.len() < max {
            match self.queue.pop() {
                Some(event) => drained.push(event),
                None => break,
            }
        }
        drained
    }

    /// Current queue depth.
    pub fn depth(&self) -> usize {
        self.queue.len()
    }

    /// Configured capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Accepted/rejected counters.
    pub fn audit(&self) -> IntakeAudit {
        IntakeAudit {
            accepted: self.accepted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }
}
