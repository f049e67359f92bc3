//! Per-run adaptive concurrency limit
//!
//! A limit starts at the configured maximum and collapses to one in-flight
//! request the first time the remote source rate-limits the run. It never
//! grows back; a fresh run gets a fresh limit.

use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug)]
pub struct AdaptiveConcurrency {
    initial: usize,
    current: AtomicUsize,
}

impl AdaptiveConcurrency {
    /// A limit of `max` (at least 1)
    pub fn new(max: usize) -> Self {
        let initial = max.max(1);
        Self {
            initial,
            current: AtomicUsize::new(initial),
        }
    }

    pub fn current(&self) -> usize {
        self.current.load(Ordering::Acquire)
    }

    pub fn initial(&self) -> usize {
        self.initial
    }

    /// Drop to a single in-flight request
    ///
    /// Returns `true` only for the call that actually lowered the limit.
    pub fn throttle(&self) -> bool {
        self.current.swap(1, Ordering::AcqRel) > 1
    }

    pub fn is_throttled(&self) -> bool {
        self.current() < self.initial
    }
}
