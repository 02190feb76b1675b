//! Per-request attempt bookkeeping.
//!
//! The tracker counts how many failed attempts each request has seen. It is
//! bounded: once `capacity` requests are tracked, recording a new request evicts
//! the one touched least recently. Callers that know a request is finished
//! should [`forget`](AttemptTracker::forget) it.

use crate::RequestId;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

/// Default number of requests tracked at once.
pub const DEFAULT_TRACKED_REQUESTS: usize = 1024;

/// Thread-safe, bounded map from request to attempt count.
#[derive(Debug)]
pub struct AttemptTracker {
    inner: Mutex<Inner>,
    capacity: usize,
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<RequestId, Entry>,
    tick: u64,
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    attempts: u32,
    touched: u64,
}

impl AttemptTracker {
    /// Creates a tracker holding at most `capacity` requests (at least one).
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            capacity: capacity.max(1),
        }
    }

    /// Records one more attempt for `request` and returns the new count.
    pub fn record(&self, request: RequestId) -> u32 {
        let mut inner = self.lock();
        inner.tick += 1;
        let tick = inner.tick;

        if !inner.entries.contains_key(&request) && inner.entries.len() >= self.capacity {
            let oldest = inner
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.touched)
                .map(|(id, _)| *id);
            if let Some(oldest) = oldest {
                inner.entries.remove(&oldest);
                tracing::debug!(request = %oldest, "Evicted attempt count");
            }
        }

        let entry = inner.entries.entry(request).or_insert(Entry {
            attempts: 0,
            touched: tick,
        });
        entry.attempts = entry.attempts.saturating_add(1);
        entry.touched = tick;
        entry.attempts
    }

    /// The number of failed attempts recorded for `request`.
    pub fn attempts(&self, request: RequestId) -> Option<u32> {
        self.lock().entries.get(&request).map(|e| e.attempts)
    }

    /// Stops tracking `request`, returning its final count.
    pub fn forget(&self, request: RequestId) -> Option<u32> {
        self.lock().entries.remove(&request).map(|e| e.attempts)
    }

    /// Stops tracking every request.
    pub fn clear(&self) {
        self.lock().entries.clear();
    }

    /// The number of requests currently tracked.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    /// Returns `true` if no request is tracked.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The most requests tracked at once.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    // Counts stay consistent even if a holder panicked, so poisoning is ignored.
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for AttemptTracker {
    fn default() -> Self {
        Self::new(DEFAULT_TRACKED_REQUESTS)
    }
}
