//! Admission control for request handlers.
//!
//! A thin wrapper over a fair `tokio::sync::Semaphore`: waiters are granted in
//! arrival order, and a slot is returned when the [`GatePermit`] drops, so
//! every exit path of a handler (including unwinding) releases it.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::trace;

/// Default number of request handlers allowed to run at once.
pub const DEFAULT_MAX_CONCURRENT_REQUESTS: usize = 16;

/// Counting gate limiting concurrent request-handler executions.
#[derive(Debug, Clone)]
pub struct ConcurrencyGate {
    semaphore: Arc<Semaphore>,
    limit: usize,
    waiting: Arc<AtomicUsize>,
}

/// Held for the lifetime of one admitted handler execution.
#[derive(Debug)]
pub struct GatePermit {
    _permit: OwnedSemaphorePermit,
}

impl ConcurrencyGate {
    /// Create a gate admitting `limit` concurrent holders (at least one).
    pub fn new(limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(limit)),
            limit,
            waiting: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Wait for a slot. Callers are admitted FIFO once the gate is full.
    pub async fn acquire(&self) -> GatePermit {
        if let Ok(permit) = Arc::clone(&self.semaphore).try_acquire_owned() {
            return GatePermit { _permit: permit };
        }

        let queued = WaitingGuard::enter(&self.waiting);
        trace!(waiting = self.waiting(), limit = self.limit, "concurrency gate full, queueing");
        let permit = Arc::clone(&self.semaphore).acquire_owned().await;
        drop(queued);

        match permit {
            Ok(permit) => GatePermit { _permit: permit },
            // The semaphore is owned here and never closed.
            Err(_) => unreachable!("concurrency gate semaphore closed"),
        }
    }

    /// Take a slot only if one is free right now.
    pub fn try_acquire(&self) -> Option<GatePermit> {
        Arc::clone(&self.semaphore)
            .try_acquire_owned()
            .ok()
            .map(|permit| GatePermit { _permit: permit })
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Slots currently held.
    pub fn active(&self) -> usize {
        self.limit - self.semaphore.available_permits()
    }

    /// Slots currently free.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Callers queued behind a full gate.
    pub fn waiting(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }
}

/// Counts one queued caller; the count drops with the guard, so a cancelled
/// `acquire` does not leave it raised.
struct WaitingGuard<'a> {
    waiting: &'a AtomicUsize,
}

impl<'a> WaitingGuard<'a> {
    fn enter(waiting: &'a AtomicUsize) -> Self {
        waiting.fetch_add(1, Ordering::SeqCst);
        Self { waiting }
    }
}

impl Drop for WaitingGuard<'_> {
    fn drop(&mut self) {
        self.waiting.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Default for ConcurrencyGate {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CONCURRENT_REQUESTS)
    }
}
