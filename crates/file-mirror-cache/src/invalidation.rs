//! Bookkeeping for deferred invalidations
//!
//! Each scheduled invalidation gets a ticket. A timer task only acts if its
//! ticket is still the registered one when it fires, so rescheduling or
//! cancelling never races with a timer that is already running.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use tokio::task::AbortHandle;

struct Pending {
    ticket: u64,
    task: AbortHandle,
}

#[derive(Default)]
pub(crate) struct DeferredInvalidations {
    pending: Mutex<HashMap<String, Pending>>,
    next_ticket: AtomicU64,
}

impl DeferredInvalidations {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, Pending>> {
        self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a new invalidation for `id`, replacing any earlier one.
    ///
    /// `spawn` receives the ticket and starts the timer task. The registry
    /// stays locked while it runs so the task cannot observe a stale ticket.
    pub fn schedule(&self, id: &str, spawn: impl FnOnce(u64) -> AbortHandle) {
        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        let mut pending = self.lock();
        let task = spawn(ticket);
        if let Some(previous) = pending.insert(id.to_string(), Pending { ticket, task }) {
            previous.task.abort();
        }
    }

    /// Cancel the pending invalidation for `id`, returning whether one existed
    pub fn cancel(&self, id: &str) -> bool {
        match self.lock().remove(id) {
            Some(previous) => {
                previous.task.abort();
                true
            }
            None => false,
        }
    }

    /// Called by a fired timer: consumes the registration if `ticket` is current
    pub fn claim(&self, id: &str, ticket: u64) -> bool {
        let mut pending = self.lock();
        match pending.get(id) {
            Some(current) if current.ticket == ticket => {
                pending.remove(id);
                true
            }
            _ => false,
        }
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }
}
