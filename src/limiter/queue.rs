//! Priority-ordered wait queue
//!
//! Capacity and timeout enforcement live in the limiter; this module owns the
//! ordering invariant: strict priority first, FIFO within a priority tier.

use tokio::sync::oneshot;

use super::verdict::Verdict;

/// A caller parked in the queue waiting for capacity.
pub(crate) struct Waiter {
    pub id: u64,
    pub provider: String,
    pub estimated_tokens: f64,
    pub priority: i32,
    pub enqueued_at_ms: u64,
    /// Resolution handle back to the caller suspended in `wait_for_capacity`.
    pub tx: oneshot::Sender<Verdict>,
}

impl std::fmt::Debug for Waiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Waiter")
            .field("id", &self.id)
            .field("provider", &self.provider)
            .field("priority", &self.priority)
            .field("enqueued_at_ms", &self.enqueued_at_ms)
            .finish()
    }
}

/// Ordered set of pending admissions. Higher priority drains first; equal
/// priorities keep arrival order.
#[derive(Debug, Default)]
pub(crate) struct WaitQueue {
    entries: Vec<Waiter>,
    next_id: u64,
}

impl WaitQueue {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insert before the first entry with a strictly lower priority, so ties
    /// stay FIFO. Returns the waiter id and the caller's receiver.
    pub fn insert(
        &mut self,
        provider: String,
        estimated_tokens: f64,
        priority: i32,
        enqueued_at_ms: u64,
    ) -> (u64, oneshot::Receiver<Verdict>) {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);

        let (tx, rx) = oneshot::channel();
        let waiter = Waiter {
            id,
            provider,
            estimated_tokens,
            priority,
            enqueued_at_ms,
            tx,
        };

        let position = self
            .entries
            .iter()
            .position(|w| w.priority < priority)
            .unwrap_or(self.entries.len());
        self.entries.insert(position, waiter);

        (id, rx)
    }

    /// Remove a specific waiter, if it is still queued.
    pub fn remove(&mut self, id: u64) -> Option<Waiter> {
        let position = self.entries.iter().position(|w| w.id == id)?;
        Some(self.entries.remove(position))
    }

    /// Take every waiter out, preserving order. Used by drain passes and by
    /// `stop()`.
    pub fn take_all(&mut self) -> Vec<Waiter> {
        std::mem::take(&mut self.entries)
    }

    /// Put unresolved waiters back after a drain pass, in front of anything
    /// enqueued concurrently (nothing can be, under the single lock, but the
    /// order is preserved regardless).
    pub fn restore(&mut self, mut waiters: Vec<Waiter>) {
        waiters.append(&mut self.entries);
        self.entries = waiters;
    }
}
