//! Deferred signal queue
//!
//! One slot per deferrable signal kind. A slot is a single flag, so a
//! second delivery of the same kind before the queue is drained is
//! coalesced into the first. All operations are lock-free atomics and may
//! be called from the dispatcher.

use std::sync::atomic::{AtomicBool, Ordering};

use libc::c_int;

use super::catalog::{self, DEFERRABLE};

pub(crate) struct DeferredQueue {
    slots: [AtomicBool; DEFERRABLE.len()],
}

impl DeferredQueue {
    pub(crate) const fn new() -> Self {
        Self {
            slots: [const { AtomicBool::new(false) }; DEFERRABLE.len()],
        }
    }

    /// Mark `signal` as pending. Returns false for signals that are not
    /// deferrable.
    pub(crate) fn record(&self, signal: c_int) -> bool {
        match catalog::deferred_slot(signal) {
            Some(slot) => {
                self.slots[slot].store(true, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }

    /// Read and clear every slot, returning the highest-priority signal
    /// that was pending. Lower-priority records are discarded with it.
    pub(crate) fn drain(&self) -> Option<c_int> {
        let mut first = None;
        for (slot, &signal) in self.slots.iter().zip(DEFERRABLE.iter()) {
            if slot.swap(false, Ordering::SeqCst) && first.is_none() {
                first = Some(signal);
            }
        }
        first
    }

    /// Highest-priority pending signal, left in place.
    pub(crate) fn peek(&self) -> Option<c_int> {
        self.slots
            .iter()
            .zip(DEFERRABLE.iter())
            .find(|(slot, _)| slot.load(Ordering::SeqCst))
            .map(|(_, &signal)| signal)
    }

    /// Forget a pending occurrence of `signal`.
    pub(crate) fn clear(&self, signal: c_int) {
        if let Some(slot) = catalog::deferred_slot(signal) {
            self.slots[slot].store(false, Ordering::SeqCst);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_queue() {
        let queue = DeferredQueue::new();
        assert_eq!(queue.peek(), None);
        assert_eq!(queue.drain(), None);
    }

    #[test]
    fn test_repeats_coalesce() {
        let queue = DeferredQueue::new();
        assert!(queue.record(libc::SIGINT));
        assert!(queue.record(libc::SIGINT));
        assert_eq!(queue.drain(), Some(libc::SIGINT));
        assert_eq!(queue.drain(), None);
    }

    #[test]
    fn test_fatal_signals_are_not_queued() {
        let queue = DeferredQueue::new();
        assert!(!queue.record(libc::SIGSEGV));
        assert!(!queue.record(libc::SIGABRT));
        assert_eq!(queue.peek(), None);
    }

    #[test]
    fn test_drain_replays_highest_priority_only() {
        let queue = DeferredQueue::new();
        queue.record(libc::SIGALRM);
        queue.record(libc::SIGINT);
        assert_eq!(queue.peek(), Some(libc::SIGINT));
        assert_eq!(queue.drain(), Some(libc::SIGINT));
        // The alarm was cleared by the same drain
        assert_eq!(queue.drain(), None);

        queue.record(libc::SIGINT);
        queue.record(libc::SIGHUP);
        assert_eq!(queue.drain(), Some(libc::SIGHUP));
    }

    #[test]
    fn test_peek_does_not_consume() {
        let queue = DeferredQueue::new();
        queue.record(libc::SIGALRM);
        assert_eq!(queue.peek(), Some(libc::SIGALRM));
        assert_eq!(queue.peek(), Some(libc::SIGALRM));
        queue.clear(libc::SIGALRM);
        assert_eq!(queue.peek(), None);
    }
}
