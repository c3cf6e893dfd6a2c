//! At-most-one-in-flight tracking for a pipeline's submissions.
//!
//! The flag is the only piece of business state shared between the render
//! and control threads. It is never used to block: a submission attempted
//! while one is outstanding is dropped outright, and the next scheduled
//! render pass retries from scratch.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// One boolean per pipeline instance, true while a submission is
/// outstanding. Transitions go through compare-and-set only.
#[derive(Debug, Default)]
pub struct PendingOperation {
    submitted: AtomicBool,
}

impl PendingOperation {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Attempts the Idle → Submitted transition. `None` means an operation
    /// is already in flight and the caller must skip this pass entirely.
    #[must_use]
    pub fn begin(self: &Arc<Self>) -> Option<PendingOpGuard> {
        self.submitted
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;
        Some(PendingOpGuard {
            op: Arc::clone(self),
            armed: true,
        })
    }

    /// Whether an operation is currently in flight.
    #[must_use]
    pub fn is_submitted(&self) -> bool {
        self.submitted.load(Ordering::Acquire)
    }

    /// Back to Idle. Idempotent; called by whichever guard ends up owning
    /// the reset duty.
    pub(crate) fn finish(&self) {
        self.submitted.store(false, Ordering::Release);
    }
}

/// Holds the Submitted state for the duration of a submission attempt.
///
/// Dropping the guard resets the flag, which covers every early-return and
/// failure path inside `submit`. Once the submission has actually been
/// handed to the device, [`commit`](PendingOpGuard::commit) transfers the
/// reset duty to the completion path.
#[derive(Debug)]
pub struct PendingOpGuard {
    op: Arc<PendingOperation>,
    armed: bool,
}

impl PendingOpGuard {
    /// The submission made it onto the queue; leave the flag set until the
    /// completion handler resets it.
    pub fn commit(mut self) {
        self.armed = false;
    }
}

impl Drop for PendingOpGuard {
    fn drop(&mut self) {
        if self.armed {
            self.op.finish();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_begin_is_refused_until_reset() {
        let op = PendingOperation::new();
        let guard = op.begin().expect("first begin");
        assert!(op.begin().is_none());
        drop(guard);
        assert!(!op.is_submitted());
        assert!(op.begin().is_some());
    }

    #[test]
    fn committed_guard_leaves_flag_set() {
        let op = PendingOperation::new();
        let guard = op.begin().expect("first begin");
        guard.commit();
        assert!(op.is_submitted());
        op.finish();
        assert!(!op.is_submitted());
    }

    #[test]
    fn contended_begin_admits_exactly_one() {
        let op = PendingOperation::new();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let op = Arc::clone(&op);
                std::thread::spawn(move || op.begin().map(PendingOpGuard::commit).is_some())
            })
            .collect();
        let won = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(won, 1);
    }
}
