//! Routing of driver-thread completion callbacks to the control thread.
//!
//! The native callback fires on whatever thread the driver chooses. It is
//! allowed to do exactly two things: check whether the owning item still
//! exists through a weak reference, and post a message into the item's
//! inbox. Handler code only ever runs on the control thread when the inbox
//! is drained, and the drain guard releases the completion token and resets
//! the pending flag on every exit path, so a failing handler can never
//! wedge a pipeline in the submitted state.

use std::sync::mpsc::{Receiver, Sender};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::driver::{ComputeDriver, EventId};
use crate::pending::PendingOperation;
use crate::scene::SceneUpdateScheduler;
use crate::Error;

/// A pending asynchronous operation's completion handle. Owned by the
/// pipeline until observed complete, then released exactly once.
#[derive(Debug)]
pub struct CompletionToken(EventId);

impl CompletionToken {
    pub(crate) fn new(event: EventId) -> Self {
        Self(event)
    }

    /// The underlying driver event.
    #[must_use]
    pub fn event(&self) -> EventId {
        self.0
    }
}

struct CompletionMessage {
    token: Option<EventId>,
}

struct RouterShared {
    tx: Mutex<Sender<CompletionMessage>>,
    scheduler: Arc<dyn SceneUpdateScheduler>,
}

/// Control-thread half of the router: owns the inbox and the strong
/// reference that keeps deliveries alive. Dropping it abandons everything
/// still in flight.
pub struct CompletionRouter {
    rx: Receiver<CompletionMessage>,
    // Never read, but its lifetime IS the owner-alive signal the watcher's
    // weak reference checks.
    #[allow(dead_code)]
    shared: Arc<RouterShared>,
    driver: Arc<dyn ComputeDriver>,
}

/// Render-thread half of the router: registers driver callbacks against a
/// weak reference to the control side.
pub struct CompletionWatcher {
    shared: Weak<RouterShared>,
    driver: Arc<dyn ComputeDriver>,
}

impl CompletionRouter {
    /// Builds a connected router/watcher pair.
    #[must_use]
    pub fn new(
        driver: Arc<dyn ComputeDriver>,
        scheduler: Arc<dyn SceneUpdateScheduler>,
    ) -> (Self, CompletionWatcher) {
        let (tx, rx) = std::sync::mpsc::channel();
        let shared = Arc::new(RouterShared {
            tx: Mutex::new(tx),
            scheduler,
        });
        let watcher = CompletionWatcher {
            shared: Arc::downgrade(&shared),
            driver: Arc::clone(&driver),
        };
        (Self { rx, shared, driver }, watcher)
    }

    /// Drains queued completions, invoking `handler` once per message on the
    /// calling (control) thread. Whatever the handler does, each message's
    /// token is released and the pending flag reset before the next one is
    /// looked at. Returns how many completions were handled.
    pub fn drain<F>(&self, pending: &PendingOperation, mut handler: F) -> usize
    where
        F: FnMut() -> Result<(), Error>,
    {
        let mut handled = 0;
        while let Ok(message) = self.rx.try_recv() {
            let _cleanup = CompletionGuard {
                driver: &self.driver,
                token: message.token,
                pending,
            };
            if let Err(e) = handler() {
                tracing::warn!("completion handler failed: {e}");
            }
            handled += 1;
        }
        handled
    }
}

impl CompletionWatcher {
    /// Registers a driver callback for the token. When the event completes
    /// the callback posts into the owner's inbox and requests another update
    /// pass; if the owner is already gone it only releases the token.
    ///
    /// Registration failure is treated as an already-completed event: the
    /// message is posted immediately so the token still travels through the
    /// normal release path.
    pub fn watch(&self, token: CompletionToken) {
        let event = token.event();
        let weak = Weak::clone(&self.shared);
        let driver = Arc::clone(&self.driver);
        let callback = Box::new(move || match weak.upgrade() {
            Some(shared) => {
                let _ = shared.tx.lock().send(CompletionMessage { token: Some(event) });
                shared.scheduler.request_update();
            }
            None => {
                // Owner destroyed before completion: drop the message, but
                // the token still has to be released exactly once.
                driver.release_event(event);
            }
        });
        if let Err(e) = self.driver.set_event_callback(event, callback) {
            tracing::warn!("failed to set event callback: {e}");
            self.post(Some(event));
        }
    }

    /// Posts a completion that already retired on the device (synchronous
    /// submissions), so result delivery still happens on the control thread.
    pub fn notify_completed(&self) {
        self.post(None);
    }

    fn post(&self, token: Option<EventId>) {
        if let Some(shared) = self.shared.upgrade() {
            let _ = shared.tx.lock().send(CompletionMessage { token });
            shared.scheduler.request_update();
        } else if let Some(event) = token {
            self.driver.release_event(event);
        }
    }
}

/// Releases the token and resets the pending flag when it goes out of
/// scope, covering handler failures and early exits alike.
struct CompletionGuard<'a> {
    driver: &'a Arc<dyn ComputeDriver>,
    token: Option<EventId>,
    pending: &'a PendingOperation,
}

impl Drop for CompletionGuard<'_> {
    fn drop(&mut self) {
        if let Some(event) = self.token.take() {
            self.driver.release_event(event);
        }
        self.pending.finish();
    }
}
