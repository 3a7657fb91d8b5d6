//! Registry of in-flight requests.
//!
//! One entry per outstanding `send`: the STAN stamped into the request,
//! mapped to the single-shot slot its waiter is parked on. The reader loop
//! resolves entries as replies arrive; timeouts and teardown remove them.
//! `close` blocks on [`PendingRegistry::wait_empty`] until every waiter has
//! reached a terminal state.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use parking_lot::Mutex;
use tokio::sync::{oneshot, Notify};

/// What a waiter receives on its delivery slot.
#[derive(Debug)]
pub(crate) enum Delivery<M> {
    /// The correlated reply.
    Reply(M),
    /// The connection went away before a reply arrived.
    Closed,
}

/// STAN-keyed map of delivery slots for in-flight requests.
///
/// Critical sections are O(1) map operations; the lock is never held
/// across a delivery or a callback.
pub(crate) struct PendingRegistry<M> {
    entries: Mutex<HashMap<String, oneshot::Sender<Delivery<M>>>>,
    /// Signalled whenever a removal leaves the map empty.
    drained: Notify,
}

impl<M> PendingRegistry<M> {
    pub(crate) fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            drained: Notify::new(),
        }
    }

    /// Register a waiter for `stan`. Returns `None` if the STAN already has
    /// a live entry; the caller is expected to pick another STAN.
    pub(crate) fn try_register(&self, stan: String) -> Option<oneshot::Receiver<Delivery<M>>> {
        let mut entries = self.entries.lock();
        match entries.entry(stan) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                let (tx, rx) = oneshot::channel();
                slot.insert(tx);
                Some(rx)
            }
        }
    }

    /// Drop the waiter for `stan`, if still present. Used by the timeout
    /// path and by a failed enqueue.
    pub(crate) fn remove(&self, stan: &str) -> bool {
        let mut entries = self.entries.lock();
        let removed = entries.remove(stan).is_some();
        let empty = entries.is_empty();
        drop(entries);

        if removed && empty {
            self.drained.notify_waiters();
        }
        removed
    }

    /// Deliver `message` to the waiter registered under `stan`.
    ///
    /// Returns the message back when there is nobody to deliver to: no
    /// entry (the waiter already timed out), or the waiter dropped its slot
    /// between removal and delivery. Either way the caller routes the reply
    /// to the unmatched-message path.
    pub(crate) fn complete(&self, stan: &str, message: M) -> Option<M> {
        let mut entries = self.entries.lock();
        let sender = entries.remove(stan);
        let empty = entries.is_empty();
        drop(entries);

        let outcome = match sender {
            Some(tx) => match tx.send(Delivery::Reply(message)) {
                Ok(()) => None,
                Err(Delivery::Reply(message)) => Some(message),
                Err(Delivery::Closed) => None,
            },
            None => Some(message),
        };

        if empty {
            self.drained.notify_waiters();
        }
        outcome
    }

    /// Resolve every remaining waiter with [`Delivery::Closed`] and empty
    /// the registry.
    pub(crate) fn drain(&self) {
        let entries = std::mem::take(&mut *self.entries.lock());
        for (_, tx) in entries {
            let _ = tx.send(Delivery::Closed);
        }
        self.drained.notify_waiters();
    }

    /// Wait until the registry is empty.
    ///
    /// The `Notified` future is created before the emptiness check so a
    /// removal between check and await cannot be missed.
    pub(crate) async fn wait_empty(&self) {
        loop {
            let notified = self.drained.notified();
            if self.entries.lock().is_empty() {
                return;
            }
            notified.await;
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.lock().len()
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
