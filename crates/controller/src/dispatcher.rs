//! Correlation-id to waiter registry. Responses from every station arrive
//! on one inbound channel; correlation ids are the only binding between
//! an outbound command and its reply, so this is a hash map guarded by a
//! single lock with single-slot delivery channels per spec.md §9.

use std::collections::HashMap;

use stationbus_proto::Message;
use tokio::sync::oneshot;
use uuid::Uuid;

#[derive(Default)]
pub struct Dispatcher {
    waiters: std::sync::Mutex<HashMap<Uuid, oneshot::Sender<Message>>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a waiter for `cid`, returning the receiving half. At most
    /// one live waiter per correlation id; a second register for the same
    /// id replaces the first, which then receives a closed channel.
    pub fn register(&self, cid: Uuid) -> oneshot::Receiver<Message> {
        let (tx, rx) = oneshot::channel();
        self.waiters.lock().unwrap().insert(cid, tx);
        rx
    }

    /// Deliver `message` to its waiter, if one is registered. Returns
    /// `true` on a hit. Unknown correlation ids are dropped and reported
    /// via the `false` return so the caller can log an orphan.
    pub fn dispatch(&self, message: Message) -> bool {
        let Some(cid) = message.envelope.correlation_id else {
            return false;
        };
        let waiter = self.waiters.lock().unwrap().remove(&cid);
        match waiter {
            Some(tx) => tx.send(message).is_ok(),
            None => false,
        }
    }

    /// Remove a waiter without delivering — used on timeout or caller
    /// cancellation. A no-op if the id is already gone.
    pub fn deregister(&self, cid: Uuid) {
        self.waiters.lock().unwrap().remove(&cid);
    }

    pub fn pending_count(&self) -> usize {
        self.waiters.lock().unwrap().len()
    }
}
