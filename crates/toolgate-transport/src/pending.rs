//! Pending-request correlation table (SPEC_FULL.md §4.D, §4.G).
//!
//! Every transport implementation routes inbound responses through this
//! table rather than rolling its own map, so the at-most-once completion
//! guarantee lives in one place. A request id is removed the first time a
//! matching response arrives; a second response (or a late arrival after
//! timeout already completed the waiter) is simply dropped.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::oneshot;

use toolgate_core::jsonrpc::{JsonRpcId, JsonRpcResponse};

#[derive(Default)]
pub struct PendingRequests {
    inner: Mutex<HashMap<String, oneshot::Sender<JsonRpcResponse>>>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a waiter for `id`, returning the receiving half. Overwrites
    /// (and thereby drops) any prior waiter registered under the same id —
    /// callers are expected to generate fresh ids per request.
    pub fn register(&self, id: &JsonRpcId) -> oneshot::Receiver<JsonRpcResponse> {
        let (tx, rx) = oneshot::channel();
        self.inner.lock().unwrap().insert(id.to_string(), tx);
        rx
    }

    /// Completes the waiter for this response's id, if one is still
    /// outstanding. Returns `true` if a waiter was found and notified.
    pub fn complete(&self, response: JsonRpcResponse) -> bool {
        let id = response.id.to_string();
        let sender = self.inner.lock().unwrap().remove(&id);
        match sender {
            Some(tx) => tx.send(response).is_ok(),
            None => false,
        }
    }

    /// Drops a waiter without completing it (used when a request times out
    /// locally so a late response doesn't attempt to resolve a gone oneshot).
    pub fn cancel(&self, id: &JsonRpcId) {
        self.inner.lock().unwrap().remove(&id.to_string());
    }

    /// Drops every outstanding waiter's sender half, so each `await`er sees a
    /// closed channel and resolves with "transport closed" exactly once
    /// (SPEC_FULL.md §8 invariant 1). Called from every transport's `close`.
    pub fn reject_all(&self) {
        self.inner.lock().unwrap().clear();
    }

    pub fn pending_count(&self) -> usize {
        self.inner.lock().unwrap().len()
    }
}
