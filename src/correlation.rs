//! Request/response correlation by expected reply type.
//!
//! A caller registers a waiter for the reply type *before* sending its
//! request, then awaits the returned receiver. Each matching inbound message
//! resolves exactly one waiter, oldest first.

use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use tokio::sync::oneshot;

#[derive(Debug, Default)]
pub struct PendingRequests {
    waiters: Mutex<HashMap<String, VecDeque<oneshot::Sender<Value>>>>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, reply_type: &str) -> oneshot::Receiver<Value> {
        let (tx, rx) = oneshot::channel();
        let mut waiters = self.waiters.lock().unwrap_or_else(|e| e.into_inner());
        waiters
            .entry(reply_type.to_string())
            .or_default()
            .push_back(tx);
        rx
    }

    /// Whether anyone is waiting for `reply_type`
    pub fn is_pending(&self, reply_type: &str) -> bool {
        let waiters = self.waiters.lock().unwrap_or_else(|e| e.into_inner());
        waiters.contains_key(reply_type)
    }

    /// Resolve the oldest live waiter for `reply_type` with `message`.
    ///
    /// Waiters whose receiver was dropped (e.g. after a timeout) are skipped.
    /// Returns false if no waiter took the message.
    pub fn resolve(&self, reply_type: &str, message: Value) -> bool {
        let mut waiters = self.waiters.lock().unwrap_or_else(|e| e.into_inner());
        let Some(queue) = waiters.get_mut(reply_type) else {
            return false;
        };

        let mut message = Some(message);
        let mut resolved = false;
        while let Some(tx) = queue.pop_front() {
            let Some(payload) = message.take() else {
                break;
            };
            match tx.send(payload) {
                Ok(()) => {
                    resolved = true;
                    break;
                }
                Err(returned) => {
                    log::debug!("Dropping abandoned waiter for '{}'", reply_type);
                    message = Some(returned);
                }
            }
        }

        if queue.is_empty() {
            waiters.remove(reply_type);
        }
        resolved
    }

    pub fn waiting(&self, reply_type: &str) -> usize {
        let waiters = self.waiters.lock().unwrap_or_else(|e| e.into_inner());
        waiters.get(reply_type).map_or(0, VecDeque::len)
    }
}
