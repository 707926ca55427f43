//! Pending-call correlation
//!
//! Every outstanding peer call holds a single-shot reply slot keyed by the
//! stringified request id. Delivery consumes the slot; a second delivery to
//! the same id finds it spent and is reported as a duplicate. The caller
//! removes the slot on both completion paths (reply received, context given
//! up), so a reply arriving after abandonment surfaces as `LackResponseChannel`.

use dashmap::DashMap;
use td_protocol::JsonRpcResponse;
use td_types::{McpError, Result};
use tokio::sync::oneshot;

struct Slot {
    tx: Option<oneshot::Sender<JsonRpcResponse>>,
}

#[derive(Default)]
pub struct PendingCalls {
    slots: DashMap<String, Slot>,
}

impl PendingCalls {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a fresh reply slot under `key`, replacing any stale one.
    pub fn register(&self, key: String) -> oneshot::Receiver<JsonRpcResponse> {
        let (tx, rx) = oneshot::channel();
        self.slots.insert(key, Slot { tx: Some(tx) });
        rx
    }

    /// Deliver a response to its slot, non-blocking.
    pub fn deliver(&self, key: &str, response: JsonRpcResponse) -> Result<()> {
        let mut slot = self
            .slots
            .get_mut(key)
            .ok_or_else(|| McpError::LackResponseChannel(key.to_string()))?;
        let tx = slot
            .tx
            .take()
            .ok_or_else(|| McpError::DuplicateResponse(key.to_string()))?;
        // A dropped receiver means the caller gave up between delivery and
        // cleanup; nothing left to do.
        let _ = tx.send(response);
        Ok(())
    }

    pub fn remove(&self, key: &str) {
        self.slots.remove(key);
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
