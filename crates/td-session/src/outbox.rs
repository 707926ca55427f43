//! Bounded, closable message queue owned by a session
//!
//! Enqueuers take the shared side of the lock and check `closed` first; the
//! closer takes the exclusive side, so no enqueue races a close. The queue is
//! created lazily by the first `open()` (the first SSE GET on the session),
//! enqueues before that fail with `QueueNotOpened`. After close, dequeue
//! drains whatever is buffered and then reports the distinguished EOF error.

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use td_types::{McpError, Result};

/// Queue capacity; a full queue suspends the producer rather than dropping.
const OUTBOX_CAPACITY: usize = 64;

#[derive(Default)]
struct SendState {
    tx: Option<mpsc::Sender<Vec<u8>>>,
    opened: bool,
    closed: bool,
}

#[derive(Default)]
pub struct Outbox {
    send: RwLock<SendState>,
    /// Receiver handoff from `open()` to the first `dequeue()`.
    handoff: Mutex<Option<mpsc::Receiver<Vec<u8>>>>,
    /// Receiver once claimed by the dequeue side.
    recv: tokio::sync::Mutex<Option<mpsc::Receiver<Vec<u8>>>>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the queue on first call; later calls are no-ops.
    pub fn open(&self) {
        let mut send = self.send.write();
        if send.opened || send.closed {
            return;
        }
        let (tx, rx) = mpsc::channel(OUTBOX_CAPACITY);
        send.tx = Some(tx);
        send.opened = true;
        *self.handoff.lock() = Some(rx);
    }

    pub fn is_opened(&self) -> bool {
        self.send.read().opened
    }

    /// Enqueue one message; suspends while the queue is full. The caller
    /// bounds the wait by dropping the future (timeout / disconnect).
    pub async fn enqueue(&self, message: Vec<u8>) -> Result<()> {
        let tx = {
            let send = self.send.read();
            if send.closed {
                return Err(McpError::SendEof);
            }
            match &send.tx {
                Some(tx) => tx.clone(),
                None => return Err(McpError::QueueNotOpened),
            }
        };

        tx.send(message).await.map_err(|_| McpError::SendEof)
    }

    /// Dequeue one message; suspends until a message arrives or the queue is
    /// closed and fully drained, which reports `SendEof`.
    pub async fn dequeue(&self) -> Result<Vec<u8>> {
        let mut recv = self.recv.lock().await;
        if recv.is_none() {
            *recv = self.handoff.lock().take();
        }
        match recv.as_mut() {
            None => Err(McpError::QueueNotOpened),
            Some(rx) => rx.recv().await.ok_or(McpError::SendEof),
        }
    }

    /// Close the queue: no further enqueues; buffered messages stay
    /// drainable. Idempotent.
    pub fn close(&self) {
        let mut send = self.send.write();
        send.closed = true;
        send.tx = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_enqueue_before_open_fails() {
        let outbox = Outbox::new();
        match outbox.enqueue(b"x".to_vec()).await {
            Err(McpError::QueueNotOpened) => {}
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let outbox = Outbox::new();
        outbox.open();
        outbox.enqueue(b"1".to_vec()).await.unwrap();
        outbox.enqueue(b"2".to_vec()).await.unwrap();
        assert_eq!(outbox.dequeue().await.unwrap(), b"1");
        assert_eq!(outbox.dequeue().await.unwrap(), b"2");
    }

    #[tokio::test]
    async fn test_close_drains_then_eof() {
        let outbox = Outbox::new();
        outbox.open();
        outbox.enqueue(b"tail".to_vec()).await.unwrap();
        outbox.close();

        assert_eq!(outbox.dequeue().await.unwrap(), b"tail");
        match outbox.dequeue().await {
            Err(McpError::SendEof) => {}
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_enqueue_after_close_fails() {
        let outbox = Outbox::new();
        outbox.open();
        outbox.close();
        match outbox.enqueue(b"x".to_vec()).await {
            Err(McpError::SendEof) => {}
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_full_queue_suspends_until_dequeue() {
        let outbox = std::sync::Arc::new(Outbox::new());
        outbox.open();
        for i in 0..64u8 {
            outbox.enqueue(vec![i]).await.unwrap();
        }

        // 65th enqueue must suspend, not drop
        let pending = {
            let outbox = outbox.clone();
            tokio::spawn(async move { outbox.enqueue(vec![64]).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!pending.is_finished());

        assert_eq!(outbox.dequeue().await.unwrap(), vec![0]);
        pending.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_open_is_idempotent() {
        let outbox = Outbox::new();
        outbox.open();
        outbox.enqueue(b"kept".to_vec()).await.unwrap();
        outbox.open();
        assert_eq!(outbox.dequeue().await.unwrap(), b"kept");
    }
}
