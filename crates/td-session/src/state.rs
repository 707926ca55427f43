//! Per-session state

use crate::cancellation::CancellationRegistry;
use crate::outbox::Outbox;
use crate::pending::PendingCalls;
use dashmap::DashSet;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::Instant;
use td_protocol::{ClientCapabilities, Implementation};

/// State of one session: outbox, pending peer calls, subscriptions, peer
/// identity and the handshake/lifecycle flags.
pub struct SessionState {
    last_active_at: Mutex<Instant>,

    outbox: Outbox,

    /// Monotonic id allocator for calls this side originates.
    request_counter: AtomicI64,

    pending: PendingCalls,

    cancellations: CancellationRegistry,

    subscribed_resources: DashSet<String>,

    client_info: RwLock<Option<Implementation>>,
    client_capabilities: RwLock<Option<ClientCapabilities>>,

    init_request_received: AtomicBool,
    ready: AtomicBool,
    closed: AtomicBool,
}

impl SessionState {
    pub fn new() -> Self {
        Self {
            last_active_at: Mutex::new(Instant::now()),
            outbox: Outbox::new(),
            request_counter: AtomicI64::new(0),
            pending: PendingCalls::new(),
            cancellations: CancellationRegistry::new(),
            subscribed_resources: DashSet::new(),
            client_info: RwLock::new(None),
            client_capabilities: RwLock::new(None),
            init_request_received: AtomicBool::new(false),
            ready: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    pub fn outbox(&self) -> &Outbox {
        &self.outbox
    }

    pub fn pending(&self) -> &PendingCalls {
        &self.pending
    }

    pub fn cancellations(&self) -> &CancellationRegistry {
        &self.cancellations
    }

    pub fn touch(&self) {
        *self.last_active_at.lock() = Instant::now();
    }

    pub fn idle_for(&self) -> std::time::Duration {
        self.last_active_at.lock().elapsed()
    }

    pub fn next_request_id(&self) -> i64 {
        self.request_counter.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Capture peer identity at handshake.
    pub fn set_client_info(&self, info: Implementation, capabilities: ClientCapabilities) {
        *self.client_info.write() = Some(info);
        *self.client_capabilities.write() = Some(capabilities);
    }

    pub fn client_info(&self) -> Option<Implementation> {
        self.client_info.read().clone()
    }

    pub fn client_capabilities(&self) -> Option<ClientCapabilities> {
        self.client_capabilities.read().clone()
    }

    pub fn set_init_request_received(&self) {
        self.init_request_received.store(true, Ordering::SeqCst);
    }

    pub fn init_request_received(&self) -> bool {
        self.init_request_received.load(Ordering::SeqCst)
    }

    pub fn set_ready(&self) {
        self.ready.store(true, Ordering::SeqCst);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Subscribe to update notifications for `uri`; false when already
    /// subscribed.
    pub fn subscribe_resource(&self, uri: String) -> bool {
        self.subscribed_resources.insert(uri)
    }

    pub fn unsubscribe_resource(&self, uri: &str) -> bool {
        self.subscribed_resources.remove(uri).is_some()
    }

    pub fn is_subscribed(&self, uri: &str) -> bool {
        self.subscribed_resources.contains(uri)
    }

    /// Close the session state: flag it, close the outbox, trip every
    /// in-flight handler token.
    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.outbox.close();
        self.cancellations.cancel_all();
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}
