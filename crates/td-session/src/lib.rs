//! Session state and lifecycle for the tandem server runtime
//!
//! A session is the per-connection state container: peer identity captured at
//! handshake, the bounded outbox drained by the server-push stream, the
//! pending-call map correlating peer-call replies, and the cancellation
//! registry that turns `notifications/cancelled` into a handler-visible
//! signal. The [`SessionManager`] owns the active/closed sets and the
//! heartbeat sweep that reaps idle or unresponsive sessions.

pub mod cancellation;
pub mod manager;
pub mod outbox;
pub mod pending;
pub mod state;

pub use cancellation::CancellationRegistry;
pub use manager::{DetectionFn, SessionManager};
pub use outbox::Outbox;
pub use pending::PendingCalls;
pub use state::SessionState;
