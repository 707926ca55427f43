//! Session manager: active/closed sets and the heartbeat sweep

use crate::state::SessionState;
use dashmap::{DashMap, DashSet};
use futures::future::BoxFuture;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Health probe invoked by the sweep; in practice a ping with a short
/// deadline. `Ok(())` keeps the session alive.
pub type DetectionFn =
    Arc<dyn Fn(String) -> BoxFuture<'static, td_types::Result<()>> + Send + Sync>;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(60);
const DETECTION_ATTEMPTS: usize = 3;

/// Owns every session of a server transport. A session id is in exactly one
/// of the active set or the closed set; after close it never re-enters the
/// active set.
pub struct SessionManager {
    active: DashMap<String, Arc<SessionState>>,
    closed: DashSet<String>,

    detection: RwLock<Option<DetectionFn>>,
    max_idle_time: RwLock<Duration>,

    stop_heartbeat: CancellationToken,
}

impl SessionManager {
    pub fn new() -> Self {
        Self {
            active: DashMap::new(),
            closed: DashSet::new(),
            detection: RwLock::new(None),
            max_idle_time: RwLock::new(Duration::ZERO),
            stop_heartbeat: CancellationToken::new(),
        }
    }

    /// Install the health probe used by the sweep.
    pub fn set_detection(&self, detection: DetectionFn) {
        *self.detection.write() = Some(detection);
    }

    /// Zero disables idle reaping.
    pub fn set_max_idle_time(&self, max_idle: Duration) {
        *self.max_idle_time.write() = max_idle;
    }

    pub fn create_session(&self) -> String {
        let session_id = Uuid::new_v4().to_string();
        self.active
            .insert(session_id.clone(), Arc::new(SessionState::new()));
        session_id
    }

    pub fn is_active(&self, session_id: &str) -> bool {
        self.active.contains_key(session_id)
    }

    pub fn is_closed(&self, session_id: &str) -> bool {
        self.closed.contains(session_id)
    }

    pub fn get(&self, session_id: &str) -> Option<Arc<SessionState>> {
        if session_id.is_empty() {
            return None;
        }
        self.active.get(session_id).map(|s| s.value().clone())
    }

    pub fn touch(&self, session_id: &str) {
        if let Some(state) = self.get(session_id) {
            state.touch();
        }
    }

    pub fn open_outbox(&self, session_id: &str) -> td_types::Result<()> {
        let state = self
            .get(session_id)
            .ok_or_else(|| td_types::McpError::LackSession(session_id.to_string()))?;
        state.outbox().open();
        Ok(())
    }

    pub async fn enqueue(&self, session_id: &str, message: Vec<u8>) -> td_types::Result<()> {
        let state = self
            .get(session_id)
            .ok_or_else(|| td_types::McpError::LackSession(session_id.to_string()))?;
        state.outbox().enqueue(message).await
    }

    pub async fn dequeue(&self, session_id: &str) -> td_types::Result<Vec<u8>> {
        let state = self
            .get(session_id)
            .ok_or_else(|| td_types::McpError::LackSession(session_id.to_string()))?;
        state.outbox().dequeue().await
    }

    /// Close a session: remove from the active set, close its outbox, record
    /// the id in the closed set. Idempotent.
    pub fn close_session(&self, session_id: &str) {
        let Some((id, state)) = self.active.remove(session_id) else {
            return;
        };
        state.close();
        self.closed.insert(id);
    }

    pub fn close_all_sessions(&self) {
        let ids: Vec<String> = self.active.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            self.close_session(&id);
        }
    }

    /// Visit a snapshot of the active sessions; closures that happen
    /// mid-iteration are tolerated.
    pub fn range<F>(&self, mut f: F)
    where
        F: FnMut(&str, &Arc<SessionState>) -> bool,
    {
        let snapshot: Vec<(String, Arc<SessionState>)> = self
            .active
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        for (id, state) in &snapshot {
            if !f(id, state) {
                break;
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Run the heartbeat sweep until [`SessionManager::stop_heartbeat`].
    ///
    /// Every tick, each active session is either expired (idle beyond
    /// `max_idle_time`) or probed via the detection callback; three
    /// consecutive probe failures close it.
    pub async fn run_heartbeat(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(HEARTBEAT_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // the interval fires immediately once; skip that edge
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = self.stop_heartbeat.cancelled() => return,
                _ = ticker.tick() => self.sweep_once().await,
            }
        }
    }

    async fn sweep_once(&self) {
        let max_idle = *self.max_idle_time.read();
        let detection = self.detection.read().clone();

        let snapshot: Vec<(String, Arc<SessionState>)> = self
            .active
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();

        for (session_id, state) in snapshot {
            if !max_idle.is_zero() && state.idle_for() > max_idle {
                tracing::info!("session expire, session id: {}", session_id);
                self.close_session(&session_id);
                continue;
            }

            let Some(detection) = detection.as_ref() else {
                continue;
            };

            let mut last_err = None;
            for _ in 0..DETECTION_ATTEMPTS {
                match detection(session_id.clone()).await {
                    Ok(()) => {
                        last_err = None;
                        break;
                    }
                    Err(e) => last_err = Some(e),
                }
            }
            if let Some(err) = last_err {
                tracing::info!(
                    "session detection fail, session id: {}, fail reason: {}",
                    session_id,
                    err
                );
                self.close_session(&session_id);
            }
        }
    }

    /// Terminate the sweep; the stop signal is used exactly once.
    pub fn stop_heartbeat(&self) {
        self.stop_heartbeat.cancel();
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_create_and_close_session() {
        let manager = SessionManager::new();
        let id = manager.create_session();
        assert!(manager.is_active(&id));
        assert!(!manager.is_closed(&id));

        manager.close_session(&id);
        assert!(!manager.is_active(&id));
        assert!(manager.is_closed(&id));
        assert!(manager.get(&id).is_none());
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let manager = SessionManager::new();
        let id = manager.create_session();
        manager.close_session(&id);
        manager.close_session(&id);
        assert!(manager.is_closed(&id));
    }

    #[tokio::test]
    async fn test_get_empty_id() {
        let manager = SessionManager::new();
        assert!(manager.get("").is_none());
    }

    #[tokio::test]
    async fn test_close_all() {
        let manager = SessionManager::new();
        let a = manager.create_session();
        let b = manager.create_session();
        manager.close_all_sessions();
        assert!(manager.is_closed(&a) && manager.is_closed(&b));
        assert!(manager.is_empty());
    }

    #[tokio::test]
    async fn test_range_visits_snapshot() {
        let manager = SessionManager::new();
        manager.create_session();
        manager.create_session();

        let mut seen = 0;
        manager.range(|_, _| {
            seen += 1;
            true
        });
        assert_eq!(seen, 2);

        // early exit
        let mut seen = 0;
        manager.range(|_, _| {
            seen += 1;
            false
        });
        assert_eq!(seen, 1);
    }

    #[tokio::test]
    async fn test_queue_operations_through_manager() {
        let manager = SessionManager::new();
        let id = manager.create_session();

        match manager.enqueue(&id, b"early".to_vec()).await {
            Err(td_types::McpError::QueueNotOpened) => {}
            other => panic!("unexpected: {other:?}"),
        }

        manager.open_outbox(&id).unwrap();
        manager.enqueue(&id, b"msg".to_vec()).await.unwrap();
        assert_eq!(manager.dequeue(&id).await.unwrap(), b"msg");
    }

    #[tokio::test]
    async fn test_sweep_expires_idle_sessions() {
        let manager = Arc::new(SessionManager::new());
        manager.set_max_idle_time(Duration::from_millis(1));
        let id = manager.create_session();

        tokio::time::sleep(Duration::from_millis(10)).await;
        manager.sweep_once().await;
        assert!(manager.is_closed(&id));
    }

    #[tokio::test]
    async fn test_sweep_closes_after_three_detection_failures() {
        let manager = Arc::new(SessionManager::new());
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();
        manager.set_detection(Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Box::pin(async { Err(td_types::McpError::Timeout("ping".into())) })
        }));
        let id = manager.create_session();

        manager.sweep_once().await;
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert!(manager.is_closed(&id));
    }

    #[tokio::test]
    async fn test_sweep_keeps_healthy_sessions() {
        let manager = Arc::new(SessionManager::new());
        manager.set_detection(Arc::new(|_| Box::pin(async { Ok(()) })));
        let id = manager.create_session();

        manager.sweep_once().await;
        assert!(manager.is_active(&id));
    }

    #[tokio::test]
    async fn test_detection_recovers_within_three_attempts() {
        let manager = Arc::new(SessionManager::new());
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();
        manager.set_detection(Arc::new(move |_| {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move {
                if n < 2 {
                    Err(td_types::McpError::Timeout("ping".into()))
                } else {
                    Ok(())
                }
            })
        }));
        let id = manager.create_session();

        manager.sweep_once().await;
        assert!(manager.is_active(&id));
    }
}
