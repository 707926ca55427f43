//! Request-scoped cancellation registry
//!
//! Dispatch registers a token per in-flight request id before spawning the
//! handler; an inbound `notifications/cancelled` looks the id up and trips
//! it. Handlers observe the token through their request context. Transport
//! disconnection never reaches these tokens.

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
pub struct CancellationRegistry {
    tokens: DashMap<String, CancellationToken>,
}

impl CancellationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a token for an in-flight request id, returning the handle
    /// the handler context observes.
    pub fn register(&self, key: String) -> CancellationToken {
        let token = CancellationToken::new();
        self.tokens.insert(key, token.clone());
        token
    }

    /// Trip the token for `key`. Returns false when the request already
    /// completed (or never existed), which callers log and ignore.
    pub fn cancel(&self, key: &str) -> bool {
        match self.tokens.remove(key) {
            Some((_, token)) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, key: &str) {
        self.tokens.remove(key);
    }

    /// Trip everything, used when the owning session closes.
    pub fn cancel_all(&self) {
        for entry in self.tokens.iter() {
            entry.value().cancel();
        }
        self.tokens.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cancel_trips_registered_token() {
        let registry = CancellationRegistry::new();
        let token = registry.register("2".into());
        assert!(!token.is_cancelled());
        assert!(registry.cancel("2"));
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancel_unknown_id_is_noop() {
        let registry = CancellationRegistry::new();
        assert!(!registry.cancel("404"));
    }

    #[tokio::test]
    async fn test_remove_prevents_late_cancel() {
        let registry = CancellationRegistry::new();
        let token = registry.register("5".into());
        registry.remove("5");
        assert!(!registry.cancel("5"));
        assert!(!token.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancel_all() {
        let registry = CancellationRegistry::new();
        let a = registry.register("a".into());
        let b = registry.register("b".into());
        registry.cancel_all();
        assert!(a.is_cancelled() && b.is_cancelled());
    }
}
