//! Session-keyed registry cache.
//!
//! Each session owns at most one built [`ShortKeyRegistry`]. A registry is
//! rebuilt lazily on first use after its TTL expires or after an explicit
//! invalidation. Builds are single-flight per session: concurrent callers
//! wait for the in-flight build and share its result. Readers hold an
//! `Arc`, so a rebuild swaps the registry wholesale. Slots without a
//! servable registry are dropped the next time any session is looked up.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::ToonError;
use crate::registry::{EntityKind, ShortKeyRegistry};
use crate::{RegistryFetcher, DEFAULT_REGISTRY_TTL};

/// Configuration for the RegistryStore.
#[derive(Debug, Clone)]
pub struct RegistryStoreConfig {
    /// How long a built registry is served before it is rebuilt.
    pub ttl: Duration,
}

impl Default for RegistryStoreConfig {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_REGISTRY_TTL,
        }
    }
}

#[derive(Debug, Default)]
struct SessionSlot {
    registry: Option<Arc<ShortKeyRegistry>>,
    built: Option<Instant>,
    invalidated: bool,
}

impl SessionSlot {
    /// True once the slot no longer holds a servable registry.
    fn is_reclaimable(&self, ttl: Duration) -> bool {
        self.fresh(ttl).is_none()
    }

    fn fresh(&self, ttl: Duration) -> Option<&Arc<ShortKeyRegistry>> {
        let built = self.built?;
        if self.invalidated || built.elapsed() >= ttl {
            return None;
        }
        self.registry.as_ref()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // A panicked build never leaves a partial registry behind, so the data is
    // still consistent after poisoning.
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Caches one registry per session, built from a [`RegistryFetcher`].
pub struct RegistryStore<F>
where
    F: RegistryFetcher,
{
    fetcher: F,
    config: RegistryStoreConfig,
    sessions: Mutex<HashMap<String, Arc<Mutex<SessionSlot>>>>,
}

impl<F> RegistryStore<F>
where
    F: RegistryFetcher,
{
    pub fn new(fetcher: F, config: RegistryStoreConfig) -> Self {
        Self {
            fetcher,
            config,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    fn slot(&self, session_id: &str) -> Arc<Mutex<SessionSlot>> {
        let mut sessions = lock(&self.sessions);
        let ttl = self.config.ttl;
        let before = sessions.len();
        // Slots are only cloned under the map lock, so a count of one means no
        // caller is waiting on or building into it.
        sessions.retain(|id, slot| {
            id == session_id
                || Arc::strong_count(&*slot) > 1
                || !lock(&**slot).is_reclaimable(ttl)
        });
        if sessions.len() < before {
            debug!(dropped = before - sessions.len(), "dropped expired session slots");
        }
        sessions.entry(session_id.to_string()).or_default().clone()
    }

    /// Return the session's registry, building it first if missing or stale.
    pub fn get_or_build(&self, session_id: &str) -> Result<Arc<ShortKeyRegistry>, ToonError> {
        let slot = self.slot(session_id);
        // Holding the slot lock across the fetch is what makes the build
        // single-flight; other sessions only contend on the outer map briefly.
        let mut guard = lock(&slot);
        if let Some(registry) = guard.fresh(self.config.ttl) {
            debug!(session = session_id, "registry cache hit");
            return Ok(Arc::clone(registry));
        }

        debug!(session = session_id, "building registry");
        let data = self
            .fetcher
            .fetch(session_id)
            .map_err(|e| ToonError::registry_build_failed(session_id, e))?;
        let registry = Arc::new(ShortKeyRegistry::build(&data));

        guard.registry = Some(Arc::clone(&registry));
        guard.built = Some(Instant::now());
        guard.invalidated = false;
        Ok(registry)
    }

    /// The current registry without building.
    ///
    /// Fails with `SESSION_NOT_FOUND` if none was built, or `REGISTRY_STALE`
    /// if the cached one has expired or was invalidated.
    pub fn peek(&self, session_id: &str) -> Result<Arc<ShortKeyRegistry>, ToonError> {
        let slot = lock(&self.sessions)
            .get(session_id)
            .cloned()
            .ok_or_else(|| ToonError::session_not_found(session_id))?;
        let guard = lock(&slot);
        if guard.registry.is_none() {
            return Err(ToonError::session_not_found(session_id));
        }
        let fresh = guard.fresh(self.config.ttl).cloned();
        fresh.ok_or_else(|| ToonError::registry_stale(session_id))
    }

    /// Whether the next `get_or_build` call would rebuild.
    pub fn is_stale(&self, session_id: &str) -> bool {
        self.peek(session_id).is_err()
    }

    /// Mark a session's registry stale; it is rebuilt on next use.
    pub fn invalidate(&self, session_id: &str) {
        let slot = lock(&self.sessions).get(session_id).cloned();
        if let Some(slot) = slot {
            lock(&slot).invalidated = true;
            debug!(session = session_id, "registry invalidated");
        }
    }

    /// Drop every cached registry.
    pub fn invalidate_all(&self) {
        lock(&self.sessions).clear();
    }

    /// Handle an upstream "not found" for an id resolved through this
    /// session's registry: the registry is treated as stale and invalidated.
    pub fn report_entity_not_found(
        &self,
        session_id: &str,
        kind: EntityKind,
        short_key: &str,
        canonical_id: &str,
    ) -> ToonError {
        warn!(
            session = session_id,
            kind = kind.as_str(),
            short_key,
            "resolved entity vanished upstream, invalidating registry"
        );
        self.invalidate(session_id);
        ToonError::entity_not_found(kind, short_key, canonical_id)
    }

    pub fn config(&self) -> &RegistryStoreConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::tests::sample_data;
    use crate::registry::RegistryBuildData;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingFetcher {
        calls: AtomicUsize,
        delay: Duration,
    }

    impl CountingFetcher {
        fn new(delay: Duration) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                delay,
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl RegistryFetcher for CountingFetcher {
        fn fetch(
            &self,
            _session_id: &str,
        ) -> Result<RegistryBuildData, Box<dyn std::error::Error + Send + Sync>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(self.delay);
            Ok(sample_data())
        }
    }

    struct FailingFetcher;

    impl RegistryFetcher for FailingFetcher {
        fn fetch(
            &self,
            _session_id: &str,
        ) -> Result<RegistryBuildData, Box<dyn std::error::Error + Send + Sync>> {
            Err("workspace unreachable".into())
        }
    }

    #[test]
    fn test_cached_within_ttl() {
        let fetcher = CountingFetcher::new(Duration::ZERO);
        let store = RegistryStore::new(&fetcher, RegistryStoreConfig::default());

        let a = store.get_or_build("s1").unwrap();
        let b = store.get_or_build("s1").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(fetcher.calls(), 1);

        store.get_or_build("s2").unwrap();
        assert_eq!(fetcher.calls(), 2);
    }

    #[test]
    fn test_expired_registry_is_rebuilt() {
        let fetcher = CountingFetcher::new(Duration::ZERO);
        let store = RegistryStore::new(&fetcher, RegistryStoreConfig { ttl: Duration::ZERO });
        let a = store.get_or_build("s1").unwrap();
        let b = store.get_or_build("s1").unwrap();
        assert_eq!(fetcher.calls(), 2);
        assert!(!Arc::ptr_eq(&a, &b));
        // Same snapshot, same keys
        assert_eq!(a.keys(EntityKind::User), b.keys(EntityKind::User));
    }

    #[test]
    fn test_invalidate_and_peek() {
        let fetcher = CountingFetcher::new(Duration::ZERO);
        let store = RegistryStore::new(&fetcher, RegistryStoreConfig::default());

        assert_eq!(store.peek("s1").unwrap_err().code(), "SESSION_NOT_FOUND");
        let held = store.get_or_build("s1").unwrap();
        assert!(!store.is_stale("s1"));

        store.invalidate("s1");
        assert_eq!(store.peek("s1").unwrap_err().code(), "REGISTRY_STALE");
        // Readers keep their snapshot after invalidation
        assert_eq!(held.resolve(EntityKind::User, "u0").unwrap(), "id-alice");

        store.get_or_build("s1").unwrap();
        assert_eq!(fetcher.calls(), 2);
        assert!(!store.is_stale("s1"));

        store.invalidate_all();
        assert_eq!(store.peek("s1").unwrap_err().code(), "SESSION_NOT_FOUND");
    }

    #[test]
    fn test_expired_sessions_are_dropped() {
        let fetcher = CountingFetcher::new(Duration::ZERO);
        let store = RegistryStore::new(&fetcher, RegistryStoreConfig { ttl: Duration::ZERO });
        store.get_or_build("s1").unwrap();
        assert_eq!(store.peek("s1").unwrap_err().code(), "REGISTRY_STALE");

        store.get_or_build("s2").unwrap();
        assert_eq!(store.peek("s1").unwrap_err().code(), "SESSION_NOT_FOUND");
        assert_eq!(lock(&store.sessions).len(), 1);
    }

    #[test]
    fn test_invalidated_session_is_dropped_on_next_build() {
        let fetcher = CountingFetcher::new(Duration::ZERO);
        let store = RegistryStore::new(&fetcher, RegistryStoreConfig::default());
        store.get_or_build("s1").unwrap();
        store.get_or_build("s2").unwrap();
        store.invalidate("s1");

        store.get_or_build("s2").unwrap();
        assert_eq!(store.peek("s1").unwrap_err().code(), "SESSION_NOT_FOUND");
        assert!(store.peek("s2").is_ok());
        assert_eq!(fetcher.calls(), 2);
    }

    #[test]
    fn test_entity_not_found_invalidates() {
        let fetcher = CountingFetcher::new(Duration::ZERO);
        let store = RegistryStore::new(&fetcher, RegistryStoreConfig::default());
        store.get_or_build("s1").unwrap();

        let err = store.report_entity_not_found("s1", EntityKind::User, "u1", "id-bob");
        assert_eq!(err.code(), "ENTITY_NOT_FOUND");
        assert!(err.suggestion().unwrap().contains("Refresh"));
        assert!(store.is_stale("s1"));
    }

    #[test]
    fn test_build_failure_is_structured() {
        let store = RegistryStore::new(FailingFetcher, RegistryStoreConfig::default());
        let err = store.get_or_build("s1").unwrap_err();
        assert_eq!(err.code(), "REGISTRY_BUILD_FAILED");
        assert_eq!(err.to_json()["cause"], "workspace unreachable");
        assert_eq!(err.to_json()["sessionId"], "s1");
    }

    #[test]
    fn test_concurrent_callers_share_one_build() {
        let fetcher = CountingFetcher::new(Duration::from_millis(50));
        let store = RegistryStore::new(&fetcher, RegistryStoreConfig::default());

        let store = &store;
        let registries: Vec<Arc<ShortKeyRegistry>> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| scope.spawn(move || store.get_or_build("s1").unwrap()))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(fetcher.calls(), 1);
        assert!(registries.iter().all(|r| Arc::ptr_eq(r, &registries[0])));
    }
}
