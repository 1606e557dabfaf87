//! Injectable store of in-flight and completed fetches.
//!
//! Concurrent requests for the same key share one fetch. Failures are not
//! cached, so the next request retries.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
    Directory,
    Index,
}

/// `(source kind, folder or index id, path)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub kind: SourceKind,
    pub scope: String,
    pub path: String,
}

impl CacheKey {
    pub fn directory(folder_id: Option<&str>, path: &str) -> Self {
        Self {
            kind: SourceKind::Directory,
            scope: folder_id.unwrap_or("").to_string(),
            path: path.to_string(),
        }
    }

    pub fn index(index_id: &str, path: &str) -> Self {
        Self {
            kind: SourceKind::Index,
            scope: index_id.to_string(),
            path: path.to_string(),
        }
    }
}

type Slot<V> = Arc<OnceCell<Arc<V>>>;

pub struct FetchCache<V> {
    slots: Mutex<HashMap<CacheKey, Slot<V>>>,
}

impl<V> Default for FetchCache<V> {
    fn default() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }
}

impl<V: Send + Sync + 'static> FetchCache<V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get_or_fetch<F, Fut>(&self, key: CacheKey, fetch: F) -> Result<Arc<V>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>>,
    {
        let slot = self.slots.lock().entry(key).or_default().clone();
        let value = slot
            .get_or_try_init(|| async { fetch().await.map(Arc::new) })
            .await?;
        Ok(value.clone())
    }

    /// Completed value for `key`, without fetching.
    pub fn peek(&self, key: &CacheKey) -> Option<Arc<V>> {
        self.slots.lock().get(key).and_then(|slot| slot.get().cloned())
    }

    /// Fire-and-forget fetch into the cache.
    pub fn prefetch<Fut>(self: &Arc<Self>, key: CacheKey, fetch: Fut)
    where
        Fut: Future<Output = Result<V>> + Send + 'static,
    {
        if self.peek(&key).is_some() {
            return;
        }
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let label = format!("{:?}:{}:{}", key.kind, key.scope, key.path);
            if let Err(e) = cache.get_or_fetch(key, || fetch).await {
                debug!("prefetch of {} failed: {}", label, e);
            }
        });
    }

    pub fn invalidate(&self, key: &CacheKey) -> bool {
        self.slots.lock().remove(key).is_some()
    }

    /// Drop every entry under `(kind, scope)`.
    pub fn invalidate_scope(&self, kind: SourceKind, scope: &str) -> usize {
        let mut slots = self.slots.lock();
        let before = slots.len();
        slots.retain(|k, _| !(k.kind == kind && k.scope == scope));
        before - slots.len()
    }

    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PickerError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn concurrent_requests_share_one_fetch() {
        let cache: FetchCache<Vec<u32>> = FetchCache::new();
        let counter = AtomicUsize::new(0);
        let calls = &counter;
        let fetch = move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            Ok::<_, PickerError>(vec![1, 2, 3])
        };

        let key = CacheKey::directory(Some("f1"), "/docs");
        let (a, b) = tokio::join!(
            cache.get_or_fetch(key.clone(), fetch),
            cache.get_or_fetch(key.clone(), fetch)
        );
        assert_eq!(*a.unwrap(), vec![1, 2, 3]);
        assert_eq!(*b.unwrap(), vec![1, 2, 3]);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failures_are_not_cached() {
        let cache: FetchCache<u32> = FetchCache::new();
        let key = CacheKey::index("kb1", "/");
        let err = cache
            .get_or_fetch(key.clone(), || async { Err(PickerError::server("boom")) })
            .await
            .unwrap_err();
        assert_eq!(err, PickerError::TransientServer("boom".into()));
        assert!(cache.peek(&key).is_none());

        let value = cache.get_or_fetch(key.clone(), || async { Ok(7) }).await.unwrap();
        assert_eq!(*value, 7);
    }

    #[tokio::test]
    async fn invalidation_forces_refetch() {
        let cache: FetchCache<u32> = FetchCache::new();
        let key = CacheKey::index("kb1", "/a");
        cache.get_or_fetch(key.clone(), || async { Ok(1) }).await.unwrap();
        cache.get_or_fetch(key.clone(), || async { Ok(2) }).await.unwrap();
        assert_eq!(cache.peek(&key).as_deref(), Some(&1));

        assert!(cache.invalidate(&key));
        let fresh = cache.get_or_fetch(key.clone(), || async { Ok(2) }).await.unwrap();
        assert_eq!(*fresh, 2);
    }

    #[tokio::test]
    async fn scope_invalidation_is_limited_to_its_scope() {
        let cache: FetchCache<u32> = FetchCache::new();
        for (scope, path) in [("kb1", "/"), ("kb1", "/a"), ("kb2", "/")] {
            cache
                .get_or_fetch(CacheKey::index(scope, path), || async { Ok(0) })
                .await
                .unwrap();
        }
        cache
            .get_or_fetch(CacheKey::directory(None, "/"), || async { Ok(0) })
            .await
            .unwrap();

        assert_eq!(cache.invalidate_scope(SourceKind::Index, "kb1"), 2);
        assert_eq!(cache.len(), 2);
    }

    #[tokio::test]
    async fn prefetch_populates_in_background() {
        let cache: Arc<FetchCache<u32>> = Arc::new(FetchCache::new());
        let key = CacheKey::directory(Some("sub"), "/sub");
        cache.prefetch(key.clone(), async { Ok(42) });
        for _ in 0..50 {
            if cache.peek(&key).is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(cache.peek(&key).as_deref(), Some(&42));
    }
}
