//! Enrichment cache: `match id -> EnrichmentContext`, backed by a key-value store.
//!
//! The cache is an explicitly owned handle. Readers take an immutable
//! [`CacheSnapshot`]; writers go through [`EnrichmentCache::merge`], which
//! swaps in a new map so earlier snapshots never change under a reader.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use specter_shared::{EnrichmentContext, Result, SpecterError};
use specter_storage::Storage;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

/// Key under which the serialized cache is stored.
pub const CACHE_KEY: &str = "enrichment_cache";

/// Immutable view of the cache at one point in time.
pub type CacheSnapshot = Arc<HashMap<String, EnrichmentContext>>;

// ---------------------------------------------------------------------------
// Durable store
// ---------------------------------------------------------------------------

/// Durable home of the serialized cache (one JSON document).
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Read the stored document, if any.
    async fn load(&self) -> Result<Option<String>>;
    /// Overwrite the stored document.
    async fn save(&self, json: &str) -> Result<()>;
    /// Remove the stored document.
    async fn clear(&self) -> Result<()>;
}

#[async_trait]
impl CacheStore for Storage {
    async fn load(&self) -> Result<Option<String>> {
        self.get_value(CACHE_KEY).await
    }

    async fn save(&self, json: &str) -> Result<()> {
        self.put_value(CACHE_KEY, json).await
    }

    async fn clear(&self) -> Result<()> {
        self.delete_value(CACHE_KEY).await.map(|_| ())
    }
}

// ---------------------------------------------------------------------------
// EnrichmentCache
// ---------------------------------------------------------------------------

/// Owned, single-writer enrichment cache.
pub struct EnrichmentCache {
    entries: RwLock<CacheSnapshot>,
    store: Option<Arc<dyn CacheStore>>,
    /// Serializes writes to the store so a save never lands after a newer one.
    write_lock: AsyncMutex<()>,
}

impl EnrichmentCache {
    /// An empty cache with no durable store.
    pub fn in_memory() -> Self {
        Self {
            entries: RwLock::new(Arc::new(HashMap::new())),
            store: None,
            write_lock: AsyncMutex::new(()),
        }
    }

    /// Load the cache once from `store`.
    ///
    /// A missing document yields an empty cache; an unreadable or corrupt one
    /// is logged and also yields an empty cache.
    pub async fn load(store: Arc<dyn CacheStore>) -> Self {
        let entries = match store.load().await {
            Ok(Some(json)) => match serde_json::from_str::<HashMap<String, EnrichmentContext>>(&json) {
                Ok(map) => {
                    info!(entries = map.len(), "enrichment cache loaded");
                    map
                }
                Err(e) => {
                    warn!(error = %e, "stored enrichment cache is corrupt, starting empty");
                    HashMap::new()
                }
            },
            Ok(None) => {
                debug!("no stored enrichment cache");
                HashMap::new()
            }
            Err(e) => {
                warn!(error = %e, "failed to read enrichment cache, starting empty");
                HashMap::new()
            }
        };

        Self {
            entries: RwLock::new(Arc::new(entries)),
            store: Some(store),
            write_lock: AsyncMutex::new(()),
        }
    }

    /// The current contents. Later writes do not affect the returned map.
    pub fn snapshot(&self) -> CacheSnapshot {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn get(&self, match_id: &str) -> Option<EnrichmentContext> {
        self.snapshot().get(match_id).cloned()
    }

    pub fn contains(&self, match_id: &str) -> bool {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(match_id)
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Insert every entry whose key is absent. Returns how many were inserted.
    ///
    /// Existing keys are never overwritten: a context is written exactly once.
    pub fn merge(&self, entries: impl IntoIterator<Item = (String, EnrichmentContext)>) -> usize {
        let mut guard = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let mut next: HashMap<String, EnrichmentContext> = (**guard).clone();

        let mut inserted = 0;
        for (id, context) in entries {
            if let std::collections::hash_map::Entry::Vacant(slot) = next.entry(id) {
                slot.insert(context);
                inserted += 1;
            }
        }

        if inserted > 0 {
            *guard = Arc::new(next);
        }
        inserted
    }

    /// Write the whole cache to the durable store, if one is attached.
    ///
    /// Saves run one at a time and each serializes the map current when it
    /// gets its turn, so the stored document never regresses.
    pub async fn persist(&self) -> Result<()> {
        let Some(store) = &self.store else {
            return Ok(());
        };

        let _turn = self.write_lock.lock().await;
        let snapshot = self.snapshot();
        // Sorted keys keep the stored document stable between runs.
        let ordered: BTreeMap<&String, &EnrichmentContext> = snapshot.iter().collect();
        let json = serde_json::to_string(&ordered)
            .map_err(|e| SpecterError::Storage(format!("failed to serialize cache: {e}")))?;

        store.save(&json).await?;
        debug!(entries = snapshot.len(), bytes = json.len(), "enrichment cache persisted");
        Ok(())
    }

    /// Drop every entry, in memory and in the durable store.
    pub async fn clear(&self) -> Result<()> {
        let _turn = self.write_lock.lock().await;
        *self.entries.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(HashMap::new());
        if let Some(store) = &self.store {
            store.clear().await?;
        }
        info!("enrichment cache cleared");
        Ok(())
    }
}

impl Default for EnrichmentCache {
    fn default() -> Self {
        Self::in_memory()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;
    use uuid::Uuid;

    /// In-memory [`CacheStore`] that records every save.
    #[derive(Default)]
    pub(crate) struct MemoryStore {
        pub value: Mutex<Option<String>>,
        pub saves: Mutex<usize>,
        pub fail_saves: bool,
        pub first_save_delay: Option<Duration>,
    }

    #[async_trait]
    impl CacheStore for MemoryStore {
        async fn load(&self) -> Result<Option<String>> {
            Ok(self.value.lock().unwrap().clone())
        }

        async fn save(&self, json: &str) -> Result<()> {
            let nth = {
                let mut saves = self.saves.lock().unwrap();
                *saves += 1;
                *saves
            };
            if let (1, Some(delay)) = (nth, self.first_save_delay) {
                tokio::time::sleep(delay).await;
            }
            if self.fail_saves {
                return Err(SpecterError::Storage("disk full".into()));
            }
            *self.value.lock().unwrap() = Some(json.to_string());
            Ok(())
        }

        async fn clear(&self) -> Result<()> {
            *self.value.lock().unwrap() = None;
            Ok(())
        }
    }

    fn titled(title: &str) -> EnrichmentContext {
        EnrichmentContext {
            title: Some(title.into()),
            ..Default::default()
        }
    }

    #[test]
    fn merge_never_overwrites() {
        let cache = EnrichmentCache::in_memory();
        assert_eq!(cache.merge([("a".to_string(), titled("first"))]), 1);
        assert_eq!(
            cache.merge([("a".to_string(), titled("second")), ("b".to_string(), titled("b"))]),
            1
        );
        assert_eq!(cache.get("a").unwrap().title.as_deref(), Some("first"));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn snapshots_are_immutable() {
        let cache = EnrichmentCache::in_memory();
        let before = cache.snapshot();
        cache.merge([("a".to_string(), titled("A"))]);
        assert!(before.is_empty());
        assert_eq!(cache.snapshot().len(), 1);
    }

    #[tokio::test]
    async fn persist_and_reload_roundtrip() {
        let store = Arc::new(MemoryStore::default());
        let cache = EnrichmentCache::load(store.clone()).await;
        assert!(cache.is_empty());

        cache.merge([
            ("a".to_string(), titled("A")),
            ("b".to_string(), EnrichmentContext::failed("HTTP 404")),
        ]);
        cache.persist().await.unwrap();

        let reloaded = EnrichmentCache::load(store).await;
        assert_eq!(reloaded.len(), 2);
        assert!(reloaded.get("b").unwrap().is_error());
    }

    #[tokio::test]
    async fn overlapping_persists_never_store_an_older_map() {
        let store = Arc::new(MemoryStore {
            first_save_delay: Some(Duration::from_millis(50)),
            ..Default::default()
        });
        let cache = EnrichmentCache::load(store.clone()).await;
        cache.merge([("a".to_string(), titled("A"))]);

        let slow = cache.persist();
        let fast = async {
            while *store.saves.lock().unwrap() == 0 {
                tokio::task::yield_now().await;
            }
            cache.merge([("b".to_string(), titled("B"))]);
            cache.persist().await
        };
        let (first, second) = tokio::join!(slow, fast);
        first.unwrap();
        second.unwrap();

        let reloaded = EnrichmentCache::load(store.clone()).await;
        assert_eq!(reloaded.len(), 2);
        assert_eq!(*store.saves.lock().unwrap(), 2);
    }

    #[tokio::test]
    async fn corrupt_store_degrades_to_empty() {
        let store = Arc::new(MemoryStore {
            value: Mutex::new(Some("{not json".into())),
            ..Default::default()
        });
        let cache = EnrichmentCache::load(store).await;
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn clear_empties_store() {
        let store = Arc::new(MemoryStore::default());
        let cache = EnrichmentCache::load(store.clone()).await;
        cache.merge([("a".to_string(), titled("A"))]);
        cache.persist().await.unwrap();

        cache.clear().await.unwrap();
        assert!(cache.is_empty());
        assert!(store.value.lock().unwrap().is_none());
    }

    #[tokio::test]
    async fn readonly_storage_serves_reads_and_refuses_saves() {
        let path = std::env::temp_dir().join(format!("specter_cache_{}.db", Uuid::now_v7()));
        let writable = Arc::new(Storage::open(&path).await.expect("open db"));
        let cache = EnrichmentCache::load(writable.clone()).await;
        cache.merge([("a".to_string(), titled("A"))]);
        cache.persist().await.unwrap();
        drop(cache);
        drop(writable);

        let readonly = Arc::new(Storage::open_readonly(&path).await.expect("open read-only"));
        let keys = readonly.list_keys().await.unwrap();
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].0, CACHE_KEY);

        let cache = EnrichmentCache::load(readonly).await;
        assert_eq!(cache.get("a").unwrap().title.as_deref(), Some("A"));
        cache.merge([("b".to_string(), titled("B"))]);
        let err = cache.persist().await.unwrap_err();
        assert!(err.to_string().contains("read-only"));
    }

    #[tokio::test]
    async fn libsql_storage_backs_the_cache() {
        let path = std::env::temp_dir().join(format!("specter_cache_{}.db", Uuid::now_v7()));
        let storage = Arc::new(Storage::open(&path).await.expect("open db"));

        let cache = EnrichmentCache::load(storage.clone()).await;
        cache.merge([("https://a.example".to_string(), titled("A"))]);
        cache.persist().await.unwrap();
        drop(cache);

        let reloaded = EnrichmentCache::load(storage).await;
        assert_eq!(
            reloaded.get("https://a.example").unwrap().title.as_deref(),
            Some("A")
        );
    }
}
