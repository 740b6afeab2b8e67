use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Serialize, de::DeserializeOwned};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::error::CacheError;
use crate::metrics::{CACHE_HITS, CACHE_MISSES};
use crate::models::GenerateRequest;

const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

// Cache entry with its absolute deadline
#[derive(Clone, Debug)]
pub struct CacheEntry {
    pub value: String,
    pub expires_at: Instant,
}

impl CacheEntry {
    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

// Values are JSON strings; per-key operations must be linearizable
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError>;

    async fn delete(&self, key: &str) -> Result<(), CacheError>;

    // Reachability check used by the health monitor
    async fn ping(&self) -> Result<(), CacheError>;

    fn purge_expired(&self) -> usize {
        0
    }

    fn len(&self) -> usize;
}

#[derive(Default)]
pub struct MemoryBackend {
    entries: DashMap<String, CacheEntry>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheBackend for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let now = Instant::now();

        if let Some(entry) = self.entries.get(key) {
            if !entry.is_expired(now) {
                return Ok(Some(entry.value.clone()));
            }
        }

        // expired: drop it unless a writer replaced it in between
        self.entries.remove_if(key, |_, entry| entry.is_expired(now));
        Ok(None)
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        let now = Instant::now();
        // ttl too large to represent: keep it for a century instead
        let expires_at = now.checked_add(ttl).unwrap_or_else(|| now + FAR_FUTURE);
        self.entries.insert(key.to_string(), CacheEntry { value, expires_at });
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.entries.remove(key);
        Ok(())
    }

    async fn ping(&self) -> Result<(), CacheError> {
        Ok(())
    }

    fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        before.saturating_sub(self.entries.len())
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Typed front of the cache store. Reads degrade to absent when the backend
/// is down; writes report the failure.
#[derive(Clone)]
pub struct TtlCache {
    backend: Arc<dyn CacheBackend>,
}

impl TtlCache {
    pub fn new(backend: Arc<dyn CacheBackend>) -> Self {
        Self { backend }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryBackend::new()))
    }

    pub fn backend(&self) -> Arc<dyn CacheBackend> {
        Arc::clone(&self.backend)
    }

    pub async fn put<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let payload = serde_json::to_string(value)?;
        self.backend.set(key, payload, ttl).await
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = match self.backend.get(key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                CACHE_MISSES.inc();
                return None;
            }
            Err(e) => {
                tracing::warn!(key, error = %e, "Cache read failed, treating as absent");
                CACHE_MISSES.inc();
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(value) => {
                CACHE_HITS.inc();
                Some(value)
            }
            Err(e) => {
                tracing::warn!(key, error = %e, "Cached payload does not decode, treating as absent");
                CACHE_MISSES.inc();
                None
            }
        }
    }

    // Idempotent: deleting an absent key is not an error
    pub async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.backend.delete(key).await
    }

    pub fn purge_expired(&self) -> usize {
        self.backend.purge_expired()
    }

    pub fn len(&self) -> usize {
        self.backend.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// Create a response cache key (hash of model + prompt + options)
pub fn make_cache_key(req: &GenerateRequest) -> String {
    let mut hasher = Sha256::new();
    hasher.update(&req.model);
    hasher.update([0u8]);
    hasher.update(&req.prompt);
    hasher.update([0u8]);
    // serde_json maps are key-ordered, so equal options hash equally
    if let Ok(options) = serde_json::to_string(&req.options) {
        hasher.update(options);
    }
    format!("generate:{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[tokio::test(start_paused = true)]
    async fn test_put_then_get_returns_value() {
        let cache = TtlCache::in_memory();
        cache.put("k", &vec![1, 2, 3], Duration::from_secs(10)).await.unwrap();

        let value: Option<Vec<i32>> = cache.get("k").await;
        assert_eq!(value, Some(vec![1, 2, 3]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_after_ttl_is_absent() {
        let cache = TtlCache::in_memory();
        cache.put("k", "v", Duration::from_secs(10)).await.unwrap();

        tokio::time::advance(Duration::from_secs(9)).await;
        assert_eq!(cache.get::<String>("k").await.as_deref(), Some("v"));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(cache.get::<String>("k").await, None);
        // lazily removed on read
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_put_overwrites_and_resets_expiry() {
        let cache = TtlCache::in_memory();
        cache.put("k", "old", Duration::from_secs(5)).await.unwrap();
        tokio::time::advance(Duration::from_secs(4)).await;
        cache.put("k", "new", Duration::from_secs(5)).await.unwrap();
        tokio::time::advance(Duration::from_secs(4)).await;

        assert_eq!(cache.get::<String>("k").await.as_deref(), Some("new"));
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let cache = TtlCache::in_memory();
        cache.put("k", "v", Duration::from_secs(10)).await.unwrap();

        cache.delete("k").await.unwrap();
        cache.delete("k").await.unwrap();
        cache.delete("never-written").await.unwrap();
        assert_eq!(cache.get::<String>("k").await, None);
    }

    #[tokio::test]
    async fn test_unserializable_payload_is_surfaced() {
        let cache = TtlCache::in_memory();
        // JSON objects require string keys
        let mut bad: HashMap<Vec<u8>, u8> = HashMap::new();
        bad.insert(vec![1], 1);

        let result = cache.put("bad", &bad, Duration::from_secs(1)).await;
        assert!(matches!(result, Err(CacheError::Serialization(_))));
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_expired_reclaims_only_stale_entries() {
        let cache = TtlCache::in_memory();
        cache.put("short", "a", Duration::from_secs(1)).await.unwrap();
        cache.put("long", "b", Duration::from_secs(60)).await.unwrap();

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.len(), 1);
    }

    struct DownBackend;

    #[async_trait]
    impl CacheBackend for DownBackend {
        async fn get(&self, _key: &str) -> Result<Option<String>, CacheError> {
            Err(CacheError::Unavailable("connection refused".into()))
        }
        async fn set(&self, _key: &str, _value: String, _ttl: Duration) -> Result<(), CacheError> {
            Err(CacheError::Unavailable("connection refused".into()))
        }
        async fn delete(&self, _key: &str) -> Result<(), CacheError> {
            Err(CacheError::Unavailable("connection refused".into()))
        }
        async fn ping(&self) -> Result<(), CacheError> {
            Err(CacheError::Unavailable("connection refused".into()))
        }
        fn len(&self) -> usize {
            0
        }
    }

    #[tokio::test]
    async fn test_unavailable_backend_reads_as_absent() {
        let cache = TtlCache::new(Arc::new(DownBackend));
        assert_eq!(cache.get::<String>("k").await, None);
        assert!(matches!(
            cache.put("k", "v", Duration::from_secs(1)).await,
            Err(CacheError::Unavailable(_))
        ));
    }

    #[test]
    fn test_cache_key_depends_on_model_and_prompt() {
        let a = GenerateRequest::new("llama3", "hello");
        let b = GenerateRequest::new("llama3", "hello!");
        let c = GenerateRequest::new("mistral", "hello");
        assert_eq!(make_cache_key(&a), make_cache_key(&a.clone()));
        assert_ne!(make_cache_key(&a), make_cache_key(&b));
        assert_ne!(make_cache_key(&a), make_cache_key(&c));
    }

    #[test]
    fn test_cache_key_depends_on_options() {
        let plain = GenerateRequest::new("llama3", "hello");

        let mut warm = plain.clone();
        warm.options.insert("temperature".into(), serde_json::json!(0.9));
        let mut cold = plain.clone();
        cold.options.insert("temperature".into(), serde_json::json!(0.1));
        let mut system = plain.clone();
        system.options.insert("system".into(), serde_json::json!("be terse"));

        assert_ne!(make_cache_key(&plain), make_cache_key(&warm));
        assert_ne!(make_cache_key(&warm), make_cache_key(&cold));
        assert_ne!(make_cache_key(&plain), make_cache_key(&system));
    }

    #[test]
    fn test_cache_key_ignores_option_order() {
        let a: GenerateRequest = serde_json::from_str(
            r#"{"model":"llama3","prompt":"hi","temperature":0.5,"top_k":40}"#,
        )
        .unwrap();
        let b: GenerateRequest = serde_json::from_str(
            r#"{"top_k":40,"model":"llama3","temperature":0.5,"prompt":"hi"}"#,
        )
        .unwrap();
        assert_eq!(make_cache_key(&a), make_cache_key(&b));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unrepresentable_ttl_does_not_panic() {
        let cache = TtlCache::in_memory();
        cache.put("k", "v", Duration::MAX).await.unwrap();

        tokio::time::advance(Duration::from_secs(365 * 24 * 60 * 60)).await;
        assert_eq!(cache.get::<String>("k").await.as_deref(), Some("v"));
    }
}
