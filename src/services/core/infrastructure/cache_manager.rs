// src/services/core/infrastructure/cache_manager.rs
// Read-through cache layer. Cache outages never fail a request: every
// backend error degrades to a miss (reads) or a no-op (writes) and the
// authoritative store answers instead.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use crate::utils::time::now_ms;
use crate::utils::{LeadFlowError, LeadFlowResult};

/// TTL policy per data class. Quota checks are the hottest and most
/// volatile keys, so they get the shortest window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheTtl {
    /// 60s: per-recipient quota availability.
    QuotaCheck,
    /// 300s: subscriptions, eligibility snapshots, stats, settings.
    Standard,
    /// 3600s: rarely-changing reference data.
    Long,
}

impl CacheTtl {
    pub fn as_secs(&self) -> u64 {
        match self {
            CacheTtl::QuotaCheck => 60,
            CacheTtl::Standard => 300,
            CacheTtl::Long => 3600,
        }
    }
}

/// Minimal key-value contract the cache layer is built on. Implementations
/// must be safe to share across tasks.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get_raw(&self, key: &str) -> LeadFlowResult<Option<String>>;
    async fn put_raw(&self, key: &str, value: String, ttl_secs: u64) -> LeadFlowResult<()>;
    async fn delete_raw(&self, key: &str) -> LeadFlowResult<()>;
    async fn keys(&self) -> LeadFlowResult<Vec<String>>;
}

/// In-process backend: a TTL map behind a mutex. Expired entries are
/// dropped lazily on read and on `keys()`.
#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, (String, i64)>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> LeadFlowResult<std::sync::MutexGuard<'_, HashMap<String, (String, i64)>>> {
        self.entries
            .lock()
            .map_err(|_| LeadFlowError::storage_unavailable("cache mutex poisoned"))
    }
}

#[async_trait]
impl CacheBackend for MemoryCache {
    async fn get_raw(&self, key: &str) -> LeadFlowResult<Option<String>> {
        let mut entries = self.lock()?;
        match entries.get(key) {
            Some((value, expires_at)) if *expires_at > now_ms() => Ok(Some(value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn put_raw(&self, key: &str, value: String, ttl_secs: u64) -> LeadFlowResult<()> {
        let expires_at = now_ms() + (ttl_secs as i64) * 1000;
        self.lock()?.insert(key.to_string(), (value, expires_at));
        Ok(())
    }

    async fn delete_raw(&self, key: &str) -> LeadFlowResult<()> {
        self.lock()?.remove(key);
        Ok(())
    }

    async fn keys(&self) -> LeadFlowResult<Vec<String>> {
        let now = now_ms();
        let mut entries = self.lock()?;
        entries.retain(|_, (_, expires_at)| *expires_at > now);
        Ok(entries.keys().cloned().collect())
    }
}

/// Typed facade over a `CacheBackend` with namespacing, JSON codec and
/// glob invalidation.
#[derive(Clone)]
pub struct CacheManager {
    backend: Arc<dyn CacheBackend>,
    namespace: String,
}

impl CacheManager {
    pub fn new(backend: Arc<dyn CacheBackend>) -> Self {
        Self::with_namespace(backend, "leadflow")
    }

    pub fn with_namespace(backend: Arc<dyn CacheBackend>, namespace: &str) -> Self {
        Self {
            backend,
            namespace: namespace.to_string(),
        }
    }

    fn build_key(&self, key: &str) -> String {
        format!("{}:{}", self.namespace, key)
    }

    /// Typed read. Backend and codec failures both count as a miss.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let namespaced = self.build_key(key);
        match self.backend.get_raw(&namespaced).await {
            Ok(Some(raw)) => match serde_json::from_str::<T>(&raw) {
                Ok(value) => Some(value),
                Err(e) => {
                    log::debug!("cache decode failed for {}: {}", namespaced, e);
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                log::warn!("cache read failed for {}: {}", namespaced, e);
                None
            }
        }
    }

    /// Typed write. Failures are logged and dropped.
    pub async fn set<T: Serialize>(&self, key: &str, value: &T, ttl: CacheTtl) {
        let namespaced = self.build_key(key);
        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(e) => {
                log::warn!("cache encode failed for {}: {}", namespaced, e);
                return;
            }
        };
        if let Err(e) = self.backend.put_raw(&namespaced, raw, ttl.as_secs()).await {
            log::warn!("cache write failed for {}: {}", namespaced, e);
        }
    }

    pub async fn delete(&self, key: &str) {
        let namespaced = self.build_key(key);
        if let Err(e) = self.backend.delete_raw(&namespaced).await {
            log::warn!("cache delete failed for {}: {}", namespaced, e);
        }
    }

    /// Delete every key matching a glob pattern (`*` wildcards only).
    /// Returns how many keys were removed.
    pub async fn invalidate(&self, pattern: &str) -> usize {
        let namespaced = self.build_key(pattern);
        let escaped = namespaced
            .split('*')
            .map(regex::escape)
            .collect::<Vec<_>>()
            .join(".*");
        let matcher = match regex::Regex::new(&format!("^{}$", escaped)) {
            Ok(matcher) => matcher,
            Err(e) => {
                log::warn!("bad invalidation pattern {}: {}", pattern, e);
                return 0;
            }
        };

        let keys = match self.backend.keys().await {
            Ok(keys) => keys,
            Err(e) => {
                log::warn!("cache key scan failed: {}", e);
                return 0;
            }
        };

        let mut removed = 0;
        for key in keys.iter().filter(|k| matcher.is_match(k)) {
            if self.backend.delete_raw(key).await.is_ok() {
                removed += 1;
            }
        }
        removed
    }

    /// Read-through: serve the cached value, otherwise run `compute`, cache
    /// its result and return it. Only `compute` errors propagate.
    pub async fn get_or_compute<T, F, Fut>(
        &self,
        key: &str,
        ttl: CacheTtl,
        compute: F,
    ) -> LeadFlowResult<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = LeadFlowResult<T>>,
    {
        if let Some(cached) = self.get::<T>(key).await {
            return Ok(cached);
        }
        let value = compute().await?;
        self.set(key, &value, ttl).await;
        Ok(value)
    }
}
