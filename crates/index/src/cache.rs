use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use ingest::content_hash;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::clock::{Clock, SystemClock};
use crate::embeddings::EmbeddingProvider;
use crate::error::{IndexError, IndexResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingCacheConfig {
    pub ttl_secs: u64,
    pub enabled: bool,
}

impl Default for EmbeddingCacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 3600,
            enabled: true,
        }
    }
}

impl EmbeddingCacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: String,
    pub vector: Vec<f32>,
    pub created_at: Instant,
    pub ttl: Duration,
}

impl CacheEntry {
    pub fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.created_at) >= self.ttl
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: usize,
    pub misses: usize,
    pub provider_calls: usize,
}

/// TTL cache in front of an [`EmbeddingProvider`], keyed by content hash.
///
/// Entries live until they expire and are swept by [`cleanup_expired`], or
/// until [`clear`] is called. Two tasks missing on the same key at once may
/// both call the provider; the later write wins.
///
/// [`cleanup_expired`]: EmbeddingCache::cleanup_expired
/// [`clear`]: EmbeddingCache::clear
pub struct EmbeddingCache {
    provider: Arc<dyn EmbeddingProvider>,
    entries: DashMap<String, CacheEntry>,
    clock: Arc<dyn Clock>,
    config: EmbeddingCacheConfig,
    hits: AtomicUsize,
    misses: AtomicUsize,
    provider_calls: AtomicUsize,
}

impl EmbeddingCache {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, config: EmbeddingCacheConfig) -> Self {
        Self::with_clock(provider, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        provider: Arc<dyn EmbeddingProvider>,
        config: EmbeddingCacheConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            provider,
            entries: DashMap::new(),
            clock,
            config,
            hits: AtomicUsize::new(0),
            misses: AtomicUsize::new(0),
            provider_calls: AtomicUsize::new(0),
        }
    }

    pub fn provider(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.provider
    }

    pub async fn get_or_compute(&self, text: &str) -> IndexResult<Vec<f32>> {
        if !self.config.enabled {
            self.provider_calls.fetch_add(1, Ordering::Relaxed);
            return self.provider.embed(text).await;
        }

        let key = content_hash(text);
        if let Some(vector) = self.fresh(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(vector);
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        self.provider_calls.fetch_add(1, Ordering::Relaxed);
        let vector = self.provider.embed(text).await?;
        self.store(key, vector.clone());
        Ok(vector)
    }

    /// Hits are served from the cache; all misses go to the provider in a
    /// single batched call. Output order matches `texts`.
    pub async fn get_or_compute_batch(&self, texts: &[String]) -> IndexResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        if !self.config.enabled {
            self.provider_calls.fetch_add(1, Ordering::Relaxed);
            return self.provider.embed_batch(texts).await;
        }

        let keys: Vec<String> = texts.iter().map(|t| content_hash(t)).collect();
        let mut resolved: HashMap<&str, Vec<f32>> = HashMap::new();
        let mut missing_keys: Vec<&str> = Vec::new();
        let mut missing_texts: Vec<String> = Vec::new();

        for (key, text) in keys.iter().zip(texts) {
            if resolved.contains_key(key.as_str()) || missing_keys.contains(&key.as_str()) {
                continue;
            }
            match self.fresh(key) {
                Some(vector) => {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    resolved.insert(key.as_str(), vector);
                }
                None => {
                    self.misses.fetch_add(1, Ordering::Relaxed);
                    missing_keys.push(key.as_str());
                    missing_texts.push(text.clone());
                }
            }
        }

        if !missing_texts.is_empty() {
            debug!(
                hits = resolved.len(),
                misses = missing_texts.len(),
                "Embedding batch cache partition"
            );
            self.provider_calls.fetch_add(1, Ordering::Relaxed);
            let computed = self.provider.embed_batch(&missing_texts).await?;
            if computed.len() != missing_texts.len() {
                return Err(IndexError::EmbeddingUnavailable(format!(
                    "provider returned {} vectors for {} texts",
                    computed.len(),
                    missing_texts.len()
                )));
            }
            for (key, vector) in missing_keys.into_iter().zip(computed) {
                self.store(key.to_string(), vector.clone());
                resolved.insert(key, vector);
            }
        }

        keys.iter()
            .map(|key| {
                resolved
                    .get(key.as_str())
                    .cloned()
                    .ok_or_else(|| IndexError::EmbeddingUnavailable(format!("no vector for {key}")))
            })
            .collect()
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn cleanup_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            info!(removed, remaining = self.entries.len(), "Swept expired embeddings");
        }
        removed
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The stored entry for `text`, expired or not.
    pub fn entry(&self, text: &str) -> Option<CacheEntry> {
        self.entries.get(&content_hash(text)).map(|e| e.value().clone())
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            provider_calls: self.provider_calls.load(Ordering::Relaxed),
        }
    }

    fn fresh(&self, key: &str) -> Option<Vec<f32>> {
        let now = self.clock.now();
        self.entries
            .get(key)
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.vector.clone())
    }

    fn store(&self, key: String, vector: Vec<f32>) {
        let entry = CacheEntry {
            key: key.clone(),
            vector,
            created_at: self.clock.now(),
            ttl: self.config.ttl(),
        };
        self.entries.insert(key, entry);
    }
}
