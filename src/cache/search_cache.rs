/// Ranked-result cache keyed by canonical query
///
/// Every operation here fails open: if the cache backend is unreachable the
/// caller proceeds with a live retrieval instead of failing the request.
/// Entries are derived, re-computable data under TTL, never the source of
/// truth.

use crate::backend::KvBackend;
use crate::cache::keys::CacheKey;
use crate::cache::keys::canonicalize;
use crate::config::CacheConfig;
use crate::error::RagResult;
use crate::types::{CachedSearchEntry, RetrievedChunk};
use chrono::Utc;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Hit/miss counters with atomic access
#[derive(Debug, Default)]
struct SearchCacheStatsInternal {
    hits: AtomicU64,
    misses: AtomicU64,
    errors: AtomicU64,
    invalidated: AtomicU64,
}

/// Point-in-time cache statistics
#[derive(Debug, Clone, Default)]
pub struct SearchCacheStats {
    pub hits: u64,
    pub misses: u64,
    pub errors: u64,
    pub invalidated: u64,
}

/// A popular query eligible for cache warming
#[derive(Debug, Clone)]
pub struct WarmCandidate {
    pub query: String,
    pub popularity: u64,
}

pub struct SearchResultCache {
    kv: Arc<dyn KvBackend>,
    config: CacheConfig,
    stats: SearchCacheStatsInternal,
}

impl SearchResultCache {
    pub fn new(kv: Arc<dyn KvBackend>, config: CacheConfig) -> Self {
        Self {
            kv,
            config,
            stats: SearchCacheStatsInternal::default(),
        }
    }

    /// Look up cached results. On hit the entry's hit counter is bumped and
    /// its TTL refreshed. Backend failures are absorbed and count as misses.
    pub async fn get(
        &self,
        tenant_id: &str,
        query: &str,
        model_version: &str,
        filters: &BTreeMap<String, Value>,
    ) -> Option<CachedSearchEntry> {
        let key = CacheKey::build(tenant_id, query, model_version, filters);
        let entry_key = key.entry_key();

        let raw = match self.kv.get(&entry_key).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Search cache read failed, proceeding uncached: {}", e);
                self.stats.errors.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };

        let Some(raw) = raw else {
            debug!("Search cache MISS for {}", entry_key);
            self.stats.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        };

        let entry: CachedSearchEntry = match serde_json::from_str(&raw) {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Dropping undecodable cache entry {}: {}", entry_key, e);
                let _ = self.kv.delete(&[entry_key]).await;
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };

        debug!(
            "Search cache HIT for {} ({} results)",
            entry_key,
            entry.results.len()
        );
        self.stats.hits.fetch_add(1, Ordering::Relaxed);

        // Bump the stored hit counter and refresh the TTL; the caller sees
        // the pre-increment entry. Losing this write is harmless so
        // failures are only logged.
        let mut stored = entry.clone();
        stored.hit_count += 1;
        if let Ok(serialized) = serde_json::to_string(&stored) {
            if let Err(e) = self
                .kv
                .set(&entry_key, &serialized, Some(self.config.search_ttl_secs))
                .await
            {
                warn!("Failed to refresh cache entry {}: {}", entry_key, e);
            }
        }

        Some(entry)
    }

    /// Store a ranked result set and bump the query's popularity counter
    pub async fn put(
        &self,
        tenant_id: &str,
        query: &str,
        model_version: &str,
        filters: &BTreeMap<String, Value>,
        results: &[RetrievedChunk],
    ) {
        let key = CacheKey::build(tenant_id, query, model_version, filters);
        let entry = CachedSearchEntry {
            results: results.to_vec(),
            query: query.to_string(),
            tenant_id: tenant_id.to_string(),
            query_hash: key.query_hash.clone(),
            model_version: key.model_version.clone(),
            filters_hash: key.filters_hash.clone(),
            cached_at: Utc::now(),
            hit_count: 0,
        };

        let serialized = match serde_json::to_string(&entry) {
            Ok(serialized) => serialized,
            Err(e) => {
                warn!("Failed to serialize cache entry: {}", e);
                return;
            }
        };

        if let Err(e) = self
            .kv
            .set(&key.entry_key(), &serialized, Some(self.config.search_ttl_secs))
            .await
        {
            warn!("Search cache write failed, skipping: {}", e);
            self.stats.errors.fetch_add(1, Ordering::Relaxed);
            return;
        }

        debug!("Cached {} results under {}", results.len(), key.entry_key());
        self.record_popularity(&key, query).await;
    }

    /// Track query popularity for warming; longer-lived than entries
    async fn record_popularity(&self, key: &CacheKey, query: &str) {
        let pop_key = key.popularity_key();
        match self.kv.increment(&pop_key).await {
            Ok(count) => {
                if let Err(e) = self.kv.expire(&pop_key, self.config.popularity_ttl_secs).await {
                    warn!("Failed to set popularity TTL for {}: {}", pop_key, e);
                }
                // Record the canonical query so warming can re-execute it
                let canonical = canonicalize(query);
                if let Err(e) = self
                    .kv
                    .set(
                        &key.popularity_query_key(),
                        &canonical,
                        Some(self.config.popularity_ttl_secs),
                    )
                    .await
                {
                    warn!("Failed to record popular query text: {}", e);
                }
                debug!("Popularity of '{}' now {}", canonical, count);
            }
            Err(e) => warn!("Failed to bump popularity counter {}: {}", pop_key, e),
        }
    }

    /// Remove a tenant's cached entries. With a document id only entries
    /// whose results reference that document are removed; without, every
    /// entry for the tenant goes. Returns the count removed. Backend
    /// failures are absorbed (entries expire by TTL regardless).
    pub async fn invalidate(&self, tenant_id: &str, document_id: Option<&str>) -> u64 {
        let pattern = CacheKey::tenant_entry_pattern(tenant_id);
        let keys = match self.kv.scan_keys(&pattern).await {
            Ok(keys) => keys,
            Err(e) => {
                warn!("Cache invalidation scan failed for {}: {}", tenant_id, e);
                self.stats.errors.fetch_add(1, Ordering::Relaxed);
                return 0;
            }
        };

        let to_delete = match document_id {
            None => keys,
            Some(document_id) => {
                // O(n) in the tenant's live entries: each one is read and
                // deserialized to check whether it references the document
                let mut matching = Vec::new();
                for key in keys {
                    let Ok(Some(raw)) = self.kv.get(&key).await else {
                        continue;
                    };
                    match serde_json::from_str::<CachedSearchEntry>(&raw) {
                        Ok(entry) => {
                            if entry
                                .results
                                .iter()
                                .any(|chunk| chunk.document_id() == document_id)
                            {
                                matching.push(key);
                            }
                        }
                        Err(_) => matching.push(key), // undecodable, drop it
                    }
                }
                matching
            }
        };

        match self.kv.delete(&to_delete).await {
            Ok(removed) => {
                debug!(
                    "Invalidated {} cache entries for tenant {} (document: {:?})",
                    removed, tenant_id, document_id
                );
                self.stats.invalidated.fetch_add(removed, Ordering::Relaxed);
                removed
            }
            Err(e) => {
                warn!("Cache invalidation delete failed for {}: {}", tenant_id, e);
                self.stats.errors.fetch_add(1, Ordering::Relaxed);
                0
            }
        }
    }

    /// Queries whose popularity counter meets the warming threshold and
    /// which have no live cache entry
    pub async fn popular_uncached_queries(&self, tenant_id: &str) -> RagResult<Vec<WarmCandidate>> {
        let pattern = CacheKey::tenant_popularity_pattern(tenant_id);
        let pop_keys = self.kv.scan_keys(&pattern).await?;

        let mut candidates = Vec::new();
        for pop_key in pop_keys {
            let Some(query_hash) = pop_key.rsplit(':').next() else {
                continue;
            };

            let popularity = match self.kv.get(&pop_key).await? {
                Some(raw) => raw.parse::<u64>().unwrap_or(0),
                None => continue,
            };
            if popularity < self.config.warm_threshold {
                continue;
            }

            // Any live entry for this query hash means it needs no warming
            let entry_pattern = CacheKey::query_entry_pattern(tenant_id, query_hash);
            if !self.kv.scan_keys(&entry_pattern).await?.is_empty() {
                continue;
            }

            let query_key = CacheKey::popularity_query_key_for(tenant_id, query_hash);
            if let Some(query) = self.kv.get(&query_key).await? {
                candidates.push(WarmCandidate { query, popularity });
            }
        }

        Ok(candidates)
    }

    pub fn stats(&self) -> SearchCacheStats {
        SearchCacheStats {
            hits: self.stats.hits.load(Ordering::Relaxed),
            misses: self.stats.misses.load(Ordering::Relaxed),
            errors: self.stats.errors.load(Ordering::Relaxed),
            invalidated: self.stats.invalidated.load(Ordering::Relaxed),
        }
    }
}
