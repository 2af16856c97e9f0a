/// Embedding deduplication cache
///
/// Embedding the same text twice for the same tenant must only invoke the
/// model backend once (within the cache TTL). Keys are derived from text
/// content only, not the model identity; the days-order TTL bounds how long
/// a stale vector can outlive a model swap.

use crate::backend::{KvBackend, ModelBackend};
use crate::cache::keys::{content_hash, tenant_digest};
use crate::config::CacheConfig;
use crate::error::{RagError, RagResult};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};

#[derive(Debug, Default)]
struct EmbeddingCacheStatsInternal {
    hits: AtomicU64,
    misses: AtomicU64,
}

/// Point-in-time hit/miss counters
#[derive(Debug, Clone, Default)]
pub struct EmbeddingCacheStats {
    pub hits: u64,
    pub misses: u64,
}

pub struct EmbeddingCache {
    kv: Arc<dyn KvBackend>,
    model: Arc<dyn ModelBackend>,
    config: CacheConfig,
    stats: EmbeddingCacheStatsInternal,
}

impl EmbeddingCache {
    pub fn new(kv: Arc<dyn KvBackend>, model: Arc<dyn ModelBackend>, config: CacheConfig) -> Self {
        Self {
            kv,
            model,
            config,
            stats: EmbeddingCacheStatsInternal::default(),
        }
    }

    fn cache_key(tenant_id: &str, text: &str) -> String {
        format!("emb:{}:{}", tenant_digest(tenant_id), content_hash(text))
    }

    /// Embed every text, serving repeats from the per-tenant cache and
    /// batching misses to the model backend under an explicit timeout.
    /// Output order matches input order.
    pub async fn embed_many(&self, tenant_id: &str, texts: &[String]) -> RagResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut output: Vec<Option<Vec<f32>>> = vec![None; texts.len()];
        let mut miss_indices: Vec<usize> = Vec::new();

        for (i, text) in texts.iter().enumerate() {
            let key = Self::cache_key(tenant_id, text);
            match self.kv.get(&key).await {
                Ok(Some(raw)) => match serde_json::from_str::<Vec<f32>>(&raw) {
                    Ok(vector) => {
                        self.stats.hits.fetch_add(1, Ordering::Relaxed);
                        output[i] = Some(vector);
                    }
                    Err(e) => {
                        warn!("Dropping undecodable cached vector {}: {}", key, e);
                        let _ = self.kv.delete(&[key]).await;
                        miss_indices.push(i);
                    }
                },
                Ok(None) => miss_indices.push(i),
                Err(e) => {
                    // Cache outage: still generate, just without dedup
                    warn!("Embedding cache read failed, generating fresh: {}", e);
                    miss_indices.push(i);
                }
            }
        }

        if miss_indices.is_empty() {
            return Ok(output.into_iter().flatten().collect());
        }

        self.stats
            .misses
            .fetch_add(miss_indices.len() as u64, Ordering::Relaxed);
        debug!(
            "Embedding {} cache misses out of {} texts for tenant {}",
            miss_indices.len(),
            texts.len(),
            tenant_id
        );

        // Batch the misses to the backend, bounded batch size, explicit
        // timeout per batch. A timeout is a generation failure, distinct
        // from any cache error.
        for batch in miss_indices.chunks(self.config.embedding_batch_size) {
            let batch_texts: Vec<String> = batch.iter().map(|&i| texts[i].clone()).collect();

            let vectors = timeout(
                Duration::from_millis(self.config.embedding_timeout_ms),
                self.model.embed(&batch_texts),
            )
            .await
            .map_err(|_| RagError::EmbeddingTimeout(self.config.embedding_timeout_ms))??;

            if vectors.len() != batch_texts.len() {
                return Err(RagError::Generation(format!(
                    "Embedding backend returned {} vectors for {} texts",
                    vectors.len(),
                    batch_texts.len()
                )));
            }

            for (&index, vector) in batch.iter().zip(vectors.into_iter()) {
                let key = Self::cache_key(tenant_id, &texts[index]);
                match serde_json::to_string(&vector) {
                    Ok(serialized) => {
                        if let Err(e) = self
                            .kv
                            .set(&key, &serialized, Some(self.config.embedding_ttl_secs))
                            .await
                        {
                            warn!("Embedding cache write failed for {}: {}", key, e);
                        }
                    }
                    Err(e) => warn!("Failed to serialize embedding: {}", e),
                }
                output[index] = Some(vector);
            }
        }

        // Every slot is filled at this point; a gap would be a logic error
        output
            .into_iter()
            .map(|slot| slot.ok_or_else(|| RagError::Internal("Embedding slot left unfilled".to_string())))
            .collect()
    }

    /// Embed a single text, via the same cache path
    pub async fn embed_one(&self, tenant_id: &str, text: &str) -> RagResult<Vec<f32>> {
        let mut vectors = self.embed_many(tenant_id, &[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| RagError::Internal("Embedding backend returned no vector".to_string()))
    }

    pub fn stats(&self) -> EmbeddingCacheStats {
        EmbeddingCacheStats {
            hits: self.stats.hits.load(Ordering::Relaxed),
            misses: self.stats.misses.load(Ordering::Relaxed),
        }
    }
}
