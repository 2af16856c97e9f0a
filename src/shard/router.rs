/// Shard router / vector store front
///
/// Maps each tenant onto one of N physical shard collections, manages the
/// collection handle lifecycle, and guarantees that every read and write is
/// constrained to the calling tenant. Many tenants share a shard; isolation
/// is enforced by metadata filtering on every query plus a defensive
/// post-check on every returned row.

use crate::backend::{CollectionHandle, VectorBackend, VectorBatch};
use crate::config::ShardConfig;
use crate::error::{RagError, RagResult};
use crate::types::{ChunkMetadata, ShardStats};
use chrono::Utc;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{RwLock, Semaphore};
use tracing::{debug, info};

/// One tenant-filtered query's raw rows, ordered by ascending distance
#[derive(Debug, Clone, Default)]
pub struct ShardQueryResult {
    pub ids: Vec<String>,
    pub documents: Vec<String>,
    pub metadatas: Vec<ChunkMetadata>,
    pub distances: Vec<f32>,
}

struct CachedHandle {
    handle: CollectionHandle,
    cached_at: Instant,
}

struct ShardAggregate {
    /// tenant -> (distinct documents, embedding count)
    per_tenant: HashMap<String, (usize, usize)>,
    total_embeddings: usize,
    computed_at: Instant,
}

pub struct ShardRouter {
    vector: Arc<dyn VectorBackend>,
    config: ShardConfig,
    /// Cached collection handles, expired after a short TTL to pick up
    /// external changes
    handles: RwLock<HashMap<u32, CachedHandle>>,
    /// Caps simultaneous backend connections across all shards
    connection_limiter: Arc<Semaphore>,
    /// Per-shard aggregate statistics, invalidated on writes
    stats_cache: RwLock<HashMap<u32, ShardAggregate>>,
}

impl ShardRouter {
    pub fn new(vector: Arc<dyn VectorBackend>, config: ShardConfig) -> Self {
        let connection_limiter = Arc::new(Semaphore::new(config.max_backend_connections));
        Self {
            vector,
            config,
            handles: RwLock::new(HashMap::new()),
            connection_limiter,
            stats_cache: RwLock::new(HashMap::new()),
        }
    }

    /// Map a tenant onto its shard. Pure and stable for the lifetime of the
    /// shard-count configuration.
    pub fn shard_of(&self, tenant_id: &str) -> u32 {
        (farmhash::hash64(tenant_id.as_bytes()) % self.config.shard_count as u64) as u32
    }

    fn collection_name(shard: u32) -> String {
        format!("tenant_shard_{}", shard)
    }

    /// The tenant conjunction every query runs under. Never build a query
    /// filter any other way.
    fn tenant_filter(tenant_id: &str, extra: Option<&BTreeMap<String, Value>>) -> Value {
        let mut clauses = vec![json!({ "tenant_id": tenant_id })];
        if let Some(extra) = extra {
            for (key, value) in extra {
                clauses.push(json!({ key: value }));
            }
        }
        if clauses.len() == 1 {
            clauses.pop().unwrap_or(Value::Null)
        } else {
            json!({ "$and": clauses })
        }
    }

    /// Get the shard's collection handle, creating the collection if absent.
    /// Handles are cached with a TTL; creation runs under the shared
    /// connection limiter.
    async fn ensure_collection(&self, shard: u32) -> RagResult<CollectionHandle> {
        let ttl = Duration::from_secs(self.config.collection_ttl_secs);

        {
            let handles = self.handles.read().await;
            if let Some(cached) = handles.get(&shard) {
                if cached.cached_at.elapsed() < ttl {
                    return Ok(cached.handle.clone());
                }
            }
        }

        let _permit = self
            .connection_limiter
            .acquire()
            .await
            .map_err(|_| RagError::Internal("Connection limiter closed".to_string()))?;

        let name = Self::collection_name(shard);
        debug!("Ensuring collection for shard {} ('{}')", shard, name);
        let handle = self.vector.ensure_collection(&name).await?;

        let mut handles = self.handles.write().await;
        handles.insert(
            shard,
            CachedHandle {
                handle: handle.clone(),
                cached_at: Instant::now(),
            },
        );
        Ok(handle)
    }

    /// Store a document's chunk embeddings for a tenant.
    ///
    /// Vectors, texts and metadatas must be non-empty and equal-length.
    /// Record ids are synthesized from (tenant, document, index, timestamp);
    /// isolation metadata fields are always server-stamped.
    pub async fn add_embeddings(
        &self,
        tenant_id: &str,
        document_id: &str,
        vectors: Vec<Vec<f32>>,
        texts: Vec<String>,
        metadatas: Vec<BTreeMap<String, Value>>,
    ) -> RagResult<Vec<String>> {
        if tenant_id.is_empty() || document_id.is_empty() {
            return Err(RagError::Validation(
                "tenant_id and document_id must be non-empty".to_string(),
            ));
        }
        if vectors.is_empty() {
            return Err(RagError::Validation("No embeddings supplied".to_string()));
        }
        if vectors.len() != texts.len() || vectors.len() != metadatas.len() {
            return Err(RagError::Validation(format!(
                "Mismatched lengths: {} vectors, {} texts, {} metadatas",
                vectors.len(),
                texts.len(),
                metadatas.len()
            )));
        }

        let shard = self.shard_of(tenant_id);
        let collection = self.ensure_collection(shard).await?;

        let now_ms = Utc::now().timestamp_millis();
        let mut ids = Vec::with_capacity(vectors.len());
        let mut stamped = Vec::with_capacity(vectors.len());
        for (i, extra) in metadatas.into_iter().enumerate() {
            ids.push(format!("{}_{}_{}_{}", tenant_id, document_id, i, now_ms));
            let metadata = ChunkMetadata::stamped(tenant_id, document_id, i, extra);
            stamped.push(serde_json::to_value(&metadata)?);
        }

        let count = ids.len();
        self.vector
            .add(
                &collection,
                VectorBatch {
                    ids: ids.clone(),
                    embeddings: vectors,
                    documents: texts,
                    metadatas: stamped,
                },
            )
            .await?;

        self.invalidate_stats(shard).await;
        info!(
            "Stored {} embeddings for tenant {} document {} in shard {}",
            count, tenant_id, document_id, shard
        );
        Ok(ids)
    }

    /// Tenant-filtered similarity query, single query vector.
    ///
    /// Results come back ordered by ascending distance. Every returned row
    /// is re-checked against the calling tenant; a mismatch is a
    /// `TenantIsolation` error, never a silently dropped row.
    pub async fn query(
        &self,
        tenant_id: &str,
        query_vector: &[f32],
        k: usize,
        extra_filter: Option<&BTreeMap<String, Value>>,
    ) -> RagResult<ShardQueryResult> {
        if query_vector.is_empty() {
            return Err(RagError::Validation("Empty query vector".to_string()));
        }
        if k == 0 {
            return Err(RagError::Validation("k must be greater than 0".to_string()));
        }

        let shard = self.shard_of(tenant_id);
        let collection = self.ensure_collection(shard).await?;
        let filter = Self::tenant_filter(tenant_id, extra_filter);

        let raw = self
            .vector
            .query(&collection, &[query_vector.to_vec()], k, &filter)
            .await?;

        let mut result = ShardQueryResult::default();
        let Some(row_ids) = raw.ids.into_iter().next() else {
            return Ok(result);
        };
        let documents = raw.documents.into_iter().next().unwrap_or_default();
        let metadatas = raw.metadatas.into_iter().next().unwrap_or_default();
        let distances = raw.distances.into_iter().next().unwrap_or_default();

        for (((id, document), metadata), distance) in row_ids
            .into_iter()
            .zip(documents)
            .zip(metadatas)
            .zip(distances)
        {
            let metadata: ChunkMetadata = serde_json::from_value(metadata)?;
            if metadata.tenant_id != tenant_id {
                return Err(RagError::TenantIsolation {
                    expected: tenant_id.to_string(),
                    found: metadata.tenant_id,
                });
            }
            result.ids.push(id);
            result.documents.push(document);
            result.metadatas.push(metadata);
            result.distances.push(distance);
        }

        debug!(
            "Shard {} query for tenant {} returned {} rows",
            shard,
            tenant_id,
            result.ids.len()
        );
        Ok(result)
    }

    /// Remove every chunk of a (tenant, document) pair, returning the count
    /// removed. Zero matches is not an error.
    pub async fn delete_by_document(&self, tenant_id: &str, document_id: &str) -> RagResult<u64> {
        let shard = self.shard_of(tenant_id);
        let collection = self.ensure_collection(shard).await?;

        let mut extra = BTreeMap::new();
        extra.insert("document_id".to_string(), json!(document_id));
        let filter = Self::tenant_filter(tenant_id, Some(&extra));

        let records = self.vector.get(&collection, &filter).await?;
        if records.ids.is_empty() {
            debug!(
                "No chunks found for tenant {} document {}",
                tenant_id, document_id
            );
            return Ok(0);
        }

        let count = records.ids.len() as u64;
        self.vector.delete(&collection, &records.ids).await?;
        self.invalidate_stats(shard).await;

        info!(
            "Deleted {} chunks for tenant {} document {}",
            count, tenant_id, document_id
        );
        Ok(count)
    }

    /// Aggregate statistics for the tenant's shard, computed by scanning
    /// shard metadata and cached with a TTL
    pub async fn stats(&self, tenant_id: &str) -> RagResult<ShardStats> {
        let shard = self.shard_of(tenant_id);
        let ttl = Duration::from_secs(self.config.stats_ttl_secs);

        {
            let cache = self.stats_cache.read().await;
            if let Some(aggregate) = cache.get(&shard) {
                if aggregate.computed_at.elapsed() < ttl {
                    return Ok(Self::stats_for_tenant(shard, tenant_id, aggregate));
                }
            }
        }

        let collection = self.ensure_collection(shard).await?;
        let records = self.vector.get(&collection, &Value::Null).await?;

        let mut per_tenant: HashMap<String, (HashSet<String>, usize)> = HashMap::new();
        for metadata in &records.metadatas {
            let Ok(metadata) = serde_json::from_value::<ChunkMetadata>(metadata.clone()) else {
                continue;
            };
            let entry = per_tenant.entry(metadata.tenant_id).or_default();
            entry.0.insert(metadata.document_id);
            entry.1 += 1;
        }

        let aggregate = ShardAggregate {
            per_tenant: per_tenant
                .into_iter()
                .map(|(tenant, (docs, embs))| (tenant, (docs.len(), embs)))
                .collect(),
            total_embeddings: records.ids.len(),
            computed_at: Instant::now(),
        };

        let stats = Self::stats_for_tenant(shard, tenant_id, &aggregate);
        self.stats_cache.write().await.insert(shard, aggregate);
        Ok(stats)
    }

    fn stats_for_tenant(shard: u32, tenant_id: &str, aggregate: &ShardAggregate) -> ShardStats {
        let (document_count, total_embeddings) = aggregate
            .per_tenant
            .get(tenant_id)
            .copied()
            .unwrap_or((0, 0));
        let distinct_tenants = aggregate.per_tenant.len();
        let avg = if distinct_tenants == 0 {
            0.0
        } else {
            aggregate.total_embeddings as f64 / distinct_tenants as f64
        };

        ShardStats {
            shard_index: shard,
            document_count,
            total_embeddings,
            distinct_tenants_in_shard: distinct_tenants,
            avg_embeddings_per_tenant: avg,
        }
    }

    async fn invalidate_stats(&self, shard: u32) {
        self.stats_cache.write().await.remove(&shard);
    }
}
