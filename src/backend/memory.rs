use crate::backend::{
    CollectionHandle, KvBackend, VectorBackend, VectorBatch, VectorQueryResult, VectorRecords,
};
use crate::error::{RagError, RagResult};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

/// In-process key/value store with TTL semantics.
///
/// Serves local development and the test suite. `set_failing` flips the
/// store into an error state so callers' fail-open paths can be exercised.
#[derive(Default)]
pub struct MemoryKvBackend {
    entries: RwLock<HashMap<String, StoredValue>>,
    failing: AtomicBool,
}

struct StoredValue {
    value: String,
    expires_at: Option<DateTime<Utc>>,
}

impl StoredValue {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

impl MemoryKvBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate a backend outage
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check_available(&self) -> RagResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            Err(RagError::CacheUnavailable(
                "memory kv backend is failing".to_string(),
            ))
        } else {
            Ok(())
        }
    }
}

/// Match a glob pattern where `*` matches any run of characters
fn glob_match(pattern: &str, key: &str) -> bool {
    let segments: Vec<&str> = pattern.split('*').collect();
    if segments.len() == 1 {
        return pattern == key;
    }

    let mut rest = key;
    for (i, segment) in segments.iter().enumerate() {
        if segment.is_empty() {
            continue;
        }
        if i == 0 {
            match rest.strip_prefix(segment) {
                Some(r) => rest = r,
                None => return false,
            }
        } else if i == segments.len() - 1 {
            return rest.ends_with(segment);
        } else {
            match rest.find(segment) {
                Some(pos) => rest = &rest[pos + segment.len()..],
                None => return false,
            }
        }
    }
    true
}

#[async_trait]
impl KvBackend for MemoryKvBackend {
    async fn get(&self, key: &str) -> RagResult<Option<String>> {
        self.check_available()?;
        let now = Utc::now();
        let entries = self.entries.read().await;
        Ok(entries
            .get(key)
            .filter(|v| !v.is_expired(now))
            .map(|v| v.value.clone()))
    }

    async fn set(&self, key: &str, value: &str, ttl_secs: Option<u64>) -> RagResult<()> {
        self.check_available()?;
        let expires_at = ttl_secs.map(|secs| Utc::now() + Duration::seconds(secs as i64));
        let mut entries = self.entries.write().await;
        entries.insert(
            key.to_string(),
            StoredValue {
                value: value.to_string(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> RagResult<u64> {
        self.check_available()?;
        let mut entries = self.entries.write().await;
        let mut removed = 0;
        for key in keys {
            if entries.remove(key).is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn scan_keys(&self, pattern: &str) -> RagResult<Vec<String>> {
        self.check_available()?;
        let now = Utc::now();
        let entries = self.entries.read().await;
        Ok(entries
            .iter()
            .filter(|(key, value)| !value.is_expired(now) && glob_match(pattern, key))
            .map(|(key, _)| key.clone())
            .collect())
    }

    async fn increment(&self, key: &str) -> RagResult<i64> {
        self.check_available()?;
        let mut entries = self.entries.write().await;
        let now = Utc::now();
        let current = entries
            .get(key)
            .filter(|v| !v.is_expired(now))
            .and_then(|v| v.value.parse::<i64>().ok())
            .unwrap_or(0);
        let next = current + 1;
        // INCR preserves the existing expiry
        let expires_at = entries.get(key).and_then(|v| v.expires_at);
        entries.insert(
            key.to_string(),
            StoredValue {
                value: next.to_string(),
                expires_at,
            },
        );
        Ok(next)
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> RagResult<()> {
        self.check_available()?;
        let mut entries = self.entries.write().await;
        if let Some(value) = entries.get_mut(key) {
            value.expires_at = Some(Utc::now() + Duration::seconds(ttl_secs as i64));
        }
        Ok(())
    }
}

/// In-process vector store with linear-scan similarity search.
///
/// Uses squared-free Euclidean (L2) distance, matching the distance space
/// the Chroma backend is configured with, so rankings agree across backends.
#[derive(Default)]
pub struct MemoryVectorBackend {
    collections: RwLock<HashMap<String, Vec<StoredRecord>>>,
    failing: AtomicBool,
}

#[derive(Clone)]
struct StoredRecord {
    id: String,
    embedding: Vec<f32>,
    document: String,
    metadata: Value,
}

impl MemoryVectorBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate a backend outage
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check_available(&self) -> RagResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            Err(RagError::BackendConnectivity(
                "memory vector backend is failing".to_string(),
            ))
        } else {
            Ok(())
        }
    }
}

fn l2_distance(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return f32::MAX;
    }
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

/// Evaluate a Chroma-style where filter: equality on fields plus `$and`
fn matches_filter(filter: &Value, metadata: &Value) -> bool {
    match filter {
        Value::Null => true,
        Value::Object(map) if map.is_empty() => true,
        Value::Object(map) => map.iter().all(|(key, expected)| {
            if key == "$and" {
                match expected {
                    Value::Array(clauses) => {
                        clauses.iter().all(|clause| matches_filter(clause, metadata))
                    }
                    _ => false,
                }
            } else {
                metadata.get(key) == Some(expected)
            }
        }),
        _ => false,
    }
}

#[async_trait]
impl VectorBackend for MemoryVectorBackend {
    async fn ensure_collection(&self, name: &str) -> RagResult<CollectionHandle> {
        self.check_available()?;
        let mut collections = self.collections.write().await;
        collections.entry(name.to_string()).or_default();
        Ok(CollectionHandle {
            id: name.to_string(),
            name: name.to_string(),
        })
    }

    async fn add(&self, collection: &CollectionHandle, batch: VectorBatch) -> RagResult<()> {
        self.check_available()?;
        let mut collections = self.collections.write().await;
        let records = collections
            .get_mut(&collection.id)
            .ok_or_else(|| RagError::Internal(format!("Unknown collection '{}'", collection.id)))?;

        for i in 0..batch.ids.len() {
            records.push(StoredRecord {
                id: batch.ids[i].clone(),
                embedding: batch.embeddings[i].clone(),
                document: batch.documents[i].clone(),
                metadata: batch.metadatas[i].clone(),
            });
        }
        Ok(())
    }

    async fn query(
        &self,
        collection: &CollectionHandle,
        query_embeddings: &[Vec<f32>],
        k: usize,
        where_filter: &Value,
    ) -> RagResult<VectorQueryResult> {
        self.check_available()?;
        let collections = self.collections.read().await;
        let records = collections
            .get(&collection.id)
            .ok_or_else(|| RagError::Internal(format!("Unknown collection '{}'", collection.id)))?;

        let mut result = VectorQueryResult::default();
        for query in query_embeddings {
            let mut scored: Vec<(&StoredRecord, f32)> = records
                .iter()
                .filter(|r| matches_filter(where_filter, &r.metadata))
                .map(|r| (r, l2_distance(query, &r.embedding)))
                .collect();
            scored.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
            scored.truncate(k);

            result.ids.push(scored.iter().map(|(r, _)| r.id.clone()).collect());
            result
                .documents
                .push(scored.iter().map(|(r, _)| r.document.clone()).collect());
            result
                .metadatas
                .push(scored.iter().map(|(r, _)| r.metadata.clone()).collect());
            result.distances.push(scored.iter().map(|(_, d)| *d).collect());
        }
        Ok(result)
    }

    async fn get(
        &self,
        collection: &CollectionHandle,
        where_filter: &Value,
    ) -> RagResult<VectorRecords> {
        self.check_available()?;
        let collections = self.collections.read().await;
        let records = collections
            .get(&collection.id)
            .ok_or_else(|| RagError::Internal(format!("Unknown collection '{}'", collection.id)))?;

        let mut result = VectorRecords::default();
        for record in records.iter().filter(|r| matches_filter(where_filter, &r.metadata)) {
            result.ids.push(record.id.clone());
            result.documents.push(record.document.clone());
            result.metadatas.push(record.metadata.clone());
        }
        Ok(result)
    }

    async fn delete(&self, collection: &CollectionHandle, ids: &[String]) -> RagResult<()> {
        self.check_available()?;
        let mut collections = self.collections.write().await;
        let records = collections
            .get_mut(&collection.id)
            .ok_or_else(|| RagError::Internal(format!("Unknown collection '{}'", collection.id)))?;
        records.retain(|r| !ids.contains(&r.id));
        Ok(())
    }
}
