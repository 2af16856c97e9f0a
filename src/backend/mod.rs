/// External collaborator interfaces
///
/// The core consumes three remote services behind traits: a key/value cache
/// backend, a vector storage backend, and the embedding/generation model
/// backend. Concrete adapters live in the submodules; the in-memory
/// implementations serve local development and the test suite.

pub mod chroma;
pub mod http_model;
pub mod memory;
pub mod redis;

use crate::error::RagResult;
use async_trait::async_trait;
use serde_json::Value;

pub use chroma::ChromaVectorBackend;
pub use http_model::HttpModelBackend;
pub use memory::{MemoryKvBackend, MemoryVectorBackend};
pub use redis::RedisKvBackend;

/// Key/value cache backend with TTL, atomic increment and pattern scan
#[async_trait]
pub trait KvBackend: Send + Sync {
    /// Get the value stored under `key`, if any
    async fn get(&self, key: &str) -> RagResult<Option<String>>;

    /// Store `value` under `key`; `ttl_secs` of None means no expiry
    async fn set(&self, key: &str, value: &str, ttl_secs: Option<u64>) -> RagResult<()>;

    /// Delete keys, returning how many existed
    async fn delete(&self, keys: &[String]) -> RagResult<u64>;

    /// List keys matching a glob-style pattern
    async fn scan_keys(&self, pattern: &str) -> RagResult<Vec<String>>;

    /// Atomically increment the counter at `key`, returning the new value
    async fn increment(&self, key: &str) -> RagResult<i64>;

    /// Reset the TTL of an existing key
    async fn expire(&self, key: &str, ttl_secs: u64) -> RagResult<()>;
}

/// Handle to a backing collection in the vector store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionHandle {
    /// Backend-assigned collection id
    pub id: String,
    /// Logical collection name
    pub name: String,
}

/// A batch of records to store
#[derive(Debug, Clone, Default)]
pub struct VectorBatch {
    pub ids: Vec<String>,
    pub embeddings: Vec<Vec<f32>>,
    pub documents: Vec<String>,
    pub metadatas: Vec<Value>,
}

/// Records returned by a metadata-filtered get
#[derive(Debug, Clone, Default)]
pub struct VectorRecords {
    pub ids: Vec<String>,
    pub documents: Vec<String>,
    pub metadatas: Vec<Value>,
}

/// Ranked results of a similarity query, one row set per query vector,
/// ordered by ascending distance
#[derive(Debug, Clone, Default)]
pub struct VectorQueryResult {
    pub ids: Vec<Vec<String>>,
    pub documents: Vec<Vec<String>>,
    pub metadatas: Vec<Vec<Value>>,
    pub distances: Vec<Vec<f32>>,
}

/// Vector storage backend: collection lifecycle plus filtered
/// add/query/get/delete
#[async_trait]
pub trait VectorBackend: Send + Sync {
    /// Get or create the named collection
    async fn ensure_collection(&self, name: &str) -> RagResult<CollectionHandle>;

    /// Store a batch of records
    async fn add(&self, collection: &CollectionHandle, batch: VectorBatch) -> RagResult<()>;

    /// K-nearest-neighbor query constrained by a metadata filter
    async fn query(
        &self,
        collection: &CollectionHandle,
        query_embeddings: &[Vec<f32>],
        k: usize,
        where_filter: &Value,
    ) -> RagResult<VectorQueryResult>;

    /// Fetch records matching a metadata filter
    async fn get(&self, collection: &CollectionHandle, where_filter: &Value)
        -> RagResult<VectorRecords>;

    /// Delete records by id
    async fn delete(&self, collection: &CollectionHandle, ids: &[String]) -> RagResult<()>;
}

/// Embedding/generation model backend, treated as a black-box RPC
#[async_trait]
pub trait ModelBackend: Send + Sync {
    /// Embed a batch of texts, one vector per text in input order
    async fn embed(&self, texts: &[String]) -> RagResult<Vec<Vec<f32>>>;

    /// Generate a completion for the assembled prompt
    async fn generate(&self, prompt: &str, temperature: f32, max_tokens: u32)
        -> RagResult<String>;
}
