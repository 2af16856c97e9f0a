use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

/// Metadata stored alongside every embedding record.
///
/// The isolation fields (tenant, document, chunk index, timestamp) are
/// always stamped by the shard router; caller-supplied values for them are
/// ignored. Everything else travels in the open `extra` map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkMetadata {
    /// Owning tenant; queries never cross this boundary
    pub tenant_id: String,
    /// Source document identifier
    pub document_id: String,
    /// Position of this chunk within the document
    pub chunk_index: usize,
    /// When the record was written
    pub created_at: DateTime<Utc>,
    /// Caller-supplied attributes (document type, page, section, ...)
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl ChunkMetadata {
    /// Build a stamped metadata record, dropping any caller attempt to
    /// override the isolation fields.
    pub fn stamped(
        tenant_id: &str,
        document_id: &str,
        chunk_index: usize,
        mut extra: BTreeMap<String, Value>,
    ) -> Self {
        for reserved in ["tenant_id", "document_id", "chunk_index", "created_at"] {
            extra.remove(reserved);
        }
        Self {
            tenant_id: tenant_id.to_string(),
            document_id: document_id.to_string(),
            chunk_index,
            created_at: Utc::now(),
            extra,
        }
    }
}

/// A ranked embedding record surfaced to the orchestrator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievedChunk {
    /// Chunk text
    pub content: String,
    /// Stored metadata
    pub metadata: ChunkMetadata,
    /// Similarity score in (0, 1], higher is closer
    pub score: f32,
    /// Rank within the result set (0 = best)
    pub rank: usize,
    /// Record id in the vector store
    pub id: String,
}

impl RetrievedChunk {
    pub fn document_id(&self) -> &str {
        &self.metadata.document_id
    }
}

/// Role of a conversation turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

/// One conversation turn
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationMessage {
    /// Collision-free id (random, not counter-based)
    pub id: Uuid,
    pub tenant_id: String,
    pub conversation_id: String,
    pub role: MessageRole,
    pub content: String,
    pub created_at: DateTime<Utc>,
    /// Processing latency for assistant turns
    pub latency_ms: Option<u64>,
    /// Optional attached metadata (e.g. source references)
    pub metadata: Option<Value>,
}

impl ConversationMessage {
    pub fn new(tenant_id: &str, conversation_id: &str, role: MessageRole, content: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id: tenant_id.to_string(),
            conversation_id: conversation_id.to_string(),
            role,
            content: content.to_string(),
            created_at: Utc::now(),
            latency_ms: None,
            metadata: None,
        }
    }
}

/// Derived, read-only view of a conversation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub total_messages: usize,
    pub avg_response_latency_ms: f64,
    pub avg_response_chars: f64,
    pub first_ts: Option<DateTime<Utc>>,
    pub last_ts: Option<DateTime<Utc>>,
}

/// Cached ranked result set for one canonical query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedSearchEntry {
    pub results: Vec<RetrievedChunk>,
    /// Original (pre-canonicalization) query text
    pub query: String,
    pub tenant_id: String,
    pub query_hash: String,
    pub model_version: String,
    pub filters_hash: String,
    pub cached_at: DateTime<Utc>,
    pub hit_count: u64,
}

/// Final result of one processed query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiResponse {
    /// Generated response text
    pub response: String,
    /// Provenance: the chunks the answer was grounded on
    pub sources: Vec<RetrievedChunk>,
    /// Heuristic reliability estimate in [0, 1]
    pub confidence: f32,
    pub conversation_id: String,
    pub latency_ms: u64,
    /// Identifier of the generation model used
    pub model: String,
    /// True when retrieval failed and the answer was generated without
    /// knowledge context
    pub degraded: bool,
}

/// Aggregate statistics for one tenant's shard
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ShardStats {
    pub shard_index: u32,
    pub document_count: usize,
    pub total_embeddings: usize,
    pub distinct_tenants_in_shard: usize,
    pub avg_embeddings_per_tenant: f64,
}

/// Combined shard and cache statistics returned by the orchestrator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantStats {
    pub shard: ShardStats,
    pub search_cache_hits: u64,
    pub search_cache_misses: u64,
    pub embedding_cache_hits: u64,
    pub embedding_cache_misses: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_stamped_metadata_strips_reserved_keys() {
        let mut extra = BTreeMap::new();
        extra.insert("tenant_id".to_string(), json!("intruder"));
        extra.insert("document_id".to_string(), json!("forged"));
        extra.insert("page".to_string(), json!(7));

        let meta = ChunkMetadata::stamped("tenant_a", "doc_1", 3, extra);

        assert_eq!(meta.tenant_id, "tenant_a");
        assert_eq!(meta.document_id, "doc_1");
        assert_eq!(meta.chunk_index, 3);
        assert!(!meta.extra.contains_key("tenant_id"));
        assert_eq!(meta.extra.get("page"), Some(&json!(7)));
    }

    #[test]
    fn test_metadata_roundtrip_flattens_extra() {
        let mut extra = BTreeMap::new();
        extra.insert("section".to_string(), json!("intro"));
        let meta = ChunkMetadata::stamped("t", "d", 0, extra);

        let value = serde_json::to_value(&meta).unwrap();
        assert_eq!(value["section"], json!("intro"));
        assert_eq!(value["tenant_id"], json!("t"));

        let back: ChunkMetadata = serde_json::from_value(value).unwrap();
        assert_eq!(back.extra.get("section"), Some(&json!("intro")));
    }

    #[test]
    fn test_message_ids_are_unique() {
        let a = ConversationMessage::new("t", "c", MessageRole::User, "hi");
        let b = ConversationMessage::new("t", "c", MessageRole::User, "hi");
        assert_ne!(a.id, b.id);
    }
}
