/// Query canonicalization and cache key derivation
///
/// Cache correctness rests on one invariant: equal logical inputs always
/// produce an identical key. Queries are canonicalized before hashing and
/// filters are serialized with sorted keys so that neither formatting nor
/// key order can split logically identical lookups across cache entries.

use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use unicode_normalization::UnicodeNormalization;

/// Normalize raw query text into a comparable form: Unicode compatibility
/// normalization, lowercase, whitespace runs collapsed to single spaces,
/// ends trimmed. Idempotent.
pub fn canonicalize(text: &str) -> String {
    let normalized: String = text.nfkc().collect();
    normalized
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Fixed-length digest of a canonical query
pub fn query_hash(canonical_text: &str) -> String {
    sha256_hex(canonical_text.as_bytes())
}

/// Fixed-length digest of a filter map, invariant to key ordering
pub fn filters_hash(filters: &BTreeMap<String, Value>) -> String {
    // BTreeMap iterates in sorted key order, so serialization is canonical
    let serialized = serde_json::to_string(filters).unwrap_or_default();
    sha256_hex(serialized.as_bytes())
}

/// Fixed-length digest of arbitrary content, used for embedding dedup
pub fn content_hash(text: &str) -> String {
    sha256_hex(text.as_bytes())
}

/// Fixed-length digest of a tenant id. Rendered keys and scan patterns
/// embed this instead of the raw id, so a tenant id containing separator
/// or glob characters can never land inside another tenant's key space.
pub fn tenant_digest(tenant_id: &str) -> String {
    sha256_hex(tenant_id.as_bytes())
}

/// Deterministic cache key for one (tenant, query, model, filters) lookup.
///
/// A value type with structural equality; rendering goes through `Display`
/// so separator ambiguity can never collide two distinct keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub tenant_id: String,
    pub query_hash: String,
    pub model_version: String,
    pub filters_hash: String,
}

impl CacheKey {
    /// Build a key from raw inputs
    pub fn build(
        tenant_id: &str,
        query: &str,
        model_version: &str,
        filters: &BTreeMap<String, Value>,
    ) -> Self {
        Self {
            tenant_id: tenant_id.to_string(),
            query_hash: query_hash(&canonicalize(query)),
            model_version: model_version.to_string(),
            filters_hash: filters_hash(filters),
        }
    }

    /// Redis key for the cached result entry
    pub fn entry_key(&self) -> String {
        format!(
            "search:topk:{}:{}:{}:{}",
            tenant_digest(&self.tenant_id),
            self.query_hash,
            self.model_version,
            self.filters_hash
        )
    }

    /// Redis key for the query popularity counter
    pub fn popularity_key(&self) -> String {
        format!(
            "search:pop:{}:{}",
            tenant_digest(&self.tenant_id),
            self.query_hash
        )
    }

    /// Redis key recording the canonical query text for warming
    pub fn popularity_query_key(&self) -> String {
        Self::popularity_query_key_for(&self.tenant_id, &self.query_hash)
    }

    /// Redis key recording the canonical query text, from parts
    pub fn popularity_query_key_for(tenant_id: &str, query_hash: &str) -> String {
        format!("search:popq:{}:{}", tenant_digest(tenant_id), query_hash)
    }

    /// Scan pattern covering all of a tenant's cached entries
    pub fn tenant_entry_pattern(tenant_id: &str) -> String {
        format!("search:topk:{}:*", tenant_digest(tenant_id))
    }

    /// Scan pattern covering one canonical query's cached entries
    pub fn query_entry_pattern(tenant_id: &str, query_hash: &str) -> String {
        format!("search:topk:{}:{}:*", tenant_digest(tenant_id), query_hash)
    }

    /// Scan pattern covering all of a tenant's popularity counters
    pub fn tenant_popularity_pattern(tenant_id: &str) -> String {
        format!("search:pop:{}:*", tenant_digest(tenant_id))
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.entry_key())
    }
}
