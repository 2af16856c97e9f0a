/// Caching module
///
/// Three concerns live here:
/// - query canonicalization and deterministic cache-key derivation
/// - the ranked search-result cache with popularity-based warming support
/// - the per-tenant embedding deduplication cache

pub mod embedding_cache;
pub mod keys;
pub mod search_cache;

#[cfg(test)]
mod tests;

pub use embedding_cache::{EmbeddingCache, EmbeddingCacheStats};
pub use keys::{canonicalize, content_hash, filters_hash, query_hash, tenant_digest, CacheKey};
pub use search_cache::{SearchCacheStats, SearchResultCache, WarmCandidate};
