use crate::backend::{KvBackend, MemoryKvBackend};
use crate::cache::{EmbeddingCache, SearchResultCache};
use crate::config::CacheConfig;
use crate::test_support::{init_test_logging, StubModelBackend};
use crate::types::{ChunkMetadata, RetrievedChunk};
use std::collections::BTreeMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;

fn test_cache_config() -> CacheConfig {
    init_test_logging();
    CacheConfig {
        search_ttl_secs: 3600,
        popularity_ttl_secs: 7 * 24 * 3600,
        warm_threshold: 3,
        embedding_ttl_secs: 24 * 3600,
        embedding_batch_size: 2,
        embedding_timeout_ms: 1000,
    }
}

fn chunk(tenant: &str, document: &str, content: &str, score: f32) -> RetrievedChunk {
    RetrievedChunk {
        content: content.to_string(),
        metadata: ChunkMetadata::stamped(tenant, document, 0, BTreeMap::new()),
        score,
        rank: 0,
        id: format!("{}_{}_{}", tenant, document, content.len()),
    }
}

#[tokio::test]
async fn test_search_cache_roundtrip_and_hit_counter() {
    let kv = Arc::new(MemoryKvBackend::new());
    let cache = SearchResultCache::new(kv, test_cache_config());
    let filters = BTreeMap::new();

    assert!(cache.get("t1", "what is rust", "v1", &filters).await.is_none());

    let results = vec![chunk("t1", "doc1", "rust is a language", 0.9)];
    cache.put("t1", "what is rust", "v1", &filters, &results).await;

    let entry = cache.get("t1", "what is rust", "v1", &filters).await.unwrap();
    assert_eq!(entry.results.len(), 1);
    assert_eq!(entry.results[0].document_id(), "doc1");
    assert_eq!(entry.hit_count, 0);

    // Second hit sees the bumped counter
    let entry = cache.get("t1", "what is rust", "v1", &filters).await.unwrap();
    assert_eq!(entry.hit_count, 1);

    let stats = cache.stats();
    assert_eq!(stats.hits, 2);
    assert_eq!(stats.misses, 1);
}

#[tokio::test]
async fn test_search_cache_canonical_equivalence() {
    let kv = Arc::new(MemoryKvBackend::new());
    let cache = SearchResultCache::new(kv, test_cache_config());
    let filters = BTreeMap::new();

    let results = vec![chunk("t1", "doc1", "content", 0.8)];
    cache.put("t1", "  What IS   rust? ", "v1", &filters, &results).await;

    // Differently-formatted but logically equal query hits the same entry
    assert!(cache.get("t1", "what is rust?", "v1", &filters).await.is_some());
}

#[tokio::test]
async fn test_invalidate_by_document_is_targeted() {
    let kv = Arc::new(MemoryKvBackend::new());
    let cache = SearchResultCache::new(kv, test_cache_config());
    let filters = BTreeMap::new();

    cache
        .put("t1", "query one", "v1", &filters, &[chunk("t1", "doc_a", "a", 0.9)])
        .await;
    cache
        .put("t1", "query two", "v1", &filters, &[chunk("t1", "doc_b", "b", 0.9)])
        .await;

    let removed = cache.invalidate("t1", Some("doc_a")).await;
    assert_eq!(removed, 1);

    assert!(cache.get("t1", "query one", "v1", &filters).await.is_none());
    assert!(cache.get("t1", "query two", "v1", &filters).await.is_some());
}

#[tokio::test]
async fn test_invalidate_scoped_to_tenant() {
    let kv = Arc::new(MemoryKvBackend::new());
    let cache = SearchResultCache::new(kv, test_cache_config());
    let filters = BTreeMap::new();

    // Two tenants cache results referencing the same logical document id
    cache
        .put("tenant_a", "shared query", "v1", &filters, &[chunk("tenant_a", "doc1", "x", 0.9)])
        .await;
    cache
        .put("tenant_b", "shared query", "v1", &filters, &[chunk("tenant_b", "doc1", "x", 0.9)])
        .await;

    let removed = cache.invalidate("tenant_a", Some("doc1")).await;
    assert_eq!(removed, 1);

    assert!(cache.get("tenant_a", "shared query", "v1", &filters).await.is_none());
    assert!(cache.get("tenant_b", "shared query", "v1", &filters).await.is_some());
}

#[tokio::test]
async fn test_invalidation_ignores_tenant_id_sharing_a_prefix() {
    let kv = Arc::new(MemoryKvBackend::new());
    let cache = SearchResultCache::new(kv, test_cache_config());
    let filters = BTreeMap::new();

    // "t1:x" contains the key separator and starts with "t1"; its entries
    // must survive a full flush of tenant "t1"
    cache.put("t1", "q", "v1", &filters, &[chunk("t1", "d", "a", 0.9)]).await;
    cache.put("t1:x", "q", "v1", &filters, &[chunk("t1:x", "d", "b", 0.9)]).await;

    let removed = cache.invalidate("t1", None).await;
    assert_eq!(removed, 1);

    assert!(cache.get("t1", "q", "v1", &filters).await.is_none());
    assert!(cache.get("t1:x", "q", "v1", &filters).await.is_some());
}

#[tokio::test]
async fn test_full_invalidation_removes_all_tenant_entries() {
    let kv = Arc::new(MemoryKvBackend::new());
    let cache = SearchResultCache::new(kv, test_cache_config());
    let filters = BTreeMap::new();

    cache.put("t1", "q1", "v1", &filters, &[chunk("t1", "d1", "a", 0.9)]).await;
    cache.put("t1", "q2", "v1", &filters, &[chunk("t1", "d2", "b", 0.9)]).await;
    cache.put("t2", "q1", "v1", &filters, &[chunk("t2", "d1", "c", 0.9)]).await;

    let removed = cache.invalidate("t1", None).await;
    assert_eq!(removed, 2);
    assert!(cache.get("t2", "q1", "v1", &filters).await.is_some());
}

#[tokio::test]
async fn test_search_cache_fails_open_on_backend_outage() {
    let kv = Arc::new(MemoryKvBackend::new());
    let cache = SearchResultCache::new(kv.clone(), test_cache_config());
    let filters = BTreeMap::new();

    kv.set_failing(true);

    // No panic, no error surfaced: miss on read, silent skip on write
    assert!(cache.get("t1", "q", "v1", &filters).await.is_none());
    cache.put("t1", "q", "v1", &filters, &[chunk("t1", "d", "x", 0.9)]).await;
    assert_eq!(cache.invalidate("t1", None).await, 0);

    assert!(cache.stats().errors > 0);
}

#[tokio::test]
async fn test_popular_uncached_queries_respect_threshold() {
    let kv = Arc::new(MemoryKvBackend::new());
    let cache = SearchResultCache::new(kv.clone(), test_cache_config());
    let filters = BTreeMap::new();

    // Three puts push "hot query" to the warm threshold
    for _ in 0..3 {
        cache.put("t1", "hot query", "v1", &filters, &[chunk("t1", "d", "x", 0.9)]).await;
    }
    cache.put("t1", "cold query", "v1", &filters, &[chunk("t1", "d", "y", 0.9)]).await;

    // Entries still live: nothing to warm
    assert!(cache.popular_uncached_queries("t1").await.unwrap().is_empty());

    // Flush entries; only the hot query crosses the threshold
    cache.invalidate("t1", None).await;
    let candidates = cache.popular_uncached_queries("t1").await.unwrap();
    assert_eq!(candidates.len(), 1);
    assert_eq!(candidates[0].query, "hot query");
    assert!(candidates[0].popularity >= 3);
}

#[tokio::test]
async fn test_embedding_cache_dedup_single_backend_call() {
    let kv = Arc::new(MemoryKvBackend::new());
    let model = Arc::new(StubModelBackend::new());
    let cache = EmbeddingCache::new(kv, model.clone(), test_cache_config());

    let first = cache
        .embed_many("t1", &["identical text".to_string()])
        .await
        .unwrap();
    let second = cache
        .embed_many("t1", &["identical text".to_string()])
        .await
        .unwrap();

    assert_eq!(first, second);
    assert_eq!(model.embed_calls.load(Ordering::SeqCst), 1);

    let stats = cache.stats();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);
}

#[tokio::test]
async fn test_embedding_cache_is_tenant_scoped() {
    let kv = Arc::new(MemoryKvBackend::new());
    let model = Arc::new(StubModelBackend::new());
    let cache = EmbeddingCache::new(kv, model.clone(), test_cache_config());

    cache.embed_many("tenant_a", &["same text".to_string()]).await.unwrap();
    cache.embed_many("tenant_b", &["same text".to_string()]).await.unwrap();

    // Different tenants never share cache entries
    assert_eq!(model.embed_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_embedding_cache_preserves_order_and_batches() {
    let kv = Arc::new(MemoryKvBackend::new());
    let model = Arc::new(StubModelBackend::new());
    let cache = EmbeddingCache::new(kv, model.clone(), test_cache_config());

    // Prime one text so the second call mixes hits and misses
    cache.embed_many("t1", &["beta".to_string()]).await.unwrap();

    let texts: Vec<String> = ["alpha", "beta", "gamma", "delta", "epsilon"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    let vectors = cache.embed_many("t1", &texts).await.unwrap();

    assert_eq!(vectors.len(), texts.len());
    for (text, vector) in texts.iter().zip(&vectors) {
        assert_eq!(vector, &StubModelBackend::deterministic_vector(text));
    }

    // Batch size 2, four misses: 2 + 2
    let batches = model.batch_sizes.lock().unwrap().clone();
    assert_eq!(batches, vec![1, 2, 2]);
}

#[tokio::test]
async fn test_embedding_timeout_is_distinct_error() {
    let kv = Arc::new(MemoryKvBackend::new());
    let model = Arc::new(StubModelBackend::new());
    model.set_delay_ms(200);

    let mut config = test_cache_config();
    config.embedding_timeout_ms = 20;
    let cache = EmbeddingCache::new(kv, model, config);

    let err = cache
        .embed_many("t1", &["slow".to_string()])
        .await
        .unwrap_err();
    assert!(err.is_timeout());
    assert!(!err.is_cache_error());
}

#[tokio::test]
async fn test_embedding_cache_fails_open_on_kv_outage() {
    let kv = Arc::new(MemoryKvBackend::new());
    let model = Arc::new(StubModelBackend::new());
    let cache = EmbeddingCache::new(kv.clone(), model.clone(), test_cache_config());

    kv.set_failing(true);

    // Cache down: generation still succeeds, every call goes to the backend
    let first = cache.embed_many("t1", &["text".to_string()]).await.unwrap();
    let second = cache.embed_many("t1", &["text".to_string()]).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(model.embed_calls.load(Ordering::SeqCst), 2);
}
