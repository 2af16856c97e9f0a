use crate::backend::MemoryVectorBackend;
use crate::config::ShardConfig;
use crate::shard::ShardRouter;
use crate::test_support::init_test_logging;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;

fn test_shard_config() -> ShardConfig {
    ShardConfig {
        shard_count: 10,
        max_backend_connections: 4,
        collection_ttl_secs: 300,
        stats_ttl_secs: 300,
    }
}

fn router() -> ShardRouter {
    init_test_logging();
    ShardRouter::new(Arc::new(MemoryVectorBackend::new()), test_shard_config())
}

#[tokio::test]
async fn test_shard_of_is_pure_and_in_range() {
    let router = router();
    for tenant in ["t1", "creator_42", "", "a-very-long-tenant-identifier"] {
        let first = router.shard_of(tenant);
        for _ in 0..10 {
            assert_eq!(router.shard_of(tenant), first);
        }
        assert!(first < 10);
    }
}

#[tokio::test]
async fn test_shard_distribution_spreads_tenants() {
    let router = router();
    let mut seen = std::collections::HashSet::new();
    for i in 0..200 {
        seen.insert(router.shard_of(&format!("tenant_{}", i)));
    }
    // 200 tenants across 10 shards should hit most of them
    assert!(seen.len() >= 8);
}

#[tokio::test]
async fn test_add_embeddings_validation() {
    let router = router();

    let err = router
        .add_embeddings("t1", "doc", vec![], vec![], vec![])
        .await
        .unwrap_err();
    assert!(err.is_validation_error());

    let err = router
        .add_embeddings(
            "t1",
            "doc",
            vec![vec![1.0]],
            vec!["a".to_string(), "b".to_string()],
            vec![BTreeMap::new()],
        )
        .await
        .unwrap_err();
    assert!(err.is_validation_error());

    let err = router
        .add_embeddings("", "doc", vec![vec![1.0]], vec!["a".to_string()], vec![BTreeMap::new()])
        .await
        .unwrap_err();
    assert!(err.is_validation_error());
}

#[tokio::test]
async fn test_add_then_query_round_trip() {
    let router = router();
    let vector = vec![0.1, 0.2, 0.3];

    let ids = router
        .add_embeddings(
            "t1",
            "doc1",
            vec![vector.clone()],
            vec!["text".to_string()],
            vec![BTreeMap::new()],
        )
        .await
        .unwrap();
    assert_eq!(ids.len(), 1);

    let result = router.query("t1", &vector, 1, None).await.unwrap();
    assert_eq!(result.ids, ids);
    assert_eq!(result.documents[0], "text");
    assert!(result.distances[0] < 1e-6);
}

#[tokio::test]
async fn test_synthesized_ids_are_unique_per_chunk() {
    let router = router();
    let ids = router
        .add_embeddings(
            "t1",
            "doc1",
            vec![vec![1.0], vec![2.0], vec![3.0]],
            vec!["a".to_string(), "b".to_string(), "c".to_string()],
            vec![BTreeMap::new(), BTreeMap::new(), BTreeMap::new()],
        )
        .await
        .unwrap();

    let unique: std::collections::HashSet<_> = ids.iter().collect();
    assert_eq!(unique.len(), 3);
    assert!(ids[0].starts_with("t1_doc1_0_"));
}

#[tokio::test]
async fn test_metadata_is_server_stamped() {
    let router = router();

    // Caller tries to forge the isolation fields
    let mut extra = BTreeMap::new();
    extra.insert("tenant_id".to_string(), json!("other_tenant"));
    extra.insert("section".to_string(), json!("intro"));

    router
        .add_embeddings("t1", "doc1", vec![vec![1.0]], vec!["text".to_string()], vec![extra])
        .await
        .unwrap();

    let result = router.query("t1", &[1.0], 1, None).await.unwrap();
    assert_eq!(result.metadatas[0].tenant_id, "t1");
    assert_eq!(result.metadatas[0].document_id, "doc1");
    assert_eq!(result.metadatas[0].extra.get("section"), Some(&json!("intro")));
}

#[tokio::test]
async fn test_tenant_isolation_in_shared_shard() {
    // Both tenants share one shard so their rows land in the same collection
    let config = ShardConfig {
        shard_count: 5,
        ..test_shard_config()
    };
    let router = ShardRouter::new(Arc::new(MemoryVectorBackend::new()), config);

    let vector = vec![0.5, 0.5];
    // Collect tenants mapping to the same shard
    let mut same_shard = Vec::new();
    let target = router.shard_of("tenant_0");
    for i in 0..100 {
        let tenant = format!("tenant_{}", i);
        if router.shard_of(&tenant) == target {
            same_shard.push(tenant);
        }
        if same_shard.len() == 2 {
            break;
        }
    }
    assert_eq!(same_shard.len(), 2, "expected two tenants on one shard");

    for tenant in &same_shard {
        router
            .add_embeddings(
                tenant,
                "doc",
                vec![vector.clone()],
                vec![format!("secret of {}", tenant)],
                vec![BTreeMap::new()],
            )
            .await
            .unwrap();
    }

    // Each tenant only ever sees its own record
    for tenant in &same_shard {
        let result = router.query(tenant, &vector, 10, None).await.unwrap();
        assert_eq!(result.ids.len(), 1);
        assert_eq!(result.metadatas[0].tenant_id, *tenant);
        assert_eq!(result.documents[0], format!("secret of {}", tenant));
    }
}

#[tokio::test]
async fn test_extra_filter_is_conjoined_with_tenant() {
    let router = router();
    let mut extra_a = BTreeMap::new();
    extra_a.insert("lang".to_string(), json!("en"));
    let mut extra_b = BTreeMap::new();
    extra_b.insert("lang".to_string(), json!("es"));

    router
        .add_embeddings("t1", "doc_en", vec![vec![1.0]], vec!["english".to_string()], vec![extra_a.clone()])
        .await
        .unwrap();
    router
        .add_embeddings("t1", "doc_es", vec![vec![1.0]], vec!["spanish".to_string()], vec![extra_b])
        .await
        .unwrap();

    let result = router.query("t1", &[1.0], 10, Some(&extra_a)).await.unwrap();
    assert_eq!(result.ids.len(), 1);
    assert_eq!(result.documents[0], "english");
}

#[tokio::test]
async fn test_delete_by_document() {
    let router = router();
    router
        .add_embeddings(
            "t1",
            "doc1",
            vec![vec![1.0], vec![2.0]],
            vec!["a".to_string(), "b".to_string()],
            vec![BTreeMap::new(), BTreeMap::new()],
        )
        .await
        .unwrap();
    router
        .add_embeddings("t1", "doc2", vec![vec![3.0]], vec!["c".to_string()], vec![BTreeMap::new()])
        .await
        .unwrap();

    assert_eq!(router.delete_by_document("t1", "doc1").await.unwrap(), 2);

    // doc1 rows are gone, doc2 survives
    let result = router.query("t1", &[1.0], 10, None).await.unwrap();
    assert_eq!(result.ids.len(), 1);
    assert_eq!(result.metadatas[0].document_id, "doc2");

    // Deleting again is a no-op, not an error
    assert_eq!(router.delete_by_document("t1", "doc1").await.unwrap(), 0);
}

#[tokio::test]
async fn test_stats_reflect_writes_and_deletes() {
    let router = router();
    router
        .add_embeddings(
            "t1",
            "doc1",
            vec![vec![1.0], vec![2.0]],
            vec!["a".to_string(), "b".to_string()],
            vec![BTreeMap::new(), BTreeMap::new()],
        )
        .await
        .unwrap();

    let stats = router.stats("t1").await.unwrap();
    assert_eq!(stats.document_count, 1);
    assert_eq!(stats.total_embeddings, 2);
    assert!(stats.distinct_tenants_in_shard >= 1);

    // Stats cache is invalidated by the delete
    router.delete_by_document("t1", "doc1").await.unwrap();
    let stats = router.stats("t1").await.unwrap();
    assert_eq!(stats.document_count, 0);
    assert_eq!(stats.total_embeddings, 0);
}

#[tokio::test]
async fn test_query_validation() {
    let router = router();
    assert!(router.query("t1", &[], 1, None).await.unwrap_err().is_validation_error());
    assert!(router.query("t1", &[1.0], 0, None).await.unwrap_err().is_validation_error());
}
