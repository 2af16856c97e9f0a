/// RAG orchestrator
///
/// Composes the conversation store, search cache, embedding cache and shard
/// router into the end-to-end query flow: fetch context, retrieve knowledge
/// (cached or live), assemble a budgeted prompt, generate under timeout,
/// score confidence, persist the exchange.
///
/// A retrieval outage does not fail the request: generation proceeds
/// without knowledge context and the response is marked degraded with an
/// empty source list.

use crate::backend::ModelBackend;
use crate::cache::{EmbeddingCache, SearchResultCache};
use crate::config::RagConfig;
use crate::conversation::ConversationStore;
use crate::error::{RagError, RagResult};
use crate::rag::confidence::confidence_score;
use crate::rag::prompt::PromptBuilder;
use crate::rag::retry::{RetryConfig, RetryExecutor};
use crate::shard::ShardRouter;
use crate::types::{AiResponse, RetrievedChunk, TenantStats};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

/// Map an ascending distance to a similarity in (0, 1], monotonically
fn similarity_from_distance(distance: f32) -> f32 {
    1.0 / (1.0 + distance.max(0.0))
}

pub struct RagService {
    shards: Arc<ShardRouter>,
    search_cache: Arc<SearchResultCache>,
    embeddings: Arc<EmbeddingCache>,
    conversations: Arc<ConversationStore>,
    model: Arc<dyn ModelBackend>,
    retry: RetryExecutor,
    prompt_builder: PromptBuilder,
    config: RagConfig,
}

impl RagService {
    pub fn new(
        shards: Arc<ShardRouter>,
        search_cache: Arc<SearchResultCache>,
        embeddings: Arc<EmbeddingCache>,
        conversations: Arc<ConversationStore>,
        model: Arc<dyn ModelBackend>,
        config: RagConfig,
    ) -> Self {
        Self {
            shards,
            search_cache,
            embeddings,
            conversations,
            model,
            retry: RetryExecutor::new(RetryConfig::default()),
            prompt_builder: PromptBuilder::new(&config),
            config,
        }
    }

    /// Process one query end to end
    #[instrument(skip(self, query), fields(
        tenant = %tenant_id,
        conversation = %conversation_id,
        query_len = query.len()
    ))]
    pub async fn process_query(
        &self,
        tenant_id: &str,
        conversation_id: &str,
        query: &str,
        context_window_override: Option<usize>,
    ) -> RagResult<AiResponse> {
        if query.trim().is_empty() {
            return Err(RagError::Validation("Query must be non-empty".to_string()));
        }
        if tenant_id.is_empty() || conversation_id.is_empty() {
            return Err(RagError::Validation(
                "tenant_id and conversation_id must be non-empty".to_string(),
            ));
        }

        let started = Instant::now();

        // Conversation context
        let context_window = context_window_override.unwrap_or(self.config.context_messages);
        let context = self
            .conversations
            .get_context(tenant_id, conversation_id, context_window)
            .await;
        debug!("Fetched {} context messages", context.len());

        // Knowledge retrieval; an outage degrades instead of failing
        let (sources, degraded) = match self
            .retrieve_knowledge(tenant_id, query, self.config.top_k)
            .await
        {
            Ok(sources) => (sources, false),
            Err(e) if e.is_validation_error() || matches!(e, RagError::TenantIsolation { .. }) => {
                return Err(e);
            }
            Err(e) => {
                warn!("Retrieval failed, generating degraded answer: {}", e);
                (Vec::new(), true)
            }
        };

        // Prompt assembly under the token budget
        let prompt = self.prompt_builder.build(query, &sources, &context);

        // Generation under explicit timeout; connectivity errors retried
        let response_text = self
            .retry
            .execute(|| async {
                timeout(
                    Duration::from_millis(self.config.generation_timeout_ms),
                    self.model.generate(&prompt, self.config.temperature, self.config.max_tokens),
                )
                .await
                .map_err(|_| RagError::GenerationTimeout(self.config.generation_timeout_ms))?
            })
            .await?;

        // Confidence from retrieval quality and response shape
        let scores: Vec<f32> = sources.iter().map(|s| s.score).collect();
        let confidence =
            confidence_score(&scores, &response_text, self.config.high_similarity_threshold);

        let latency_ms = started.elapsed().as_millis() as u64;
        self.conversations
            .add_exchange(
                tenant_id,
                conversation_id,
                query,
                &response_text,
                &sources,
                latency_ms,
                &self.config.model_version,
            )
            .await?;

        info!(
            "Processed query for {} in {}ms ({} sources, confidence {:.2}{})",
            tenant_id,
            latency_ms,
            sources.len(),
            confidence,
            if degraded { ", degraded" } else { "" }
        );

        Ok(AiResponse {
            response: response_text,
            sources,
            confidence,
            conversation_id: conversation_id.to_string(),
            latency_ms,
            model: self.config.model_version.clone(),
            degraded,
        })
    }

    /// Retrieve the most relevant chunks for a query, via the search cache
    /// when possible
    #[instrument(skip(self, query), fields(tenant = %tenant_id, limit))]
    pub async fn retrieve_knowledge(
        &self,
        tenant_id: &str,
        query: &str,
        limit: usize,
    ) -> RagResult<Vec<RetrievedChunk>> {
        if query.trim().is_empty() {
            return Err(RagError::Validation("Query must be non-empty".to_string()));
        }
        if limit == 0 {
            return Err(RagError::Validation("limit must be greater than 0".to_string()));
        }

        let filters: BTreeMap<String, Value> = BTreeMap::new();
        if let Some(entry) = self
            .search_cache
            .get(tenant_id, query, &self.config.model_version, &filters)
            .await
        {
            let mut results = entry.results;
            results.truncate(limit);
            return Ok(results);
        }

        // Live retrieval: embed, over-fetch, threshold-filter, rank
        let query_vector = self.embeddings.embed_one(tenant_id, query).await?;

        let raw = self
            .retry
            .execute(|| {
                let query_vector = query_vector.clone();
                async move {
                    self.shards
                        .query(tenant_id, &query_vector, limit * 2, None)
                        .await
                }
            })
            .await?;

        let mut chunks: Vec<RetrievedChunk> = raw
            .ids
            .into_iter()
            .zip(raw.documents)
            .zip(raw.metadatas)
            .zip(raw.distances)
            .map(|(((id, content), metadata), distance)| RetrievedChunk {
                content,
                metadata,
                score: similarity_from_distance(distance),
                rank: 0,
                id,
            })
            .filter(|chunk| chunk.score >= self.config.similarity_threshold)
            .collect();

        chunks.truncate(limit);
        for (rank, chunk) in chunks.iter_mut().enumerate() {
            chunk.rank = rank;
        }

        self.search_cache
            .put(tenant_id, query, &self.config.model_version, &filters, &chunks)
            .await;

        debug!(
            "Live retrieval for {} returned {} chunks above threshold",
            tenant_id,
            chunks.len()
        );
        Ok(chunks)
    }

    /// Invalidate a tenant's cached search results, optionally only the
    /// entries referencing one document. Returns the count removed.
    pub async fn invalidate_tenant_cache(
        &self,
        tenant_id: &str,
        document_id: Option<&str>,
    ) -> u64 {
        self.search_cache.invalidate(tenant_id, document_id).await
    }

    /// Re-execute popular queries that have fallen out of the cache,
    /// pre-populating entries. Returns how many were warmed.
    pub async fn warm_popular(&self, tenant_id: &str) -> RagResult<usize> {
        let candidates = self.search_cache.popular_uncached_queries(tenant_id).await?;
        let mut warmed = 0;

        for candidate in candidates {
            match self
                .retrieve_knowledge(tenant_id, &candidate.query, self.config.top_k)
                .await
            {
                Ok(_) => {
                    debug!(
                        "Warmed '{}' for {} (popularity {})",
                        candidate.query, tenant_id, candidate.popularity
                    );
                    warmed += 1;
                }
                Err(e) => warn!("Failed to warm '{}': {}", candidate.query, e),
            }
        }

        if warmed > 0 {
            info!("Warmed {} popular queries for {}", warmed, tenant_id);
        }
        Ok(warmed)
    }

    /// Combined shard and cache statistics for a tenant
    pub async fn get_stats(&self, tenant_id: &str) -> RagResult<TenantStats> {
        let shard = self.shards.stats(tenant_id).await?;
        let search = self.search_cache.stats();
        let embedding = self.embeddings.stats();

        Ok(TenantStats {
            shard,
            search_cache_hits: search.hits,
            search_cache_misses: search.misses,
            embedding_cache_hits: embedding.hits,
            embedding_cache_misses: embedding.misses,
        })
    }
}
