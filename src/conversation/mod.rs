/// Conversation context manager
///
/// Bounded per-conversation message history backed by the primary KV store,
/// with a bounded in-memory LRU fallback that answers when the primary is
/// unavailable. Trimming drops the oldest messages first and never the
/// newest.
///
/// Concurrent `add_exchange` calls on one conversation are not serialized;
/// read-modify-write cycles may interleave trims. History stays bounded
/// either way and each writer's own exchange survives its own write.

use crate::backend::KvBackend;
use crate::cache::keys::tenant_digest;
use crate::config::ConversationConfig;
use crate::error::RagResult;
use crate::types::{ConversationMessage, ConversationSummary, MessageRole, RetrievedChunk};
use lru::LruCache;
use serde_json::json;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

pub struct ConversationStore {
    primary: Arc<dyn KvBackend>,
    config: ConversationConfig,
    /// Bounded fallback: most-recently-used conversations survive
    fallback: Mutex<LruCache<String, Vec<ConversationMessage>>>,
}

impl ConversationStore {
    pub fn new(primary: Arc<dyn KvBackend>, config: ConversationConfig) -> Self {
        let capacity = NonZeroUsize::new(config.fallback_max_conversations.max(1))
            .unwrap_or(NonZeroUsize::MIN);
        Self {
            primary,
            config,
            fallback: Mutex::new(LruCache::new(capacity)),
        }
    }

    // Tenant goes in as a fixed-length digest so an id containing the
    // separator cannot alias another tenant's conversation
    fn history_key(tenant_id: &str, conversation_id: &str) -> String {
        format!("conv:{}:{}", tenant_digest(tenant_id), conversation_id)
    }

    async fn read_primary(
        &self,
        tenant_id: &str,
        conversation_id: &str,
    ) -> RagResult<Vec<ConversationMessage>> {
        let key = Self::history_key(tenant_id, conversation_id);
        match self.primary.get(&key).await? {
            Some(raw) => Ok(serde_json::from_str(&raw)?),
            None => Ok(Vec::new()),
        }
    }

    async fn write_primary(
        &self,
        tenant_id: &str,
        conversation_id: &str,
        messages: &[ConversationMessage],
    ) -> RagResult<()> {
        let key = Self::history_key(tenant_id, conversation_id);
        let serialized = serde_json::to_string(messages)?;
        self.primary
            .set(&key, &serialized, Some(self.config.history_ttl_secs))
            .await
    }

    /// Read up to `max_messages` most recent messages, falling back to the
    /// in-memory store when the primary is unavailable
    pub async fn get_context(
        &self,
        tenant_id: &str,
        conversation_id: &str,
        max_messages: usize,
    ) -> Vec<ConversationMessage> {
        let messages = match self.read_primary(tenant_id, conversation_id).await {
            Ok(messages) => messages,
            Err(e) => {
                warn!(
                    "Primary conversation store unavailable, serving fallback: {}",
                    e
                );
                let key = Self::history_key(tenant_id, conversation_id);
                let mut fallback = self.fallback.lock().await;
                fallback.get(&key).cloned().unwrap_or_default()
            }
        };

        let skip = messages.len().saturating_sub(max_messages);
        messages.into_iter().skip(skip).collect()
    }

    /// Append one (user, assistant) exchange, trimming both stores to the
    /// configured maximum, oldest first
    pub async fn add_exchange(
        &self,
        tenant_id: &str,
        conversation_id: &str,
        user_text: &str,
        assistant_text: &str,
        sources: &[RetrievedChunk],
        latency_ms: u64,
        model: &str,
    ) -> RagResult<()> {
        let user_message =
            ConversationMessage::new(tenant_id, conversation_id, MessageRole::User, user_text);

        let mut assistant_message = ConversationMessage::new(
            tenant_id,
            conversation_id,
            MessageRole::Assistant,
            assistant_text,
        );
        assistant_message.latency_ms = Some(latency_ms);
        assistant_message.metadata = Some(json!({
            "model": model,
            "sources": sources
                .iter()
                .map(|chunk| json!({
                    "document_id": chunk.document_id(),
                    "chunk_index": chunk.metadata.chunk_index,
                    "score": chunk.score,
                }))
                .collect::<Vec<_>>(),
        }));

        // Fallback is always updated so a primary outage loses nothing new
        {
            let key = Self::history_key(tenant_id, conversation_id);
            let mut fallback = self.fallback.lock().await;
            let history = fallback.get_or_insert_mut(key, Vec::new);
            history.push(user_message.clone());
            history.push(assistant_message.clone());
            Self::trim(history, self.config.max_messages);
        }

        let mut messages = match self.read_primary(tenant_id, conversation_id).await {
            Ok(messages) => messages,
            Err(e) => {
                warn!("Primary conversation read failed, fallback only: {}", e);
                return Ok(());
            }
        };
        messages.push(user_message);
        messages.push(assistant_message);
        Self::trim(&mut messages, self.config.max_messages);

        if let Err(e) = self
            .write_primary(tenant_id, conversation_id, &messages)
            .await
        {
            warn!("Primary conversation write failed, fallback only: {}", e);
        } else {
            debug!(
                "Appended exchange to {}:{} ({} messages retained)",
                tenant_id,
                conversation_id,
                messages.len()
            );
        }
        Ok(())
    }

    /// Drop oldest messages until at most `max` remain. The newest message
    /// is always retained.
    fn trim(messages: &mut Vec<ConversationMessage>, max: usize) {
        if messages.len() > max {
            let excess = messages.len() - max;
            messages.drain(..excess);
        }
    }

    /// Derived, read-only conversation statistics
    pub async fn get_summary(
        &self,
        tenant_id: &str,
        conversation_id: &str,
    ) -> RagResult<ConversationSummary> {
        let messages = match self.read_primary(tenant_id, conversation_id).await {
            Ok(messages) => messages,
            Err(e) => {
                warn!("Primary unavailable for summary, serving fallback: {}", e);
                let key = Self::history_key(tenant_id, conversation_id);
                let mut fallback = self.fallback.lock().await;
                fallback.get(&key).cloned().unwrap_or_default()
            }
        };

        if messages.is_empty() {
            return Ok(ConversationSummary::default());
        }

        let responses: Vec<&ConversationMessage> = messages
            .iter()
            .filter(|m| m.role == MessageRole::Assistant)
            .collect();
        let latencies: Vec<u64> = responses.iter().filter_map(|m| m.latency_ms).collect();

        let avg_latency = if latencies.is_empty() {
            0.0
        } else {
            latencies.iter().sum::<u64>() as f64 / latencies.len() as f64
        };
        let avg_chars = if responses.is_empty() {
            0.0
        } else {
            responses.iter().map(|m| m.content.len()).sum::<usize>() as f64
                / responses.len() as f64
        };

        Ok(ConversationSummary {
            total_messages: messages.len(),
            avg_response_latency_ms: avg_latency,
            avg_response_chars: avg_chars,
            first_ts: messages.first().map(|m| m.created_at),
            last_ts: messages.last().map(|m| m.created_at),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryKvBackend;

    fn store_with(max_messages: usize, fallback_max: usize) -> (ConversationStore, Arc<MemoryKvBackend>) {
        let kv = Arc::new(MemoryKvBackend::new());
        let config = ConversationConfig {
            max_messages,
            fallback_max_conversations: fallback_max,
            history_ttl_secs: 3600,
        };
        (ConversationStore::new(kv.clone(), config), kv)
    }

    #[tokio::test]
    async fn test_exchange_roundtrip() {
        let (store, _kv) = store_with(50, 10);
        store
            .add_exchange("t1", "c1", "hello", "hi there", &[], 120, "model-x")
            .await
            .unwrap();

        let context = store.get_context("t1", "c1", 10).await;
        assert_eq!(context.len(), 2);
        assert_eq!(context[0].role, MessageRole::User);
        assert_eq!(context[0].content, "hello");
        assert_eq!(context[1].role, MessageRole::Assistant);
        assert_eq!(context[1].latency_ms, Some(120));
    }

    #[tokio::test]
    async fn test_context_limited_to_most_recent() {
        let (store, _kv) = store_with(50, 10);
        for i in 0..5 {
            store
                .add_exchange("t1", "c1", &format!("q{}", i), &format!("a{}", i), &[], 10, "m")
                .await
                .unwrap();
        }

        let context = store.get_context("t1", "c1", 4).await;
        assert_eq!(context.len(), 4);
        assert_eq!(context[0].content, "q3");
        assert_eq!(context[3].content, "a4");
    }

    #[tokio::test]
    async fn test_trim_keeps_newest_at_exact_max() {
        let max = 6;
        let (store, _kv) = store_with(max, 10);

        // 5 exchanges = 10 messages > max
        for i in 0..5 {
            store
                .add_exchange("t1", "c1", &format!("q{}", i), &format!("a{}", i), &[], 10, "m")
                .await
                .unwrap();
        }

        let context = store.get_context("t1", "c1", 100).await;
        assert_eq!(context.len(), max);
        // Newest message survived trimming
        assert_eq!(context.last().unwrap().content, "a4");
        // Oldest retained is exchange 2
        assert_eq!(context[0].content, "q2");
    }

    #[tokio::test]
    async fn test_fallback_serves_reads_during_primary_outage() {
        let (store, kv) = store_with(50, 10);
        store
            .add_exchange("t1", "c1", "hello", "hi", &[], 10, "m")
            .await
            .unwrap();

        kv.set_failing(true);
        let context = store.get_context("t1", "c1", 10).await;
        assert_eq!(context.len(), 2);
        assert_eq!(context[0].content, "hello");
    }

    #[tokio::test]
    async fn test_writes_during_outage_land_in_fallback() {
        let (store, kv) = store_with(50, 10);
        kv.set_failing(true);

        store
            .add_exchange("t1", "c1", "offline question", "offline answer", &[], 10, "m")
            .await
            .unwrap();

        let context = store.get_context("t1", "c1", 10).await;
        assert_eq!(context.len(), 2);
        assert_eq!(context[1].content, "offline answer");
    }

    #[tokio::test]
    async fn test_fallback_evicts_least_recently_used_conversation() {
        let (store, kv) = store_with(50, 2);

        for conv in ["c1", "c2", "c3"] {
            store
                .add_exchange("t1", conv, "q", "a", &[], 10, "m")
                .await
                .unwrap();
        }

        kv.set_failing(true);
        // c1 was evicted by the bounded LRU; c2 and c3 survive
        assert!(store.get_context("t1", "c1", 10).await.is_empty());
        assert_eq!(store.get_context("t1", "c3", 10).await.len(), 2);
    }

    #[tokio::test]
    async fn test_summary() {
        let (store, _kv) = store_with(50, 10);
        store
            .add_exchange("t1", "c1", "q1", "answer one", &[], 100, "m")
            .await
            .unwrap();
        store
            .add_exchange("t1", "c1", "q2", "answer two!", &[], 300, "m")
            .await
            .unwrap();

        let summary = store.get_summary("t1", "c1").await.unwrap();
        assert_eq!(summary.total_messages, 4);
        assert!((summary.avg_response_latency_ms - 200.0).abs() < 1e-9);
        assert!(summary.avg_response_chars > 0.0);
        assert!(summary.first_ts.unwrap() <= summary.last_ts.unwrap());
    }

    #[tokio::test]
    async fn test_summary_empty_conversation() {
        let (store, _kv) = store_with(50, 10);
        let summary = store.get_summary("t1", "nope").await.unwrap();
        assert_eq!(summary.total_messages, 0);
        assert!(summary.first_ts.is_none());
    }
}
