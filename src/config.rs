use crate::error::{RagError, RagResult};
use std::env;

/// Shard count must stay within this range; the tenant->shard mapping is
/// only stable for the lifetime of a given count.
pub const MIN_SHARD_COUNT: u32 = 5;
pub const MAX_SHARD_COUNT: u32 = 50;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Shard router configuration
    pub shards: ShardConfig,
    /// Cache layer configuration
    pub cache: CacheConfig,
    /// Conversation context configuration
    pub conversation: ConversationConfig,
    /// Orchestrator configuration
    pub rag: RagConfig,
}

/// Shard router configuration
#[derive(Debug, Clone)]
pub struct ShardConfig {
    /// Number of physical shards; must lie in [5, 50]
    pub shard_count: u32,
    /// Maximum concurrent vector-backend connections across all shards
    pub max_backend_connections: usize,
    /// Collection handle cache TTL in seconds
    pub collection_ttl_secs: u64,
    /// Shard statistics cache TTL in seconds
    pub stats_ttl_secs: u64,
}

/// Cache layer configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Search result entry TTL in seconds
    pub search_ttl_secs: u64,
    /// Popularity counter TTL in seconds
    pub popularity_ttl_secs: u64,
    /// Minimum popularity count before a query is warmed
    pub warm_threshold: u64,
    /// Embedding cache entry TTL in seconds
    pub embedding_ttl_secs: u64,
    /// Maximum texts per embedding backend batch
    pub embedding_batch_size: usize,
    /// Embedding backend call timeout in milliseconds
    pub embedding_timeout_ms: u64,
}

/// Conversation context configuration
#[derive(Debug, Clone)]
pub struct ConversationConfig {
    /// Maximum messages retained per conversation
    pub max_messages: usize,
    /// Maximum distinct conversations held by the in-memory fallback
    pub fallback_max_conversations: usize,
    /// Conversation TTL in the primary store, in seconds
    pub history_ttl_secs: u64,
}

/// Orchestrator configuration
#[derive(Debug, Clone)]
pub struct RagConfig {
    /// Results kept after threshold filtering
    pub top_k: usize,
    /// Minimum similarity for a chunk to be used as context
    pub similarity_threshold: f32,
    /// Similarity at which a source counts toward the confidence quality boost
    pub high_similarity_threshold: f32,
    /// Prompt token budget
    pub token_budget: usize,
    /// Character budget per knowledge chunk in the prompt
    pub chunk_char_budget: usize,
    /// Conversation turns included in the prompt
    pub history_turns: usize,
    /// Character budget per history turn in the prompt
    pub history_char_budget: usize,
    /// Recent messages fetched as conversation context
    pub context_messages: usize,
    /// Generation backend call timeout in milliseconds
    pub generation_timeout_ms: u64,
    /// Sampling temperature passed to the generation backend
    pub temperature: f32,
    /// Maximum tokens requested from the generation backend
    pub max_tokens: u32,
    /// Model identifier reported in responses and cache keys
    pub model_version: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> RagResult<Self> {
        // Load .env file if it exists
        if let Err(e) = dotenvy::dotenv() {
            tracing::debug!("Could not load .env file: {}", e);
        }

        let config = Config {
            shards: ShardConfig {
                shard_count: parse_env("SHARD_COUNT", 20)?,
                max_backend_connections: parse_env("SHARD_MAX_BACKEND_CONNECTIONS", 10)?,
                collection_ttl_secs: parse_env("SHARD_COLLECTION_TTL_SECS", 300)?,
                stats_ttl_secs: parse_env("SHARD_STATS_TTL_SECS", 300)?,
            },
            cache: CacheConfig {
                search_ttl_secs: parse_env("SEARCH_CACHE_TTL_SECS", 3600)?,
                popularity_ttl_secs: parse_env("POPULARITY_TTL_SECS", 7 * 24 * 3600)?,
                warm_threshold: parse_env("CACHE_WARM_THRESHOLD", 5)?,
                embedding_ttl_secs: parse_env("EMBEDDING_CACHE_TTL_SECS", 7 * 24 * 3600)?,
                embedding_batch_size: parse_env("EMBEDDING_BATCH_SIZE", 32)?,
                embedding_timeout_ms: parse_env("EMBEDDING_TIMEOUT_MS", 30_000)?,
            },
            conversation: ConversationConfig {
                max_messages: parse_env("CONVERSATION_MAX_MESSAGES", 50)?,
                fallback_max_conversations: parse_env("CONVERSATION_FALLBACK_MAX", 1000)?,
                history_ttl_secs: parse_env("CONVERSATION_TTL_SECS", 30 * 24 * 3600)?,
            },
            rag: RagConfig {
                top_k: parse_env("RAG_TOP_K", 5)?,
                similarity_threshold: parse_env("RAG_SIMILARITY_THRESHOLD", 0.3)?,
                high_similarity_threshold: parse_env("RAG_HIGH_SIMILARITY_THRESHOLD", 0.75)?,
                token_budget: parse_env("RAG_TOKEN_BUDGET", 2000)?,
                chunk_char_budget: parse_env("RAG_CHUNK_CHAR_BUDGET", 500)?,
                history_turns: parse_env("RAG_HISTORY_TURNS", 5)?,
                history_char_budget: parse_env("RAG_HISTORY_CHAR_BUDGET", 200)?,
                context_messages: parse_env("RAG_CONTEXT_MESSAGES", 10)?,
                generation_timeout_ms: parse_env("GENERATION_TIMEOUT_MS", 30_000)?,
                temperature: parse_env("GENERATION_TEMPERATURE", 0.7)?,
                max_tokens: parse_env("GENERATION_MAX_TOKENS", 500)?,
                model_version: env::var("GENERATION_MODEL_VERSION")
                    .unwrap_or_else(|_| "default".to_string()),
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> RagResult<()> {
        if self.shards.shard_count < MIN_SHARD_COUNT || self.shards.shard_count > MAX_SHARD_COUNT {
            return Err(RagError::Config(format!(
                "SHARD_COUNT must lie in [{}, {}], got {}",
                MIN_SHARD_COUNT, MAX_SHARD_COUNT, self.shards.shard_count
            )));
        }

        if self.shards.max_backend_connections == 0 {
            return Err(RagError::Config(
                "SHARD_MAX_BACKEND_CONNECTIONS must be greater than 0".to_string(),
            ));
        }

        if self.cache.embedding_batch_size == 0 {
            return Err(RagError::Config(
                "EMBEDDING_BATCH_SIZE must be greater than 0".to_string(),
            ));
        }

        if self.cache.embedding_timeout_ms == 0 || self.rag.generation_timeout_ms == 0 {
            return Err(RagError::Config(
                "Backend timeouts must be greater than 0".to_string(),
            ));
        }

        if self.conversation.max_messages == 0 {
            return Err(RagError::Config(
                "CONVERSATION_MAX_MESSAGES must be greater than 0".to_string(),
            ));
        }

        if self.conversation.fallback_max_conversations == 0 {
            return Err(RagError::Config(
                "CONVERSATION_FALLBACK_MAX must be greater than 0".to_string(),
            ));
        }

        if self.rag.top_k == 0 {
            return Err(RagError::Config("RAG_TOP_K must be greater than 0".to_string()));
        }

        if !(0.0..=1.0).contains(&self.rag.similarity_threshold)
            || !(0.0..=1.0).contains(&self.rag.high_similarity_threshold)
        {
            return Err(RagError::Config(
                "Similarity thresholds must lie in [0, 1]".to_string(),
            ));
        }

        if self.rag.token_budget == 0 {
            return Err(RagError::Config(
                "RAG_TOKEN_BUDGET must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            shards: ShardConfig {
                shard_count: 20,
                max_backend_connections: 10,
                collection_ttl_secs: 300,
                stats_ttl_secs: 300,
            },
            cache: CacheConfig {
                search_ttl_secs: 3600,
                popularity_ttl_secs: 7 * 24 * 3600,
                warm_threshold: 5,
                embedding_ttl_secs: 7 * 24 * 3600,
                embedding_batch_size: 32,
                embedding_timeout_ms: 30_000,
            },
            conversation: ConversationConfig {
                max_messages: 50,
                fallback_max_conversations: 1000,
                history_ttl_secs: 30 * 24 * 3600,
            },
            rag: RagConfig {
                top_k: 5,
                similarity_threshold: 0.3,
                high_similarity_threshold: 0.75,
                token_budget: 2000,
                chunk_char_budget: 500,
                history_turns: 5,
                history_char_budget: 200,
                context_messages: 10,
                generation_timeout_ms: 30_000,
                temperature: 0.7,
                max_tokens: 500,
                model_version: "default".to_string(),
            },
        }
    }
}

/// Parse an environment variable, falling back to a default
fn parse_env<T>(name: &str, default: T) -> RagResult<T>
where
    T: std::str::FromStr + std::fmt::Display,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|e| RagError::Config(format!("Invalid {}: {}", name, e))),
        Err(_) => Ok(default),
    }
}
