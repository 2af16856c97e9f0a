pub mod backend;
pub mod cache;
pub mod config;
pub mod conversation;
pub mod error;
pub mod rag;
pub mod shard;
pub mod types;

#[cfg(test)]
pub mod test_support;

pub use error::{RagError, RagResult};
pub use types::*;
pub use config::Config;
pub use backend::{KvBackend, ModelBackend, VectorBackend};
pub use cache::{EmbeddingCache, SearchResultCache};
pub use conversation::ConversationStore;
pub use rag::{RagService, RetryConfig, RetryExecutor};
pub use shard::{ShardRouter, ShardQueryResult};
