/// Retrieval-augmented generation pipeline
///
/// `service` holds the orchestrator; `prompt`, `confidence` and `retry`
/// are its building blocks and are usable on their own.

pub mod confidence;
pub mod prompt;
pub mod retry;
pub mod service;


pub use confidence::{confidence_score, NO_SOURCE_CONFIDENCE};
pub use prompt::PromptBuilder;
pub use retry::{RetryConfig, RetryExecutor};
pub use service::RagService;
