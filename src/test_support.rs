/// Shared test doubles for the async test suites
use crate::backend::ModelBackend;
use crate::error::{RagError, RagResult};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, Once};
use std::time::Duration;

static TRACING: Once = Once::new();

/// Initialize logging for the test process once; honors RUST_LOG
pub fn init_test_logging() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Deterministic in-process model backend.
///
/// Embeddings are derived from a SHA-256 of the text so identical texts map
/// to identical vectors and distinct texts land far apart. Call counts and
/// batch sizes are recorded for dedup assertions.
#[derive(Default)]
pub struct StubModelBackend {
    pub embed_calls: AtomicU64,
    pub embedded_texts: AtomicU64,
    pub generate_calls: AtomicU64,
    pub batch_sizes: Mutex<Vec<usize>>,
    failing: AtomicBool,
    delay_ms: AtomicU64,
    response: Mutex<String>,
}

impl StubModelBackend {
    pub fn new() -> Self {
        let stub = Self::default();
        *stub.response.lock().unwrap() = "This is a generated answer.".to_string();
        stub
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Delay every call, for timeout tests
    pub fn set_delay_ms(&self, delay_ms: u64) {
        self.delay_ms.store(delay_ms, Ordering::SeqCst);
    }

    pub fn set_response(&self, response: &str) {
        *self.response.lock().unwrap() = response.to_string();
    }

    pub fn deterministic_vector(text: &str) -> Vec<f32> {
        let digest = Sha256::digest(text.as_bytes());
        digest[..8].iter().map(|&b| b as f32 / 255.0).collect()
    }
}

#[async_trait]
impl ModelBackend for StubModelBackend {
    async fn embed(&self, texts: &[String]) -> RagResult<Vec<Vec<f32>>> {
        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(RagError::BackendConnectivity("stub embed failure".to_string()));
        }

        self.embed_calls.fetch_add(1, Ordering::SeqCst);
        self.embedded_texts
            .fetch_add(texts.len() as u64, Ordering::SeqCst);
        self.batch_sizes.lock().unwrap().push(texts.len());

        Ok(texts.iter().map(|t| Self::deterministic_vector(t)).collect())
    }

    async fn generate(
        &self,
        _prompt: &str,
        _temperature: f32,
        _max_tokens: u32,
    ) -> RagResult<String> {
        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(RagError::BackendConnectivity("stub generate failure".to_string()));
        }

        self.generate_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.response.lock().unwrap().clone())
    }
}
