use crate::backend::ModelBackend;
use crate::error::{RagError, RagResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

/// Connection settings for the embedding/generation model backend
#[derive(Debug, Clone)]
pub struct ModelSettings {
    /// Base URL of the model service
    pub base_url: String,
    /// API key sent as a bearer token, if required
    pub api_key: Option<String>,
    /// Request timeout in seconds. The orchestrator applies its own
    /// per-call timeouts on top of this transport-level bound.
    pub timeout_secs: u64,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:9000".to_string(),
            api_key: None,
            timeout_secs: 60,
        }
    }
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    prompt: &'a str,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    text: String,
}

/// HTTP client for the remote embedding/generation backend.
///
/// The model is a black box: one endpoint embeds text batches, the other
/// completes prompts. Connectivity failures map to `BackendConnectivity`;
/// error responses from the model map to `Generation`.
pub struct HttpModelBackend {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpModelBackend {
    pub fn new(settings: ModelSettings) -> RagResult<Self> {
        info!("Initializing model backend at {}", settings.base_url);

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|e| RagError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            api_key: settings.api_key,
        })
    }

    async fn post<B: Serialize>(&self, path: &str, body: &B) -> RagResult<reqwest::Response> {
        let url = format!("{}/{}", self.base_url, path);
        let mut request = self.http.post(&url).json(body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| RagError::BackendConnectivity(format!("POST {} failed: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(RagError::Generation(format!(
                "Model backend returned {}: {}",
                status, detail
            )));
        }

        Ok(response)
    }
}

#[async_trait]
impl ModelBackend for HttpModelBackend {
    async fn embed(&self, texts: &[String]) -> RagResult<Vec<Vec<f32>>> {
        debug!("Embedding batch of {} texts", texts.len());

        let response = self.post("v1/embeddings", &EmbedRequest { input: texts }).await?;
        let body: EmbedResponse = response
            .json()
            .await
            .map_err(|e| RagError::Serialization(format!("Invalid embed response: {}", e)))?;

        if body.embeddings.len() != texts.len() {
            return Err(RagError::Generation(format!(
                "Model returned {} embeddings for {} texts",
                body.embeddings.len(),
                texts.len()
            )));
        }

        Ok(body.embeddings)
    }

    async fn generate(
        &self,
        prompt: &str,
        temperature: f32,
        max_tokens: u32,
    ) -> RagResult<String> {
        debug!(
            "Generating completion (prompt chars: {}, max_tokens: {})",
            prompt.len(),
            max_tokens
        );

        let response = self
            .post(
                "v1/completions",
                &GenerateRequest {
                    prompt,
                    temperature,
                    max_tokens,
                },
            )
            .await?;

        let body: GenerateResponse = response
            .json()
            .await
            .map_err(|e| RagError::Serialization(format!("Invalid generate response: {}", e)))?;

        Ok(body.text)
    }
}
