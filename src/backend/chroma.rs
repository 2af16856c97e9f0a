use crate::backend::{CollectionHandle, VectorBackend, VectorBatch, VectorQueryResult, VectorRecords};
use crate::error::{RagError, RagResult};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info};

/// Connection settings for the Chroma vector store
#[derive(Debug, Clone)]
pub struct ChromaSettings {
    /// Base URL of the Chroma server, e.g. http://localhost:8000
    pub base_url: String,
    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for ChromaSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Deserialize)]
struct CollectionResponse {
    id: String,
    name: String,
}

#[derive(Debug, Deserialize, Default)]
struct GetResponse {
    #[serde(default)]
    ids: Vec<String>,
    #[serde(default)]
    documents: Option<Vec<Option<String>>>,
    #[serde(default)]
    metadatas: Option<Vec<Option<Value>>>,
}

#[derive(Debug, Deserialize, Default)]
struct QueryResponse {
    #[serde(default)]
    ids: Vec<Vec<String>>,
    #[serde(default)]
    documents: Option<Vec<Vec<Option<String>>>>,
    #[serde(default)]
    metadatas: Option<Vec<Vec<Option<Value>>>>,
    #[serde(default)]
    distances: Option<Vec<Vec<f32>>>,
}

/// HTTP client for a Chroma-style vector storage backend.
///
/// Connectivity failures map to `RagError::BackendConnectivity` so callers
/// can retry with backoff; 4xx responses map to `Validation`.
pub struct ChromaVectorBackend {
    http: reqwest::Client,
    base_url: String,
}

impl ChromaVectorBackend {
    pub fn new(settings: ChromaSettings) -> RagResult<Self> {
        info!("Initializing Chroma vector backend at {}", settings.base_url);

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|e| RagError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn post(&self, path: &str, body: Value) -> RagResult<reqwest::Response> {
        let url = format!("{}/api/v1/{}", self.base_url, path);
        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| RagError::BackendConnectivity(format!("POST {} failed: {}", url, e)))?;

        let status = response.status();
        if status.is_client_error() {
            let detail = response.text().await.unwrap_or_default();
            return Err(RagError::Validation(format!(
                "Vector store rejected request ({}): {}",
                status, detail
            )));
        }
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(RagError::BackendConnectivity(format!(
                "Vector store error ({}): {}",
                status, detail
            )));
        }

        Ok(response)
    }

    /// Check backend health via the heartbeat endpoint
    pub async fn health_check(&self) -> RagResult<()> {
        let url = format!("{}/api/v1/heartbeat", self.base_url);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| RagError::BackendConnectivity(format!("Heartbeat failed: {}", e)))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(RagError::BackendConnectivity(format!(
                "Heartbeat returned {}",
                response.status()
            )))
        }
    }
}

#[async_trait]
impl VectorBackend for ChromaVectorBackend {
    async fn ensure_collection(&self, name: &str) -> RagResult<CollectionHandle> {
        debug!("Ensuring collection '{}'", name);

        let response = self
            .post(
                "collections",
                json!({
                    "name": name,
                    "get_or_create": true,
                    "metadata": {"hnsw:space": "l2"},
                }),
            )
            .await?;

        let collection: CollectionResponse = response
            .json()
            .await
            .map_err(|e| RagError::Serialization(format!("Invalid collection response: {}", e)))?;

        Ok(CollectionHandle {
            id: collection.id,
            name: collection.name,
        })
    }

    async fn add(&self, collection: &CollectionHandle, batch: VectorBatch) -> RagResult<()> {
        debug!(
            "Adding {} records to collection '{}'",
            batch.ids.len(),
            collection.name
        );

        self.post(
            &format!("collections/{}/add", collection.id),
            json!({
                "ids": batch.ids,
                "embeddings": batch.embeddings,
                "documents": batch.documents,
                "metadatas": batch.metadatas,
            }),
        )
        .await?;

        Ok(())
    }

    async fn query(
        &self,
        collection: &CollectionHandle,
        query_embeddings: &[Vec<f32>],
        k: usize,
        where_filter: &Value,
    ) -> RagResult<VectorQueryResult> {
        debug!(
            "Querying collection '{}' with {} vectors, k={}",
            collection.name,
            query_embeddings.len(),
            k
        );

        let response = self
            .post(
                &format!("collections/{}/query", collection.id),
                json!({
                    "query_embeddings": query_embeddings,
                    "n_results": k,
                    "where": where_filter,
                    "include": ["documents", "metadatas", "distances"],
                }),
            )
            .await?;

        let body: QueryResponse = response
            .json()
            .await
            .map_err(|e| RagError::Serialization(format!("Invalid query response: {}", e)))?;

        let row_sets = body.ids.len();
        Ok(VectorQueryResult {
            ids: body.ids,
            documents: body
                .documents
                .map(|sets| {
                    sets.into_iter()
                        .map(|rows| rows.into_iter().map(Option::unwrap_or_default).collect())
                        .collect()
                })
                .unwrap_or_else(|| vec![Vec::new(); row_sets]),
            metadatas: body
                .metadatas
                .map(|sets| {
                    sets.into_iter()
                        .map(|rows| {
                            rows.into_iter()
                                .map(|m| m.unwrap_or(Value::Null))
                                .collect()
                        })
                        .collect()
                })
                .unwrap_or_else(|| vec![Vec::new(); row_sets]),
            distances: body.distances.unwrap_or_else(|| vec![Vec::new(); row_sets]),
        })
    }

    async fn get(
        &self,
        collection: &CollectionHandle,
        where_filter: &Value,
    ) -> RagResult<VectorRecords> {
        let response = self
            .post(
                &format!("collections/{}/get", collection.id),
                json!({
                    "where": where_filter,
                    "include": ["documents", "metadatas"],
                }),
            )
            .await?;

        let body: GetResponse = response
            .json()
            .await
            .map_err(|e| RagError::Serialization(format!("Invalid get response: {}", e)))?;

        let count = body.ids.len();
        Ok(VectorRecords {
            ids: body.ids,
            documents: body
                .documents
                .map(|rows| rows.into_iter().map(Option::unwrap_or_default).collect())
                .unwrap_or_else(|| vec![String::new(); count]),
            metadatas: body
                .metadatas
                .map(|rows| rows.into_iter().map(|m| m.unwrap_or(Value::Null)).collect())
                .unwrap_or_else(|| vec![Value::Null; count]),
        })
    }

    async fn delete(&self, collection: &CollectionHandle, ids: &[String]) -> RagResult<()> {
        if ids.is_empty() {
            return Ok(());
        }

        debug!(
            "Deleting {} records from collection '{}'",
            ids.len(),
            collection.name
        );

        self.post(
            &format!("collections/{}/delete", collection.id),
            json!({ "ids": ids }),
        )
        .await?;

        Ok(())
    }
}
