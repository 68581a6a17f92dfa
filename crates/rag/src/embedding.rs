use std::env;

use citerag_core::{
    status_error, Embedder, EmbeddingConfig, HashEmbedder, HashEmbedderConfig, RagError, Result,
    RetryPolicy,
};
use reqwest::blocking::Client;
use serde::Deserialize;
use tracing::debug;

const SERVICE: &str = "embedder";

#[derive(Clone)]
pub enum EmbeddingBackend {
    Hash(HashEmbedder),
    OpenAi(OpenAiEmbeddingClient),
}

/// Embedder selected from configuration; input is processed in batches.
#[derive(Clone)]
pub struct EmbeddingClient {
    backend: EmbeddingBackend,
    batch_size: usize,
}

impl EmbeddingClient {
    pub fn from_config(config: &EmbeddingConfig, retry: RetryPolicy) -> Result<Self> {
        let backend = match config.provider.to_lowercase().as_str() {
            "openai" => EmbeddingBackend::OpenAi(OpenAiEmbeddingClient::new(
                &config.model,
                &config.base_url,
                retry,
            )?),
            "hash" => EmbeddingBackend::Hash(HashEmbedder::new(HashEmbedderConfig {
                dimensions: config.dimensions,
                seed: 1337,
            })),
            other => {
                return Err(RagError::Config(format!(
                    "unknown embedding provider {other}"
                )))
            }
        };
        Ok(Self {
            backend,
            batch_size: config.batch_size.max(1),
        })
    }
}

impl Embedder for EmbeddingClient {
    fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for (batch_idx, batch) in texts.chunks(self.batch_size).enumerate() {
            debug!(batch = batch_idx + 1, size = batch.len(), "embedding batch");
            let embedded = match &self.backend {
                EmbeddingBackend::Hash(embedder) => embedder.embed_texts(batch)?,
                EmbeddingBackend::OpenAi(client) => client.embed_batch(batch)?,
            };
            if embedded.len() != batch.len() {
                return Err(RagError::Other(format!(
                    "embedder returned {} vectors for {} inputs",
                    embedded.len(),
                    batch.len()
                )));
            }
            vectors.extend(embedded);
        }
        Ok(vectors)
    }
}

#[derive(Clone)]
pub struct OpenAiEmbeddingClient {
    http: Client,
    model: String,
    base_url: String,
    api_key: String,
    retry: RetryPolicy,
}

impl OpenAiEmbeddingClient {
    pub fn new(model: &str, base_url: &str, retry: RetryPolicy) -> Result<Self> {
        let api_key = env::var("OPENAI_API_KEY").map_err(|_| {
            RagError::Config("OPENAI_API_KEY is required for openai embeddings".into())
        })?;
        Ok(Self {
            http: Client::new(),
            model: model.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            retry,
        })
    }

    pub fn embed_batch(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }
        let url = format!("{}/embeddings", self.base_url);
        let payload = serde_json::json!({
            "model": self.model,
            "input": inputs,
        });
        self.retry.run(SERVICE, || {
            let response = self
                .http
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(&payload)
                .send()
                .map_err(|e| RagError::TransientService {
                    service: SERVICE,
                    attempts: 1,
                    message: e.to_string(),
                })?;
            let status = response.status();
            if !status.is_success() {
                let body = response.text().unwrap_or_default();
                return Err(status_error(SERVICE, status.as_u16(), body));
            }
            let parsed: OpenAiEmbeddingResponse = response
                .json()
                .map_err(|e| RagError::Other(format!("invalid embeddings response: {e}")))?;
            let mut data = parsed.data;
            data.sort_by_key(|d| d.index);
            Ok(data.into_iter().map(|d| d.embedding).collect())
        })
    }
}

#[derive(Deserialize)]
struct OpenAiEmbeddingResponse {
    data: Vec<OpenAiEmbeddingData>,
}

#[derive(Deserialize)]
struct OpenAiEmbeddingData {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}
