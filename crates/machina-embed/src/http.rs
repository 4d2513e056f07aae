use std::time::Duration;

use machina_core::error::{Error, Result};
use machina_core::traits::Embedder;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Client for an Ollama-compatible `POST /api/embed` endpoint.
///
/// Uses a blocking client: call it from a worker thread, never directly from
/// an async task.
pub struct HttpEmbedder {
    endpoint: String,
    model: String,
    dim: usize,
    id: String,
    client: Client,
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
    truncate: bool,
}

#[derive(Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

impl HttpEmbedder {
    pub fn new(endpoint: &str, model: &str, dim: usize) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| Error::EmbeddingUnavailable(format!("failed to create HTTP client: {}", e)))?;
        Ok(Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            model: model.to_string(),
            dim,
            id: format!("http:{}:d{}", model, dim),
            client,
        })
    }
}

impl Embedder for HttpEmbedder {
    fn embedder_id(&self) -> &str {
        &self.id
    }

    fn dim(&self) -> usize {
        self.dim
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        debug!(count = texts.len(), model = %self.model, "requesting embeddings");
        let request = EmbedRequest { model: &self.model, input: texts, truncate: true };
        let response = self
            .client
            .post(format!("{}/api/embed", self.endpoint))
            .json(&request)
            .send()
            .map_err(|e| {
                if e.is_connect() {
                    Error::EmbeddingUnavailable(format!("cannot connect to embedding server at {}", self.endpoint))
                } else {
                    Error::EmbeddingUnavailable(format!("embedding request failed: {}", e))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(Error::EmbeddingUnavailable(format!("embedding server returned {}: {}", status, body)));
        }

        let parsed: EmbedResponse = response
            .json()
            .map_err(|e| Error::EmbeddingUnavailable(format!("malformed embedding response: {}", e)))?;
        if parsed.embeddings.len() != texts.len() {
            return Err(Error::EmbeddingUnavailable(format!(
                "embedding server returned {} vectors for {} inputs",
                parsed.embeddings.len(),
                texts.len()
            )));
        }
        if let Some(bad) = parsed.embeddings.iter().find(|v| v.len() != self.dim) {
            return Err(Error::DimensionMismatch { expected: self.dim, actual: bad.len() });
        }
        Ok(parsed.embeddings)
    }
}
