use std::collections::HashMap;

use machina_core::error::{Error, Result};
use machina_core::traits::Embedder;

/// Fixed text → vector table. Unknown text is reported as an unavailable
/// embedding, which makes failure paths easy to provoke in tests.
#[derive(Debug, Clone)]
pub struct LookupEmbedder {
    dim: usize,
    id: String,
    table: HashMap<String, Vec<f32>>,
}

impl LookupEmbedder {
    pub fn new(dim: usize) -> Self {
        Self { dim, id: format!("lookup:d{}", dim), table: HashMap::new() }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn insert(mut self, text: impl Into<String>, vector: Vec<f32>) -> Self {
        self.table.insert(text.into(), vector);
        self
    }
}

impl Embedder for LookupEmbedder {
    fn embedder_id(&self) -> &str {
        &self.id
    }

    fn dim(&self) -> usize {
        self.dim
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        texts
            .iter()
            .map(|t| {
                self.table
                    .get(t)
                    .cloned()
                    .ok_or_else(|| Error::EmbeddingUnavailable(format!("no vector for {:?}", t)))
            })
            .collect()
    }
}
