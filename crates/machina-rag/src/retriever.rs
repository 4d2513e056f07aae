use machina_core::error::{Error, Result};
use machina_core::traits::Embedder;
use machina_core::types::RetrievalResult;
use machina_vector::KnowledgeIndex;
use tracing::debug;

/// Map a squared-L2 distance onto `(0, 1]`; identical vectors score `1.0`.
pub fn distance_to_score(distance: f32) -> f32 {
    1.0 / (1.0 + distance)
}

/// Ranks passages of one index against free-text queries.
pub struct Retriever<'a> {
    index: &'a KnowledgeIndex,
    embedder: &'a dyn Embedder,
    score_threshold: Option<f32>,
}

impl<'a> Retriever<'a> {
    pub fn new(index: &'a KnowledgeIndex, embedder: &'a dyn Embedder) -> Self {
        Self { index, embedder, score_threshold: None }
    }

    /// Drop results scoring below `threshold`. Order is unaffected.
    pub fn with_score_threshold(mut self, threshold: Option<f32>) -> Self {
        self.score_threshold = threshold;
        self
    }

    pub fn retrieve(&self, query: &str, top_k: usize) -> Result<Vec<RetrievalResult>> {
        if self.index.is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }
        let query_vector = self.embedder.embed_query(query)?;
        self.rank(&query_vector, top_k)
    }

    /// Rank against an already embedded query.
    pub fn rank(&self, query_vector: &[f32], top_k: usize) -> Result<Vec<RetrievalResult>> {
        let neighbors = self.index.search(query_vector, top_k)?;
        let mut results = Vec::with_capacity(neighbors.len());
        for neighbor in neighbors {
            let entry = self.index.entry(neighbor.ordinal).ok_or_else(|| Error::Misaligned {
                vectors: self.index.vectors().len(),
                texts: self.index.texts().len(),
                metadata: self.index.metadata().len(),
            })?;
            let score = distance_to_score(neighbor.distance);
            if self.score_threshold.is_some_and(|t| score < t) {
                continue;
            }
            results.push(RetrievalResult { text: entry.text.to_string(), score, metadata: entry.metadata.clone() });
        }
        debug!(hits = results.len(), top_k, "ranked query");
        Ok(results)
    }
}
