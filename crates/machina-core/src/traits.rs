use std::path::Path;

use crate::error::{Error, Result};

/// Maps text to fixed-length vectors.
///
/// Implementations are synchronous and may be slow; callers on an async
/// runtime should drive them from a blocking worker.
pub trait Embedder: Send + Sync {
    /// Stable identifier of the model (e.g. `hash:xxh64:d384`). Persisted with
    /// the index so a changed model can be detected at build time.
    fn embedder_id(&self) -> &str;
    fn dim(&self) -> usize;
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_batch(&[text.to_string()])?
            .pop()
            .ok_or_else(|| Error::EmbeddingUnavailable("embedder returned no vector for query".to_string()))
    }
}

/// Turns a source file into raw text. PDF and other binary formats plug in here.
pub trait TextExtractor: Send + Sync {
    fn extract(&self, path: &Path) -> Result<String>;
}
