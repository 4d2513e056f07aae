//! machina-embed
//!
//! Embedding backends behind `machina_core::traits::Embedder`:
//! a deterministic token-hash embedder for offline use and tests, a lookup
//! table for fixtures, and an HTTP client for an Ollama-compatible server.

use std::sync::Arc;

use machina_core::config::EmbeddingSettings;
use machina_core::error::{Error, Result};
use machina_core::traits::Embedder;
use tracing::info;

pub mod hash;
pub mod http;
pub mod lookup;

pub use hash::HashEmbedder;
pub use http::HttpEmbedder;
pub use lookup::LookupEmbedder;

pub const DEFAULT_OLLAMA_ENDPOINT: &str = "http://localhost:11434";

/// Build the embedder selected by `settings`.
///
/// `APP_USE_FAKE_EMBEDDINGS=1` forces the hash embedder regardless of the
/// configured provider.
pub fn get_default_embedder(settings: &EmbeddingSettings) -> Result<Arc<dyn Embedder>> {
    let use_fake = std::env::var("APP_USE_FAKE_EMBEDDINGS").ok().map(|v| v == "1" || v.eq_ignore_ascii_case("true")).unwrap_or(false);
    if use_fake || settings.provider == "hash" {
        info!(dim = settings.dimension, "using hash embedder");
        return Ok(Arc::new(HashEmbedder::new(settings.dimension)));
    }
    match settings.provider.as_str() {
        "http" | "ollama" => {
            let endpoint = settings.endpoint.as_deref().unwrap_or(DEFAULT_OLLAMA_ENDPOINT);
            info!(endpoint, model = %settings.model, "using http embedder");
            Ok(Arc::new(HttpEmbedder::new(endpoint, &settings.model, settings.dimension)?))
        }
        other => Err(Error::InvalidConfig(format!("unknown embedding provider '{}'", other))),
    }
}

/// Scale `v` to unit length; the zero vector is left untouched.
pub(crate) fn l2_normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 1e-6 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}
