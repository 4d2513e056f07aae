//! Domain types shared by the chunker, the vector index and the retriever.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Position of an entry in the corpus-wide parallel arrays.
pub type Ordinal = usize;

/// A bounded passage of a source document, ready to be embedded.
///
/// - `text`: the passage itself
/// - `source_id`: the document it came from (relative path for files)
/// - `ordinal`: position in the overall corpus array, not within `source_id`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub text: String,
    pub source_id: String,
    pub ordinal: Ordinal,
}

/// Opaque per-chunk data carried through retrieval untouched.
///
/// Serializes as a flat JSON object: `{"source": "...", "<key>": "<value>", ...}`.
/// `source` is never stored among the extra keys, so the object has no
/// duplicate fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    pub source: String,
    #[serde(flatten)]
    extra: BTreeMap<String, String>,
}

impl Metadata {
    pub fn new(source: impl Into<String>) -> Self {
        Self { source: source.into(), extra: BTreeMap::new() }
    }

    /// Set `key`; setting `source` replaces the source itself.
    pub fn with(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        let key = key.into();
        if key == "source" {
            self.source = value.to_string();
        } else {
            self.extra.insert(key, value.to_string());
        }
        self
    }

    /// Extra keys in sorted order, `source` excluded.
    pub fn extras(&self) -> impl Iterator<Item = (&str, &str)> + '_ {
        self.extra.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        if key == "source" {
            return Some(&self.source);
        }
        self.extra.get(key).map(String::as_str)
    }
}

/// One ranked passage produced for a query. Never persisted.
///
/// `score` lies in `(0, 1]`; an exact vector match scores `1.0`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievalResult {
    pub text: String,
    pub score: f32,
    pub metadata: Metadata,
}

/// Summary of an index, as reported to operators.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexStats {
    pub total_chunks: usize,
    pub sources: usize,
    pub dimension: Option<usize>,
    pub embedder_id: Option<String>,
}
