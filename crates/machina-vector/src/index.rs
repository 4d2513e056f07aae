//! The ordinally-aligned triple: vectors, chunk texts and metadata.
//!
//! Position `i` of each array describes the same chunk. Every mutation checks
//! the whole batch before touching any array, so the three lengths can never
//! drift apart.

use std::collections::BTreeSet;
use std::ops::Range;

use machina_core::error::{Error, Result};
use machina_core::types::{IndexStats, Metadata, Ordinal};

use crate::flat::{FlatL2Index, Neighbor};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct KnowledgeIndex {
    vectors: FlatL2Index,
    texts: Vec<String>,
    metadata: Vec<Metadata>,
    embedder_id: Option<String>,
}

/// Borrowed view of one aligned entry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IndexEntry<'a> {
    pub ordinal: Ordinal,
    pub vector: &'a [f32],
    pub text: &'a str,
    pub metadata: &'a Metadata,
}

impl KnowledgeIndex {
    pub fn new(dim: usize) -> Self {
        Self { vectors: FlatL2Index::new(dim), ..Self::default() }
    }

    pub fn with_embedder(mut self, embedder_id: impl Into<String>) -> Self {
        self.embedder_id = Some(embedder_id.into());
        self
    }

    /// Reassemble from persisted parts, refusing any length disagreement.
    pub fn from_parts(
        vectors: FlatL2Index,
        texts: Vec<String>,
        metadata: Vec<Metadata>,
        embedder_id: Option<String>,
    ) -> Result<Self> {
        if vectors.len() != texts.len() || texts.len() != metadata.len() {
            return Err(Error::Misaligned { vectors: vectors.len(), texts: texts.len(), metadata: metadata.len() });
        }
        Ok(Self { vectors, texts, metadata, embedder_id })
    }

    pub fn len(&self) -> usize {
        self.texts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.texts.is_empty()
    }

    pub fn dim(&self) -> Option<usize> {
        self.vectors.dim()
    }

    pub fn embedder_id(&self) -> Option<&str> {
        self.embedder_id.as_deref()
    }

    pub fn vectors(&self) -> &FlatL2Index {
        &self.vectors
    }

    pub fn texts(&self) -> &[String] {
        &self.texts
    }

    pub fn metadata(&self) -> &[Metadata] {
        &self.metadata
    }

    /// Append a batch of entries. Texts are flattened to a single line so the
    /// in-memory and persisted forms are identical.
    pub fn append(&mut self, vectors: &[Vec<f32>], texts: Vec<String>, metadata: Vec<Metadata>) -> Result<Range<Ordinal>> {
        if vectors.len() != texts.len() || texts.len() != metadata.len() {
            return Err(Error::Misaligned { vectors: vectors.len(), texts: texts.len(), metadata: metadata.len() });
        }
        // add() is all-or-nothing, so a rejection leaves texts/metadata untouched too
        let range = self.vectors.add(vectors)?;
        self.texts.extend(texts.iter().map(|t| flatten_line(t)));
        self.metadata.extend(metadata);
        debug_assert_eq!(self.vectors.len(), self.texts.len());
        Ok(range)
    }

    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>> {
        self.vectors.search(query, k)
    }

    pub fn entry(&self, ordinal: Ordinal) -> Option<IndexEntry<'_>> {
        Some(IndexEntry {
            ordinal,
            vector: self.vectors.vector(ordinal)?,
            text: self.texts.get(ordinal)?,
            metadata: self.metadata.get(ordinal)?,
        })
    }

    pub fn entries(&self) -> impl Iterator<Item = IndexEntry<'_>> + '_ {
        (0..self.len()).filter_map(move |i| self.entry(i))
    }

    pub fn stats(&self) -> IndexStats {
        let sources: BTreeSet<&str> = self.metadata.iter().map(|m| m.source.as_str()).collect();
        IndexStats {
            total_chunks: self.len(),
            sources: sources.len(),
            dimension: self.dim(),
            embedder_id: self.embedder_id.clone(),
        }
    }
}

/// Collapse every line break into a space; the text store is one chunk per line.
pub fn flatten_line(text: &str) -> String {
    text.replace("\r\n", " ").replace(['\r', '\n'], " ")
}
