//! machina-core
//!
//! Shared building blocks of the document-grounding pipeline: domain types,
//! the error taxonomy, configuration, the sentence-aware chunker, source
//! discovery and the embedder/extractor seams.

pub mod chunker;
pub mod config;
pub mod error;
pub mod sources;
pub mod traits;
pub mod types;

pub use chunker::{chunk, Chunker, ChunkingConfig, Chunks};
pub use error::{Error, Result};
pub use sources::{PlainTextExtractor, SourceDocument, SourceScanner};
pub use traits::{Embedder, TextExtractor};
pub use types::{Chunk, IndexStats, Metadata, Ordinal, RetrievalResult};
