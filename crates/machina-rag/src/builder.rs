//! Turns a directory of documents into a persisted `KnowledgeIndex`.
//!
//! A persisted index is reused unless a rebuild is forced, the store is
//! corrupt, or it was produced by a different embedder.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use indicatif::{ProgressBar, ProgressStyle};
use machina_core::chunker::{Chunker, ChunkingConfig};
use machina_core::config::RagSettings;
use machina_core::error::{Error, Result};
use machina_core::sources::{PlainTextExtractor, SourceDocument, SourceScanner};
use machina_core::traits::{Embedder, TextExtractor};
use machina_core::types::{Chunk, Metadata, Ordinal};
use machina_vector::{IndexStore, KnowledgeIndex};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebuildReason {
    Forced,
    ColdStart,
    Corrupt,
    EmbedderChanged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildOrigin {
    Reused,
    Rebuilt { reason: RebuildReason },
}

#[derive(Debug, Clone, PartialEq)]
pub struct BuildReport {
    pub origin: BuildOrigin,
    pub files: usize,
    pub chunks: usize,
    pub elapsed: Duration,
}

impl fmt::Display for BuildReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.origin {
            BuildOrigin::Reused => write!(f, "reused persisted index ({} chunks)", self.chunks)?,
            BuildOrigin::Rebuilt { reason } => {
                write!(f, "rebuilt index ({:?}): {} files, {} chunks", reason, self.files, self.chunks)?;
            }
        }
        write!(f, " in {:.2?}", self.elapsed)
    }
}

#[derive(Debug, Clone)]
pub struct BuildOutput {
    pub index: KnowledgeIndex,
    pub report: BuildReport,
}

pub struct IndexBuilder {
    store: IndexStore,
    embedder: Arc<dyn Embedder>,
    extractor: Arc<dyn TextExtractor>,
    chunker: Chunker,
    batch_size: usize,
    progress: bool,
}

impl IndexBuilder {
    pub fn new(store_path: impl Into<PathBuf>, embedder: Arc<dyn Embedder>, chunking: ChunkingConfig) -> Result<Self> {
        Ok(Self {
            store: IndexStore::new(store_path),
            embedder,
            extractor: Arc::new(PlainTextExtractor),
            chunker: Chunker::from_config(chunking)?,
            batch_size: 32,
            progress: false,
        })
    }

    pub fn from_settings(settings: &RagSettings, embedder: Arc<dyn Embedder>) -> Result<Self> {
        settings.validate()?;
        Ok(Self::new(&settings.store_path, embedder, settings.chunking())?.with_batch_size(settings.batch_size))
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn TextExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    /// Texts per embedder call; zero is treated as one.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }

    pub fn store(&self) -> &IndexStore {
        &self.store
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    /// Produce the index for `source_dir`, reusing the persisted one when allowed.
    pub fn build(&self, source_dir: &Path, patterns: &[String], force: bool) -> Result<BuildOutput> {
        let started = Instant::now();
        let reason = if force {
            RebuildReason::Forced
        } else {
            match self.try_reuse() {
                Ok(index) => {
                    info!(chunks = index.len(), "reusing persisted index");
                    let report = BuildReport {
                        origin: BuildOrigin::Reused,
                        files: 0,
                        chunks: index.len(),
                        elapsed: started.elapsed(),
                    };
                    return Ok(BuildOutput { index, report });
                }
                Err(Reuse::Rebuild(reason)) => reason,
                Err(Reuse::Failed(e)) => return Err(e),
            }
        };

        // Sources are resolved before anything on disk is touched.
        let scanner = SourceScanner::new(source_dir, patterns)?;
        if reason == RebuildReason::Corrupt {
            self.store.discard()?;
        }
        info!(source = %source_dir.display(), ?reason, "rebuilding index");

        let documents = scanner.read_all(self.extractor.as_ref());
        let mut index = self.empty_index();
        let chunks = self.append_documents(&mut index, &documents)?;
        self.store.save(&index)?;

        let report = BuildReport {
            origin: BuildOrigin::Rebuilt { reason },
            files: documents.len(),
            chunks,
            elapsed: started.elapsed(),
        };
        info!(files = report.files, chunks = report.chunks, elapsed = ?report.elapsed, "index built");
        Ok(BuildOutput { index, report })
    }

    /// Chunk and embed `documents`, append them to a copy of `index` and
    /// persist the copy. Ordinals continue from `index.len()`.
    pub fn extend(&self, index: &KnowledgeIndex, documents: &[SourceDocument]) -> Result<KnowledgeIndex> {
        let mut next = if index.is_empty() && index.embedder_id().is_none() {
            self.empty_index()
        } else {
            if let Some(id) = index.embedder_id() {
                if id != self.embedder.embedder_id() {
                    return Err(Error::InvalidConfig(format!(
                        "index was built with embedder '{}', not '{}'",
                        id,
                        self.embedder.embedder_id()
                    )));
                }
            }
            index.clone()
        };
        let added = self.append_documents(&mut next, documents)?;
        self.store.save(&next)?;
        info!(documents = documents.len(), chunks = added, total = next.len(), "extended index");
        Ok(next)
    }

    /// Split documents into chunks with corpus ordinals starting at `first`,
    /// paired with the metadata the index stores for each.
    pub fn chunk_documents(&self, documents: &[SourceDocument], first: Ordinal) -> (Vec<Chunk>, Vec<Metadata>) {
        let mut chunks = Vec::new();
        let mut metadata = Vec::new();
        for doc in documents {
            let passages: Vec<&str> = self.chunker.chunks(&doc.text).collect();
            let total = passages.len();
            debug!(source = %doc.source_id, chunks = total, "chunked document");
            for (i, passage) in passages.into_iter().enumerate() {
                let ordinal = first + chunks.len();
                chunks.push(Chunk { text: passage.to_string(), source_id: doc.source_id.clone(), ordinal });
                metadata.push(Metadata::new(&doc.source_id).with("chunk", i).with("chunks", total));
            }
        }
        (chunks, metadata)
    }

    fn empty_index(&self) -> KnowledgeIndex {
        KnowledgeIndex::new(self.embedder.dim()).with_embedder(self.embedder.embedder_id())
    }

    fn try_reuse(&self) -> std::result::Result<KnowledgeIndex, Reuse> {
        let manifest = match self.store.manifest() {
            Ok(Some(manifest)) => manifest,
            Ok(None) => return Err(Reuse::Rebuild(RebuildReason::ColdStart)),
            Err(e) => return Err(self.on_load_error(e)),
        };
        let expected_id = self.embedder.embedder_id();
        if manifest.embedder_id.as_deref() != Some(expected_id)
            || manifest.dimension.is_some_and(|d| d != self.embedder.dim())
        {
            info!(
                stored = ?manifest.embedder_id,
                current = expected_id,
                "persisted index was built by a different embedder"
            );
            return Err(Reuse::Rebuild(RebuildReason::EmbedderChanged));
        }
        self.store.load().map_err(|e| self.on_load_error(e))
    }

    fn on_load_error(&self, e: Error) -> Reuse {
        if e.is_corrupt() {
            warn!(store = %self.store.root().display(), error = %e, "persisted index is corrupt; rebuilding");
            Reuse::Rebuild(RebuildReason::Corrupt)
        } else {
            Reuse::Failed(e)
        }
    }

    /// Embed every chunk of `documents` and append them in one all-or-nothing step.
    fn append_documents(&self, index: &mut KnowledgeIndex, documents: &[SourceDocument]) -> Result<usize> {
        let (chunks, metadata) = self.chunk_documents(documents, index.len());
        if chunks.is_empty() {
            return Ok(0);
        }
        let texts: Vec<String> = chunks.into_iter().map(|c| c.text).collect();
        let vectors = self.embed_all(&texts)?;
        index.append(&vectors, texts, metadata)?;
        Ok(vectors.len())
    }

    fn embed_all(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let pb = if self.progress { ProgressBar::new(texts.len() as u64) } else { ProgressBar::hidden() };
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} chunks ({percent}%) {msg}")
        {
            pb.set_style(style.progress_chars("#>-"));
        }

        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            let embedded = self.embedder.embed_batch(batch)?;
            if embedded.len() != batch.len() {
                pb.abandon();
                return Err(Error::EmbeddingUnavailable(format!(
                    "embedder returned {} vectors for {} texts",
                    embedded.len(),
                    batch.len()
                )));
            }
            vectors.extend(embedded);
            pb.inc(batch.len() as u64);
        }
        pb.finish_with_message("embedded");
        Ok(vectors)
    }
}

enum Reuse {
    Rebuild(RebuildReason),
    Failed(Error),
}
