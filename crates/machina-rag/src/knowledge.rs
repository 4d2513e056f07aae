//! Async facade over one live index: many concurrent readers, one builder.
//!
//! Builds hold the write lock for their whole duration so readers never see a
//! half-built index. Embedding and disk work run on the blocking pool.

use std::path::PathBuf;
use std::sync::Arc;

use machina_core::error::{Error, Result};
use machina_core::sources::SourceDocument;
use machina_core::types::{IndexStats, RetrievalResult};
use machina_vector::KnowledgeIndex;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::builder::{BuildReport, IndexBuilder};
use crate::retriever::Retriever;

#[derive(Clone)]
pub struct KnowledgeBase {
    builder: Arc<IndexBuilder>,
    index: Arc<RwLock<KnowledgeIndex>>,
    score_threshold: Option<f32>,
}

impl KnowledgeBase {
    /// Start with an empty index; nothing is read from disk.
    pub fn new(builder: IndexBuilder) -> Self {
        Self { builder: Arc::new(builder), index: Arc::new(RwLock::new(KnowledgeIndex::default())), score_threshold: None }
    }

    /// Load the persisted index, or start empty on a cold start.
    pub async fn open(builder: IndexBuilder) -> Result<Self> {
        let kb = Self::new(builder);
        let builder = kb.builder.clone();
        let index = blocking(move || builder.store().load()).await?;
        info!(chunks = index.len(), "knowledge base opened");
        *kb.index.write().await = index;
        Ok(kb)
    }

    pub fn with_score_threshold(mut self, threshold: Option<f32>) -> Self {
        self.score_threshold = threshold;
        self
    }

    pub fn builder(&self) -> &IndexBuilder {
        &self.builder
    }

    /// Build (or reuse) the index for `source_dir` and make it live. On
    /// failure the previous index keeps serving.
    ///
    /// Building, persisting and swapping run as one task that owns the write
    /// lock, so dropping the returned future never leaves the store ahead of
    /// the served index.
    pub async fn build(&self, source_dir: PathBuf, patterns: Vec<String>, force: bool) -> Result<BuildReport> {
        let mut guard = self.index.clone().write_owned().await;
        let builder = self.builder.clone();
        join(tokio::spawn(async move {
            match blocking(move || builder.build(&source_dir, &patterns, force)).await {
                Ok(output) => {
                    *guard = output.index;
                    Ok(output.report)
                }
                Err(e) => {
                    warn!(error = %e, chunks = guard.len(), "build failed; keeping previous index");
                    Err(e)
                }
            }
        }))
        .await
    }

    /// Run `build` in the background.
    pub fn spawn_build(&self, source_dir: PathBuf, patterns: Vec<String>, force: bool) -> JoinHandle<Result<BuildReport>> {
        let kb = self.clone();
        tokio::spawn(async move { kb.build(source_dir, patterns, force).await })
    }

    pub async fn retrieve(&self, query: &str, top_k: usize) -> Result<Vec<RetrievalResult>> {
        let guard = self.index.read().await;
        if guard.is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }
        let embedder = self.builder.embedder().clone();
        let query = query.to_string();
        let query_vector = blocking(move || embedder.embed_query(&query)).await?;
        Retriever::new(&guard, self.builder.embedder().as_ref())
            .with_score_threshold(self.score_threshold)
            .rank(&query_vector, top_k)
    }

    pub async fn stats(&self) -> IndexStats {
        self.index.read().await.stats()
    }

    /// Embed extra documents into the live index and persist it. Returns the
    /// number of chunks added.
    ///
    /// A handle that has not loaded anything yet appends to the persisted
    /// index, never to its own empty placeholder.
    pub async fn add_documents(&self, documents: Vec<SourceDocument>) -> Result<usize> {
        let mut guard = self.index.clone().write_owned().await;
        let current = (*guard).clone();
        let builder = self.builder.clone();
        join(tokio::spawn(async move {
            let (next, before) = blocking(move || {
                let base = if current.is_empty() && current.embedder_id().is_none() {
                    builder.store().load()?
                } else {
                    current
                };
                let before = base.len();
                Ok((builder.extend(&base, &documents)?, before))
            })
            .await?;
            let added = next.len() - before;
            *guard = next;
            Ok(added)
        }))
        .await
    }
}

async fn join<T>(task: JoinHandle<Result<T>>) -> Result<T> {
    task.await.map_err(|e| Error::Operation(format!("task failed: {}", e)))?
}

async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::Operation(format!("blocking task failed: {}", e)))?
}
