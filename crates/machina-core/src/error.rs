use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Dimension mismatch: index expects {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Invalid vector: {0}")]
    InvalidVector(String),

    #[error("Misaligned batch: {vectors} vectors, {texts} texts, {metadata} metadata entries")]
    Misaligned { vectors: usize, texts: usize, metadata: usize },

    #[error("Corrupt index at {}: {reason}", .path.display())]
    CorruptIndex { path: PathBuf, reason: String },

    #[error("Embedding unavailable: {0}")]
    EmbeddingUnavailable(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("I/O error at {}: {source}", .path.display())]
    Io { path: PathBuf, source: std::io::Error },

    #[error("Operation failed: {0}")]
    Operation(String),
}

impl Error {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io { path: path.into(), source }
    }

    pub fn corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::CorruptIndex { path: path.into(), reason: reason.into() }
    }

    pub fn is_corrupt(&self) -> bool {
        matches!(self, Self::CorruptIndex { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;
