//! Source corpus discovery: walk a directory, keep files whose name matches
//! one of the configured globs, and extract their text.

use ignore::overrides::{Override, OverrideBuilder};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::traits::TextExtractor;

/// Raw text of one source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDocument {
    /// Path relative to the scanned root, `/`-separated.
    pub source_id: String,
    pub path: PathBuf,
    pub text: String,
}

impl SourceDocument {
    pub fn new(source_id: impl Into<String>, text: impl Into<String>) -> Self {
        let source_id = source_id.into();
        Self { path: PathBuf::from(&source_id), source_id, text: text.into() }
    }
}

/// Reads files as UTF-8, falling back to a lossy decode for invalid bytes.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainTextExtractor;

impl TextExtractor for PlainTextExtractor {
    fn extract(&self, path: &Path) -> Result<String> {
        match fs::read_to_string(path) {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
                let bytes = fs::read(path).map_err(|e| Error::io(path, e))?;
                Ok(String::from_utf8_lossy(&bytes).into_owned())
            }
            Err(e) => Err(Error::io(path, e)),
        }
    }
}

pub struct SourceScanner {
    root: PathBuf,
    filter: Override,
}

impl SourceScanner {
    pub fn new(root: &Path, patterns: &[String]) -> Result<Self> {
        if !root.is_dir() {
            return Err(Error::NotFound(format!("source directory {}", root.display())));
        }
        if patterns.is_empty() {
            return Err(Error::InvalidConfig("at least one file pattern is required".to_string()));
        }
        let mut builder = OverrideBuilder::new(root);
        for pattern in patterns {
            builder
                .add(pattern)
                .map_err(|e| Error::InvalidConfig(format!("bad file pattern '{}': {}", pattern, e)))?;
        }
        let filter = builder
            .build()
            .map_err(|e| Error::InvalidConfig(format!("bad file patterns: {}", e)))?;
        Ok(Self { root: root.to_path_buf(), filter })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Matching files under the root, recursively, in sorted order.
    pub fn list_files(&self) -> Vec<PathBuf> {
        let mut files = Vec::new();
        for entry in walkdir::WalkDir::new(&self.root).into_iter().filter_map(|e| e.ok()).filter(|e| e.file_type().is_file()) {
            let relative = entry.path().strip_prefix(&self.root).unwrap_or(entry.path());
            if self.filter.matched(relative, false).is_whitelist() {
                files.push(entry.path().to_path_buf());
            }
        }
        files.sort();
        files
    }

    /// Extract every matching file. Unreadable files are skipped with a warning,
    /// whitespace-only documents are skipped silently.
    pub fn read_all(&self, extractor: &dyn TextExtractor) -> Vec<SourceDocument> {
        let mut docs = Vec::new();
        for path in self.list_files() {
            let text = match extractor.extract(&path) {
                Ok(text) => text,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping unreadable source file");
                    continue;
                }
            };
            if text.trim().is_empty() {
                debug!(path = %path.display(), "skipping empty source file");
                continue;
            }
            docs.push(SourceDocument { source_id: self.source_id(&path), path, text });
        }
        docs
    }

    fn source_id(&self, path: &Path) -> String {
        let relative = path.strip_prefix(&self.root).unwrap_or(path);
        relative.to_string_lossy().replace('\\', "/")
    }
}
