//! Lightweight configuration loader and path helpers.
//!
//! Uses Figment to merge built-in defaults + `config.toml` + `config.<env>.toml`
//! + `APP_*` env vars (`__` separates nesting, e.g. `APP_RAG__CHUNK_SIZE`).
//! Provides helpers to expand `~` and `${VAR}` and to resolve relative paths
//! against a known base directory.

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};

use crate::chunker::ChunkingConfig;
use crate::error::{Error, Result};

pub struct Config {
    figment: Figment,
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let env_name = env::var("RUST_ENV").unwrap_or_else(|_| "dev".to_string());

        let mut figment = Self::defaults().merge(Toml::file("config.toml"));
        match env_name.as_str() {
            "dev" | "development" => figment = figment.merge(Toml::file("config.dev.toml")),
            "prod" | "production" => figment = figment.merge(Toml::file("config.prod.toml")),
            "test" | "testing" => figment = figment.merge(Toml::file("config.test.toml")),
            _ => {}
        }
        figment = figment.merge(Env::prefixed("APP_").split("__"));

        Ok(Self { figment })
    }

    /// Load a single explicit config file on top of the defaults, then env vars.
    pub fn load_file(path: &Path) -> anyhow::Result<Self> {
        if !path.is_file() {
            anyhow::bail!("config file not found: {}", path.display());
        }
        let figment = Self::defaults().merge(Toml::file(path)).merge(Env::prefixed("APP_").split("__"));
        Ok(Self { figment })
    }

    pub fn from_toml_str(toml: &str) -> Self {
        Self { figment: Self::defaults().merge(Toml::string(toml)) }
    }

    fn defaults() -> Figment {
        Figment::from(Serialized::default("rag", RagSettings::default()))
    }

    pub fn get<T>(&self, key: &str) -> anyhow::Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        self.figment
            .extract_inner(key)
            .map_err(|e| anyhow::anyhow!("Failed to get '{}': {}", key, e))
    }

    /// Extract and validate the `[rag]` table.
    pub fn rag(&self) -> anyhow::Result<RagSettings> {
        let settings: RagSettings = self.get("rag")?;
        settings.validate()?;
        Ok(settings)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RagSettings {
    pub store_path: PathBuf,
    pub source_dir: PathBuf,
    pub file_patterns: Vec<String>,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub batch_size: usize,
    pub top_k: usize,
    pub score_threshold: Option<f32>,
    pub embedding: EmbeddingSettings,
}

impl Default for RagSettings {
    fn default() -> Self {
        Self {
            store_path: PathBuf::from("vector_store"),
            source_dir: PathBuf::from("docs"),
            file_patterns: vec!["*.txt".to_string(), "*.md".to_string()],
            chunk_size: 500,
            chunk_overlap: 50,
            batch_size: 32,
            top_k: 5,
            score_threshold: None,
            embedding: EmbeddingSettings::default(),
        }
    }
}

impl RagSettings {
    pub fn chunking(&self) -> ChunkingConfig {
        ChunkingConfig { chunk_size: self.chunk_size, overlap: self.chunk_overlap }
    }

    pub fn validate(&self) -> Result<()> {
        self.chunking().validate()?;
        if self.file_patterns.is_empty() {
            return Err(Error::InvalidConfig("rag.file_patterns must not be empty".to_string()));
        }
        if self.batch_size == 0 {
            return Err(Error::InvalidConfig("rag.batch_size must be greater than zero".to_string()));
        }
        if self.embedding.dimension == 0 {
            return Err(Error::InvalidConfig("rag.embedding.dimension must be greater than zero".to_string()));
        }
        if let Some(t) = self.score_threshold {
            if !(0.0..=1.0).contains(&t) {
                return Err(Error::InvalidConfig(format!("rag.score_threshold {} is outside [0, 1]", t)));
            }
        }
        Ok(())
    }

    /// Expand and anchor `store_path` and `source_dir` against `base`.
    pub fn resolve_paths(mut self, base: &Path) -> Self {
        self.store_path = resolve_with_base(base, self.store_path.to_string_lossy());
        self.source_dir = resolve_with_base(base, self.source_dir.to_string_lossy());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingSettings {
    /// `hash` (deterministic, offline) or `http` (Ollama-compatible server).
    pub provider: String,
    pub model: String,
    pub dimension: usize,
    pub endpoint: Option<String>,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            provider: "hash".to_string(),
            model: "all-MiniLM-L6-v2".to_string(),
            dimension: 384,
            endpoint: None,
        }
    }
}

/// Expand a user-provided path string:
/// - Expands leading '~' to the user's home directory
/// - Expands ${VAR} and $VAR environment variables
/// - Returns a PathBuf without attempting to canonicalize
pub fn expand_path<S: AsRef<str>>(input: S) -> PathBuf {
    let s = input.as_ref();
    let expanded_env = shellexpand::env(s).unwrap_or(std::borrow::Cow::Borrowed(s));
    let expanded = shellexpand::tilde(&expanded_env);
    PathBuf::from(expanded.as_ref())
}

/// Resolve a possibly relative path against a given base directory after expansion.
/// If `p` is absolute, it's returned as-is; otherwise `base.join(p)` is returned.
pub fn resolve_with_base<S: AsRef<str>>(base: &Path, p: S) -> PathBuf {
    let p = expand_path(p);
    if p.is_absolute() { p } else { base.join(p) }
}
