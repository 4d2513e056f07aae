//! Shared plumbing for the `machina-*` binaries: logging setup, config
//! loading and command-line overrides.

use std::env;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Args;
use machina_core::config::{resolve_with_base, Config, RagSettings};
use machina_embed::get_default_embedder;
use machina_rag::IndexBuilder;
use tracing_subscriber::EnvFilter;

/// Log to stderr, filtered by `RUST_LOG` (default `info`).
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).try_init();
}

#[derive(Debug, Clone, Args)]
pub struct CommonArgs {
    /// Config file; defaults to config.toml + config.<RUST_ENV>.toml in the working directory
    #[arg(long, env = "MACHINA_CONFIG")]
    pub config: Option<PathBuf>,

    /// Index store directory, overrides rag.store_path
    #[arg(long)]
    pub store: Option<PathBuf>,
}

/// Load `[rag]` settings, anchor relative paths and apply `--store`.
///
/// Paths from a config file are relative to that file; paths from the
/// command line and the default layers are relative to the working directory.
pub fn load_settings(common: &CommonArgs) -> anyhow::Result<RagSettings> {
    let cwd = env::current_dir().context("cannot determine working directory")?;
    let (config, base) = match &common.config {
        Some(path) => {
            let config = Config::load_file(path).with_context(|| format!("loading {}", path.display()))?;
            let base = path.parent().map(|p| resolve_with_base(&cwd, p.to_string_lossy())).unwrap_or_else(|| cwd.clone());
            (config, base)
        }
        None => (Config::load().context("loading configuration")?, cwd.clone()),
    };
    let mut settings = config.rag()?.resolve_paths(&base);
    if let Some(store) = &common.store {
        settings.store_path = cli_path(&cwd, store);
    }
    Ok(settings)
}

pub fn cli_path(cwd: &Path, path: &Path) -> PathBuf {
    resolve_with_base(cwd, path.to_string_lossy())
}

/// Builder wired to the configured embedder. Must be called outside the async
/// runtime: the HTTP embedder owns a blocking client.
pub fn index_builder(settings: &RagSettings, progress: bool) -> anyhow::Result<IndexBuilder> {
    let embedder = get_default_embedder(&settings.embedding).context("initialising embedder")?;
    let builder = IndexBuilder::from_settings(settings, embedder)?.with_progress(progress);
    Ok(builder)
}
