use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use machina_cli::{cli_path, index_builder, init_tracing, load_settings, CommonArgs};
use machina_rag::KnowledgeBase;

/// Build the document index, or reuse the persisted one when it is still valid.
#[derive(Debug, Parser)]
#[command(name = "machina-indexer", version)]
struct Args {
    #[command(flatten)]
    common: CommonArgs,

    /// Directory of source documents, overrides rag.source_dir
    #[arg(long)]
    source: Option<PathBuf>,

    /// Filename glob to include (repeatable), overrides rag.file_patterns
    #[arg(long = "pattern")]
    patterns: Vec<String>,

    /// Rebuild even if a persisted index exists
    #[arg(long)]
    force: bool,

    /// Hide the embedding progress bar
    #[arg(long)]
    no_progress: bool,
}

fn main() -> anyhow::Result<()> {
    init_tracing();
    let args = Args::parse();
    let mut settings = load_settings(&args.common)?;
    if let Some(source) = &args.source {
        settings.source_dir = cli_path(&std::env::current_dir()?, source);
    }
    if !args.patterns.is_empty() {
        settings.file_patterns = args.patterns.clone();
    }

    println!("Source: {}", settings.source_dir.display());
    println!("Store:  {}", settings.store_path.display());
    println!("Files:  {}", settings.file_patterns.join(", "));

    let kb = KnowledgeBase::new(index_builder(&settings, !args.no_progress)?);
    let rt = tokio::runtime::Runtime::new()?;
    let report = rt
        .block_on(kb.build(settings.source_dir.clone(), settings.file_patterns.clone(), args.force))
        .with_context(|| format!("indexing {}", settings.source_dir.display()))?;
    let stats = rt.block_on(kb.stats());

    println!("\n{}", report);
    println!("{} chunks from {} sources (dim {:?})", stats.total_chunks, stats.sources, stats.dimension);
    Ok(())
}
