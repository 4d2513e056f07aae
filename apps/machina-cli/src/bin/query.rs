use anyhow::Context;
use clap::Parser;
use machina_cli::{index_builder, init_tracing, load_settings, CommonArgs};
use machina_rag::KnowledgeBase;

/// Retrieve the passages most relevant to a question.
#[derive(Debug, Parser)]
#[command(name = "machina-query", version)]
struct Args {
    #[command(flatten)]
    common: CommonArgs,

    /// Number of passages to return, overrides rag.top_k
    #[arg(long)]
    top_k: Option<usize>,

    /// Minimum score in (0, 1], overrides rag.score_threshold
    #[arg(long)]
    threshold: Option<f32>,

    /// Print results as JSON
    #[arg(long)]
    json: bool,

    question: String,
}

fn main() -> anyhow::Result<()> {
    init_tracing();
    let args = Args::parse();
    let settings = load_settings(&args.common)?;
    let top_k = args.top_k.unwrap_or(settings.top_k);
    let threshold = args.threshold.or(settings.score_threshold);

    let builder = index_builder(&settings, false)?;
    let rt = tokio::runtime::Runtime::new()?;
    let kb = rt
        .block_on(KnowledgeBase::open(builder))
        .with_context(|| format!("opening index at {}", settings.store_path.display()))?
        .with_score_threshold(threshold);
    let results = rt.block_on(kb.retrieve(&args.question, top_k))?;
    drop(rt);

    if args.json {
        println!("{}", serde_json::to_string_pretty(&results)?);
        return Ok(());
    }
    if results.is_empty() {
        println!("No passages found for: \"{}\"", args.question);
        return Ok(());
    }
    println!("Found {} passages for: \"{}\"", results.len(), args.question);
    for (i, result) in results.iter().enumerate() {
        let chunk = result.metadata.get("chunk").unwrap_or("-");
        println!("\n  {}. score={:.4}  source={}  chunk={}", i + 1, result.score, result.metadata.source, chunk);
        println!("     {}", result.text);
    }
    Ok(())
}
