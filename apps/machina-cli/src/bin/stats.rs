use clap::Parser;
use machina_cli::{init_tracing, load_settings, CommonArgs};
use machina_vector::IndexStore;

/// Summarise the persisted index.
#[derive(Debug, Parser)]
#[command(name = "machina-stats", version)]
struct Args {
    #[command(flatten)]
    common: CommonArgs,
}

fn main() -> anyhow::Result<()> {
    init_tracing();
    let args = Args::parse();
    let settings = load_settings(&args.common)?;
    let store = IndexStore::new(&settings.store_path);

    println!("Store: {}", store.root().display());
    let Some(manifest) = store.manifest()? else {
        println!("No index has been built yet.");
        return Ok(());
    };
    let stats = store.load()?.stats();
    println!("Chunks:    {}", stats.total_chunks);
    println!("Sources:   {}", stats.sources);
    println!("Dimension: {}", stats.dimension.map_or_else(|| "-".to_string(), |d| d.to_string()));
    println!("Embedder:  {}", stats.embedder_id.as_deref().unwrap_or("-"));
    println!("Built at:  {}", manifest.created_at.to_rfc3339());
    Ok(())
}
