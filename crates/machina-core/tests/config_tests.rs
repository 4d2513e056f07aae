use std::path::{Path, PathBuf};

use machina_core::config::{resolve_with_base, Config, RagSettings};

#[test]
fn defaults_apply_without_any_file() {
    let config = Config::from_toml_str("");
    let rag = config.rag().expect("rag settings");
    assert_eq!(rag, RagSettings::default());
    assert_eq!(rag.chunk_size, 500);
    assert_eq!(rag.chunk_overlap, 50);
    assert_eq!(rag.file_patterns, vec!["*.txt", "*.md"]);
    assert_eq!(rag.embedding.provider, "hash");
}

#[test]
fn toml_overrides_merge_over_defaults() {
    let config = Config::from_toml_str(
        r#"
        [rag]
        store_path = "/var/lib/machina/store"
        chunk_size = 800
        score_threshold = 0.25

        [rag.embedding]
        provider = "http"
        endpoint = "http://embedder:11434"
        "#,
    );
    let rag = config.rag().expect("rag settings");
    assert_eq!(rag.store_path, PathBuf::from("/var/lib/machina/store"));
    assert_eq!(rag.chunk_size, 800);
    assert_eq!(rag.chunk_overlap, 50, "untouched keys keep their default");
    assert_eq!(rag.score_threshold, Some(0.25));
    assert_eq!(rag.embedding.provider, "http");
    assert_eq!(rag.embedding.dimension, 384);
}

#[test]
fn overlap_at_least_chunk_size_is_rejected() {
    let config = Config::from_toml_str("[rag]\nchunk_size = 100\nchunk_overlap = 100\n");
    let err = config.rag().expect_err("must fail");
    assert!(err.to_string().contains("overlap"), "unexpected error: {err}");
}

#[test]
fn zero_batch_size_is_rejected() {
    let config = Config::from_toml_str("[rag]\nbatch_size = 0\n");
    assert!(config.rag().is_err());
}

#[test]
fn relative_paths_resolve_against_explicit_base() {
    let base = Path::new("/srv/machina");
    let rag = RagSettings::default().resolve_paths(base);
    assert_eq!(rag.store_path, PathBuf::from("/srv/machina/vector_store"));
    assert_eq!(rag.source_dir, PathBuf::from("/srv/machina/docs"));
    assert_eq!(resolve_with_base(base, "/abs/store"), PathBuf::from("/abs/store"));
}
