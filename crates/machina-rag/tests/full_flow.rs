use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use machina_core::chunker::ChunkingConfig;
use machina_core::sources::SourceDocument;
use machina_core::traits::Embedder;
use machina_core::{Error, Result};
use machina_embed::HashEmbedder;
use machina_rag::{BuildOrigin, IndexBuilder, KnowledgeBase, RebuildReason};
use machina_vector::store::{CURRENT_FILE, VECTORS_FILE};
use machina_vector::IndexStore;
use tempfile::TempDir;

const SPINDLE: &str = "The spindle bearing overheats when coolant flow drops.";
const FILTER: &str = "Replace the hydraulic filter every three hundred hours.";

/// Hash embedder that counts calls and can be told to fail or to stall.
struct Probe {
    inner: HashEmbedder,
    calls: AtomicUsize,
    failing: AtomicBool,
    delay_ms: AtomicU64,
}

impl Probe {
    fn new(dim: usize) -> Arc<Self> {
        Arc::new(Self {
            inner: HashEmbedder::new(dim),
            calls: AtomicUsize::new(0),
            failing: AtomicBool::new(false),
            delay_ms: AtomicU64::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn set_delay(&self, delay: Duration) {
        self.delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }
}

impl Embedder for Probe {
    fn embedder_id(&self) -> &str {
        self.inner.embedder_id()
    }

    fn dim(&self) -> usize {
        self.inner.dim()
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            std::thread::sleep(Duration::from_millis(delay));
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::EmbeddingUnavailable("probe switched off".to_string()));
        }
        self.inner.embed_batch(texts)
    }
}

struct Fixture {
    _tmp: TempDir,
    docs: PathBuf,
    store: PathBuf,
}

fn fixture() -> Fixture {
    let tmp = TempDir::new().expect("tmp");
    let docs = tmp.path().join("docs");
    fs::create_dir_all(docs.join("notes")).expect("mkdir");
    fs::write(docs.join("spindle.txt"), SPINDLE).expect("write");
    fs::write(docs.join("notes").join("filter.md"), FILTER).expect("write");
    fs::write(docs.join("ignored.log"), "Log files are not part of the corpus.").expect("write");
    let store = tmp.path().join("store");
    Fixture { _tmp: tmp, docs, store }
}

fn patterns() -> Vec<String> {
    vec!["*.txt".to_string(), "*.md".to_string()]
}

fn builder(store: &Path, embedder: Arc<dyn Embedder>) -> IndexBuilder {
    IndexBuilder::new(store, embedder, ChunkingConfig { chunk_size: 200, overlap: 20 }).expect("builder")
}

#[test]
fn cold_build_then_reuse_without_embedding() {
    let fx = fixture();
    let first = Probe::new(64);
    let out = builder(&fx.store, first.clone()).build(&fx.docs, &patterns(), false).expect("build");
    assert_eq!(out.report.origin, BuildOrigin::Rebuilt { reason: RebuildReason::ColdStart });
    assert_eq!(out.report.files, 2);
    assert_eq!(out.report.chunks, 2);
    assert!(first.calls() > 0);

    let second = Probe::new(64);
    let reused = builder(&fx.store, second.clone()).build(&fx.docs, &patterns(), false).expect("reuse");
    assert_eq!(reused.report.origin, BuildOrigin::Reused);
    assert_eq!(second.calls(), 0, "a reused index must not touch the embedder");
    assert_eq!(reused.index, out.index);
}

#[test]
fn metadata_records_source_and_chunk_position() {
    let fx = fixture();
    let long: String = (0..40).map(|i| format!("Sentence number {} about lathe maintenance. ", i)).collect();
    fs::write(fx.docs.join("long.txt"), long).expect("write");

    let out = builder(&fx.store, Probe::new(32)).build(&fx.docs, &patterns(), false).expect("build");
    let long_meta: Vec<_> = out.index.metadata().iter().filter(|m| m.source == "long.txt").collect();
    assert!(long_meta.len() > 1, "long document is split");
    let total = long_meta.len().to_string();
    for (i, meta) in long_meta.iter().enumerate() {
        assert_eq!(meta.get("chunk"), Some(i.to_string().as_str()));
        assert_eq!(meta.get("chunks"), Some(total.as_str()));
    }
    assert!(out.index.metadata().iter().any(|m| m.source == "notes/filter.md"));
    assert!(out.index.metadata().iter().all(|m| m.source != "ignored.log"));
}

#[test]
fn forced_rebuild_drops_removed_sources() {
    let fx = fixture();
    let b = builder(&fx.store, Probe::new(64));
    b.build(&fx.docs, &patterns(), false).expect("build");

    fs::remove_file(fx.docs.join("notes").join("filter.md")).expect("remove");
    let out = b.build(&fx.docs, &patterns(), true).expect("rebuild");
    assert_eq!(out.report.origin, BuildOrigin::Rebuilt { reason: RebuildReason::Forced });
    assert_eq!(out.index.stats().sources, 1);
    assert!(out.index.texts().iter().all(|t| t != FILTER));

    let reloaded = IndexStore::new(&fx.store).load().expect("load");
    assert_eq!(reloaded, out.index);
}

#[test]
fn changed_embedder_forces_rebuild() {
    let fx = fixture();
    builder(&fx.store, Probe::new(64)).build(&fx.docs, &patterns(), false).expect("build");

    let out = builder(&fx.store, Probe::new(32)).build(&fx.docs, &patterns(), false).expect("rebuild");
    assert_eq!(out.report.origin, BuildOrigin::Rebuilt { reason: RebuildReason::EmbedderChanged });
    assert_eq!(out.index.dim(), Some(32));
    let manifest = IndexStore::new(&fx.store).manifest().expect("manifest").expect("present");
    assert_eq!(manifest.embedder_id.as_deref(), Some("hash:xxh64:d32"));
}

#[test]
fn corrupt_store_is_discarded_and_rebuilt() {
    let fx = fixture();
    builder(&fx.store, Probe::new(64)).build(&fx.docs, &patterns(), false).expect("build");

    let generation = fs::read_to_string(fx.store.join(CURRENT_FILE)).expect("CURRENT");
    let vectors = fx.store.join(generation.trim()).join(VECTORS_FILE);
    fs::write(&vectors, b"MVEC garbage").expect("corrupt");

    let out = builder(&fx.store, Probe::new(64)).build(&fx.docs, &patterns(), false).expect("recover");
    assert_eq!(out.report.origin, BuildOrigin::Rebuilt { reason: RebuildReason::Corrupt });
    assert_eq!(out.index.len(), 2);
    assert_eq!(IndexStore::new(&fx.store).load().expect("load").len(), 2);
}

#[test]
fn missing_source_dir_is_not_found() {
    let fx = fixture();
    let err = builder(&fx.store, Probe::new(16)).build(&fx.docs.join("nope"), &patterns(), true).expect_err("missing");
    assert!(matches!(err, Error::NotFound(_)));
    assert!(!IndexStore::new(&fx.store).exists());
}

#[test]
fn extend_continues_ordinals_and_persists() {
    let fx = fixture();
    let b = builder(&fx.store, Probe::new(64));
    let base = b.build(&fx.docs, &patterns(), false).expect("build").index;

    let extra = vec![SourceDocument::new("manual/addendum.txt", "Grease the tailstock quill weekly.")];
    let (chunks, _) = b.chunk_documents(&extra, base.len());
    assert_eq!(chunks[0].ordinal, base.len());

    let extended = b.extend(&base, &extra).expect("extend");
    assert_eq!(extended.len(), base.len() + 1);
    assert_eq!(&extended.texts()[..base.len()], base.texts());
    assert_eq!(extended.metadata()[base.len()].source, "manual/addendum.txt");
    assert_eq!(IndexStore::new(&fx.store).load().expect("load"), extended);
}

#[tokio::test]
async fn exact_passage_scores_one() {
    let fx = fixture();
    let kb = KnowledgeBase::new(builder(&fx.store, Probe::new(64)));
    kb.build(fx.docs.clone(), patterns(), false).await.expect("build");

    let results = kb.retrieve(SPINDLE, 2).await.expect("retrieve");
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].text, SPINDLE);
    assert_eq!(results[0].score, 1.0);
    assert_eq!(results[0].metadata.source, "spindle.txt");
    assert!(results[1].score < results[0].score);
    assert!(results[1].score > 0.0);
}

#[tokio::test]
async fn score_threshold_filters_weak_matches() {
    let fx = fixture();
    let kb = KnowledgeBase::new(builder(&fx.store, Probe::new(64))).with_score_threshold(Some(0.99));
    kb.build(fx.docs.clone(), patterns(), false).await.expect("build");

    let results = kb.retrieve(FILTER, 5).await.expect("retrieve");
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].text, FILTER);
}

#[tokio::test]
async fn empty_knowledge_base_skips_embedding() {
    let fx = fixture();
    let probe = Probe::new(16);
    let kb = KnowledgeBase::new(builder(&fx.store, probe.clone()));
    assert!(kb.retrieve("anything", 5).await.expect("retrieve").is_empty());
    assert_eq!(probe.calls(), 0);

    kb.build(fx.docs.clone(), patterns(), false).await.expect("build");
    let calls = probe.calls();
    assert!(kb.retrieve("anything", 0).await.expect("retrieve").is_empty());
    assert_eq!(probe.calls(), calls, "top_k == 0 must not embed");
}

#[tokio::test]
async fn failed_rebuild_keeps_serving_previous_index() {
    let fx = fixture();
    let probe = Probe::new(64);
    let kb = KnowledgeBase::new(builder(&fx.store, probe.clone()));
    kb.build(fx.docs.clone(), patterns(), false).await.expect("build");
    let before = kb.stats().await;

    probe.set_failing(true);
    let err = kb.build(fx.docs.clone(), patterns(), true).await.expect_err("embedder down");
    assert!(matches!(err, Error::EmbeddingUnavailable(_)));
    let err = kb.build(fx.docs.join("gone"), patterns(), true).await.expect_err("missing dir");
    assert!(matches!(err, Error::NotFound(_)));

    probe.set_failing(false);
    assert_eq!(kb.stats().await, before);
    let results = kb.retrieve(SPINDLE, 1).await.expect("retrieve");
    assert_eq!(results[0].text, SPINDLE);
}

#[tokio::test]
async fn open_loads_persisted_index() {
    let fx = fixture();
    let cold = KnowledgeBase::open(builder(&fx.store, Probe::new(64))).await.expect("cold open");
    assert_eq!(cold.stats().await.total_chunks, 0);

    cold.build(fx.docs.clone(), patterns(), false).await.expect("build");

    let warm = KnowledgeBase::open(builder(&fx.store, Probe::new(64))).await.expect("open");
    let stats = warm.stats().await;
    assert_eq!(stats.total_chunks, 2);
    assert_eq!(stats.sources, 2);
    assert_eq!(stats.dimension, Some(64));
    assert_eq!(stats.embedder_id.as_deref(), Some("hash:xxh64:d64"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn background_build_and_concurrent_readers() {
    let fx = fixture();
    let kb = KnowledgeBase::new(builder(&fx.store, Probe::new(64)));
    let report = kb.spawn_build(fx.docs.clone(), patterns(), false).await.expect("join").expect("build");
    assert_eq!(report.chunks, 2);

    let readers: Vec<_> = (0..8)
        .map(|i| {
            let kb = kb.clone();
            let query = if i % 2 == 0 { SPINDLE } else { FILTER };
            tokio::spawn(async move { kb.retrieve(query, 1).await })
        })
        .collect();
    for (i, reader) in readers.into_iter().enumerate() {
        let results = reader.await.expect("join").expect("retrieve");
        let expected = if i % 2 == 0 { SPINDLE } else { FILTER };
        assert_eq!(results[0].text, expected);
    }
}

#[tokio::test]
async fn add_documents_appends_to_live_index() {
    let fx = fixture();
    let kb = KnowledgeBase::new(builder(&fx.store, Probe::new(64)));
    kb.build(fx.docs.clone(), patterns(), false).await.expect("build");

    let added = kb
        .add_documents(vec![SourceDocument::new("extra.txt", "Calibrate the tool height sensor before each job.")])
        .await
        .expect("add");
    assert_eq!(added, 1);
    assert_eq!(kb.stats().await.total_chunks, 3);
    let results = kb.retrieve("Calibrate the tool height sensor before each job.", 1).await.expect("retrieve");
    assert_eq!(results[0].metadata.source, "extra.txt");
}

#[tokio::test]
async fn add_documents_on_fresh_handle_keeps_persisted_entries() {
    let fx = fixture();
    builder(&fx.store, Probe::new(64)).build(&fx.docs, &patterns(), false).expect("build");

    let kb = KnowledgeBase::new(builder(&fx.store, Probe::new(64)));
    let added = kb
        .add_documents(vec![SourceDocument::new("c.txt", "Bleed the coolant lines after refilling.")])
        .await
        .expect("add");
    assert_eq!(added, 1);

    let persisted = IndexStore::new(&fx.store).load().expect("load");
    assert_eq!(persisted.len(), 3);
    assert!(persisted.texts().iter().any(|t| t == SPINDLE));
    assert!(persisted.texts().iter().any(|t| t == FILTER));
    assert_eq!(kb.stats().await.total_chunks, 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn build_outliving_its_caller_still_swaps_the_served_index() {
    let fx = fixture();
    let probe = Probe::new(64);
    probe.set_delay(Duration::from_millis(200));
    let kb = KnowledgeBase::new(builder(&fx.store, probe.clone()));

    let attempt = tokio::time::timeout(Duration::from_millis(10), kb.build(fx.docs.clone(), patterns(), false)).await;
    assert!(attempt.is_err(), "deadline fires before embedding finishes");

    // The read lock waits for the detached build to finish its swap.
    let stats = kb.stats().await;
    let persisted = IndexStore::new(&fx.store).load().expect("load");
    assert_eq!(stats.total_chunks, 2);
    assert_eq!(stats.total_chunks, persisted.len());
    assert_eq!(stats.embedder_id.as_deref(), persisted.embedder_id());
}
