//! machina-rag
//!
//! Document grounding on top of `machina-vector`: the cached index builder,
//! the query-time retriever and the async `KnowledgeBase` facade.

pub mod builder;
pub mod knowledge;
pub mod retriever;

pub use builder::{BuildOrigin, BuildOutput, BuildReport, IndexBuilder, RebuildReason};
pub use knowledge::KnowledgeBase;
pub use retriever::{distance_to_score, Retriever};
