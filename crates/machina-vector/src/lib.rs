//! machina-vector
//!
//! Exact squared-L2 search over a flat vector block, the aligned
//! vectors/texts/metadata triple built on top of it, and its generational
//! on-disk store.

pub mod flat;
pub mod index;
pub mod store;

pub use flat::{squared_l2, FlatL2Index, Neighbor};
pub use index::{flatten_line, IndexEntry, KnowledgeIndex};
pub use store::{load, save, IndexStore, Manifest};
