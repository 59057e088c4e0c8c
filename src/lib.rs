//! Semantic similarity and near-duplicate detection for planning entities
//! (goals, actions, values, terms).
//!
//! Embeddings come from a pluggable [`EmbeddingProvider`], are cached per
//! entity behind an [`EmbeddingStore`], and are blended with edit-distance
//! similarity to decide whether new text duplicates an existing entity.

pub mod config;
pub mod eid;
pub mod semantic;
pub mod service;
pub mod storage;
#[cfg(test)]
mod tests;

pub use config::{ConfigError, DedupConfig, Parallelism};
pub use eid::{EntityId, EntityType};
pub use semantic::{
    DetectorError, DuplicationDetector, DuplicationVerdict, Embedding, EmbeddingCache, EmbeddingProvider,
    EntityRepository, MatchKind, PoolMember,
};
pub use service::{DedupService, WarmReport};
pub use storage::{EmbeddingStore, FileStore, MemoryStore, StoreError};
