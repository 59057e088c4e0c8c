//! Semantic similarity infrastructure for planning entities.
//!
//! Embeddings are produced by a pluggable provider, cached per entity in an
//! [`EmbeddingStore`](crate::storage::EmbeddingStore), and combined with
//! lexical similarity to detect near-duplicates.
//!
//! # Architecture
//!
//! - `preprocess`: Text normalization, content hashing, canonical text
//! - `embeddings`: Provider trait, adapter, optional fastembed provider
//! - `vector`: Cosine similarity and packed vector encoding
//! - `record`: Persisted cache record and its binary format
//! - `cache`: Embedding cache keyed by entity
//! - `lexical`: Edit-distance similarity
//! - `hybrid`: Weighted semantic + lexical score
//! - `index`: Linear nearest-neighbor scan
//! - `duplicates`: Duplicate detection over an entity pool

pub mod cache;
pub mod duplicates;
pub mod embeddings;
pub mod hybrid;
pub mod index;
pub mod lexical;
pub mod preprocess;
pub mod record;
pub mod vector;

pub use cache::{BatchItem, CacheError, CacheStatistics, CancelToken, EmbeddingCache, ReconcileResult};
pub use duplicates::{
    DetectorError, DuplicateGroup, DuplicationDetector, DuplicationVerdict, EntityRepository, MatchKind,
    MemberScore, PoolMember,
};
pub use embeddings::{Embedding, EmbeddingAdapter, EmbeddingError, EmbeddingProvider};
#[cfg(feature = "fastembed")]
pub use embeddings::FastEmbedProvider;
pub use hybrid::HybridWeights;
pub use index::{find_similar, SearchResult};
pub use lexical::normalized_edit_similarity;
pub use preprocess::{canonical_text, content_hash, normalize_text};
pub use record::{CachedEmbeddingRecord, RecordKey};
pub use vector::{cosine_similarity, VectorError};

/// Default embedding model name (bge-base offers +13% accuracy vs MiniLM)
pub const DEFAULT_MODEL: &str = "bge-base-en-v1.5";
