//! Content-addressed embedding cache.
//!
//! Records are keyed by `(entity type, entity id)` and carry the hash of the
//! normalized text they were generated from. A lookup whose freshly computed
//! hash (or model) differs from the stored one regenerates and overwrites
//! the whole record.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::Serialize;

use crate::config::Parallelism;
use crate::eid::{EntityId, EntityType};
use crate::semantic::embeddings::{Embedding, EmbeddingAdapter, EmbeddingError, EmbeddingProvider};
use crate::semantic::record::{CachedEmbeddingRecord, RecordKey};
use crate::semantic::vector::VectorError;
use crate::storage::{EmbeddingStore, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Vector error: {0}")]
    Vector(#[from] VectorError),
}

/// One entry of a batch lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchItem {
    pub text: String,
    pub entity_type: EntityType,
    pub entity_id: EntityId,
}

impl BatchItem {
    pub fn new(text: impl Into<String>, entity_type: EntityType, entity_id: impl Into<EntityId>) -> Self {
        Self {
            text: text.into(),
            entity_type,
            entity_id: entity_id.into(),
        }
    }
}

/// Cooperative cancellation for batch operations.
///
/// Items that have not started generating when the token is cancelled
/// resolve to `None`; items already running finish and write their record.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStatistics {
    pub total_records: usize,
    /// Bytes of packed vector data across all records
    pub total_bytes: usize,
    pub count_by_entity_type: BTreeMap<EntityType, usize>,
    /// Earliest `stored_at`
    pub oldest: Option<DateTime<Utc>>,
    /// Latest `stored_at`
    pub newest: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileResult {
    pub scanned: usize,
    pub removed: usize,
}

pub struct EmbeddingCache<S, P> {
    store: S,
    adapter: EmbeddingAdapter<P>,
    parallelism: Parallelism,
    /// Dedicated batch pool for `Parallelism::Fixed`; `None` runs on rayon's
    /// global pool
    pool: Option<Arc<rayon::ThreadPool>>,
}

impl<S: EmbeddingStore, P: EmbeddingProvider> EmbeddingCache<S, P> {
    pub fn new(store: S, provider: P) -> Self {
        Self {
            store,
            adapter: EmbeddingAdapter::new(provider),
            parallelism: Parallelism::Auto,
            pool: None,
        }
    }

    /// Bound batch concurrency. The worker pool is built here, once.
    pub fn with_parallelism(mut self, parallelism: Parallelism) -> Self {
        self.parallelism = parallelism;
        self.pool = build_pool(parallelism);
        self
    }

    pub fn parallelism(&self) -> Parallelism {
        self.parallelism
    }

    pub fn adapter(&self) -> &EmbeddingAdapter<P> {
        &self.adapter
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Return the embedding for an entity, generating and storing it when
    /// there is no record or the record is stale.
    ///
    /// `Ok(None)` means the provider has no model for this text; nothing is
    /// written in that case.
    pub fn get_or_generate(
        &self,
        text: &str,
        entity_type: EntityType,
        entity_id: &EntityId,
    ) -> Result<Option<Embedding>, CacheError> {
        let key = RecordKey::new(entity_type, entity_id.clone());
        let prepared = self.adapter.prepare(text)?;

        let existing = match self.store.read(&key) {
            Ok(existing) => existing,
            Err(StoreError::Record { path, source }) => {
                log::warn!("cached record {path} is unreadable ({source}); regenerating");
                None
            }
            Err(e) => return Err(e.into()),
        };

        match existing {
            Some(record) if record.model_identifier != self.adapter.model_identifier() => {
                log::warn!(
                    "cached embedding for {key} was produced by '{}', current model is '{}'; regenerating",
                    record.model_identifier,
                    self.adapter.model_identifier()
                );
            }
            Some(record) if record.content_hash == prepared.content_hash => {
                match record.to_embedding() {
                    Ok(embedding) => {
                        log::debug!("embedding cache hit for {key}");
                        return Ok(Some(embedding));
                    }
                    Err(e) => log::warn!("cached vector for {key} is unreadable ({e}); regenerating"),
                }
            }
            Some(_) => log::debug!("embedding for {key} is stale; regenerating"),
            None => log::debug!("embedding cache miss for {key}"),
        }

        let Some(embedding) = self.adapter.generate_prepared(text, &prepared)? else {
            return Ok(None);
        };

        self.store
            .upsert(&CachedEmbeddingRecord::from_embedding(key, &embedding))?;

        Ok(Some(embedding))
    }

    /// Resolve many entities concurrently. See [`Self::get_or_generate_batch_with`].
    pub fn get_or_generate_batch(&self, items: &[BatchItem]) -> Result<Vec<Option<Embedding>>, CacheError> {
        self.get_or_generate_batch_with(items, &CancelToken::new())
    }

    /// Resolve many entities with bounded concurrency.
    ///
    /// The result has one slot per input, in input order. An item that fails
    /// (blank text, provider or storage error) or is cancelled before it
    /// starts resolves to `None` without affecting the others.
    pub fn get_or_generate_batch_with(
        &self,
        items: &[BatchItem],
        cancel: &CancelToken,
    ) -> Result<Vec<Option<Embedding>>, CacheError> {
        if items.is_empty() {
            return Ok(vec![]);
        }

        let resolve = || {
            items
                .par_iter()
                .map(|item| {
                    if cancel.is_cancelled() {
                        return None;
                    }

                    match self.get_or_generate(&item.text, item.entity_type, &item.entity_id) {
                        Ok(embedding) => embedding,
                        Err(e) => {
                            log::warn!(
                                "batch item {}/{} failed: {e}",
                                item.entity_type,
                                item.entity_id
                            );
                            None
                        }
                    }
                })
                .collect::<Vec<_>>()
        };

        let results = match &self.pool {
            Some(pool) => pool.install(resolve),
            None => resolve(),
        };

        Ok(results)
    }

    /// Drop the cached record; the next lookup regenerates it.
    pub fn invalidate(&self, entity_type: EntityType, entity_id: &EntityId) -> Result<bool, CacheError> {
        let removed = self
            .store
            .delete(&RecordKey::new(entity_type, entity_id.clone()))?;
        if removed {
            log::debug!("invalidated embedding for {entity_type}/{entity_id}");
        }
        Ok(removed)
    }

    pub fn has_embedding(&self, entity_type: EntityType, entity_id: &EntityId) -> Result<bool, CacheError> {
        Ok(self
            .store
            .exists(&RecordKey::new(entity_type, entity_id.clone()))?)
    }

    /// Aggregate counts over every stored record (full scan).
    pub fn statistics(&self) -> Result<CacheStatistics, CacheError> {
        let records = self.store.scan()?;

        let mut stats = CacheStatistics {
            total_records: records.len(),
            ..Default::default()
        };

        for record in &records {
            stats.total_bytes += record.vector_size();
            *stats
                .count_by_entity_type
                .entry(record.key.entity_type)
                .or_insert(0) += 1;

            stats.oldest = Some(match stats.oldest {
                Some(oldest) => oldest.min(record.stored_at),
                None => record.stored_at,
            });
            stats.newest = Some(match stats.newest {
                Some(newest) => newest.max(record.stored_at),
                None => record.stored_at,
            });
        }

        Ok(stats)
    }

    /// Delete records of `entity_type` whose entity no longer exists.
    pub fn reconcile(
        &self,
        entity_type: EntityType,
        live_ids: &HashSet<EntityId>,
    ) -> Result<ReconcileResult, CacheError> {
        let mut result = ReconcileResult::default();

        for record in self.store.scan()? {
            if record.key.entity_type != entity_type {
                continue;
            }
            result.scanned += 1;

            if !live_ids.contains(&record.key.entity_id) && self.store.delete(&record.key)? {
                result.removed += 1;
            }
        }

        log::info!(
            "reconciled {entity_type} embeddings: scanned={} removed={}",
            result.scanned,
            result.removed
        );

        Ok(result)
    }
}

fn build_pool(parallelism: Parallelism) -> Option<Arc<rayon::ThreadPool>> {
    let Parallelism::Fixed(threads) = parallelism else {
        return None;
    };

    match rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .thread_name(|idx| format!("embedding-{idx}"))
        .build()
    {
        Ok(pool) => Some(Arc::new(pool)),
        Err(e) => {
            log::warn!("failed to build {threads}-thread embedding pool ({e}); using the global pool");
            None
        }
    }
}
