//! Write-path facade for planning entities.
//!
//! Wires a [`DedupConfig`], an embedding store, a provider and the entity
//! repository together:
//! - `check_create` / `check_update` before an entity is persisted
//! - `entity_deleted` after one is removed
//! - `warm`, `reconcile` and `statistics` for maintenance

use std::collections::HashSet;

use serde::Serialize;

use crate::config::DedupConfig;
use crate::eid::{EntityId, EntityType};
use crate::semantic::cache::{BatchItem, CacheStatistics, CancelToken, EmbeddingCache, ReconcileResult};
use crate::semantic::duplicates::{
    DetectorError, DuplicateGroup, DuplicationDetector, DuplicationVerdict, EntityRepository,
};
use crate::semantic::embeddings::EmbeddingProvider;
use crate::semantic::index::SearchResult;
use crate::semantic::preprocess::canonical_text;
use crate::storage::EmbeddingStore;

/// Outcome of warming the cache for one entity type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WarmReport {
    pub requested: usize,
    pub embedded: usize,
    pub unavailable_or_failed: usize,
}

pub struct DedupService<S, P, R> {
    config: DedupConfig,
    detector: DuplicationDetector<S, P>,
    repository: R,
}

impl<S: EmbeddingStore, P: EmbeddingProvider, R: EntityRepository> DedupService<S, P, R> {
    pub fn new(config: DedupConfig, store: S, provider: P, repository: R) -> Self {
        let detector = DuplicationDetector::from_config(EmbeddingCache::new(store, provider), &config);
        Self {
            config,
            detector,
            repository,
        }
    }

    pub fn config(&self) -> &DedupConfig {
        &self.config
    }

    pub fn detector(&self) -> &DuplicationDetector<S, P> {
        &self.detector
    }

    pub fn cache(&self) -> &EmbeddingCache<S, P> {
        self.detector.cache()
    }

    pub fn repository(&self) -> &R {
        &self.repository
    }

    /// Check a new entity against every existing entity of its type.
    pub fn check_create(
        &self,
        entity_type: EntityType,
        title: &str,
        description: &str,
    ) -> Result<DuplicationVerdict, DetectorError> {
        let text = self.canonical(title, description)?;
        let pool = self.repository.fetch_all(entity_type)?;
        self.detector.check_duplicate(&text, entity_type, &pool)
    }

    /// Check an edited entity against every other entity of its type.
    pub fn check_update(
        &self,
        entity_type: EntityType,
        entity_id: &EntityId,
        title: &str,
        description: &str,
    ) -> Result<DuplicationVerdict, DetectorError> {
        let text = self.canonical(title, description)?;
        let pool: Vec<_> = self
            .repository
            .fetch_all(entity_type)?
            .into_iter()
            .filter(|m| &m.id != entity_id)
            .collect();
        self.detector.check_duplicate(&text, entity_type, &pool)
    }

    /// Drop the cached embedding of a deleted entity.
    pub fn entity_deleted(&self, entity_type: EntityType, entity_id: &EntityId) -> Result<bool, DetectorError> {
        Ok(self.cache().invalidate(entity_type, entity_id)?)
    }

    /// Pre-compute embeddings for every entity of a type.
    pub fn warm(&self, entity_type: EntityType) -> Result<WarmReport, DetectorError> {
        self.warm_with(entity_type, &CancelToken::new())
    }

    pub fn warm_with(&self, entity_type: EntityType, cancel: &CancelToken) -> Result<WarmReport, DetectorError> {
        let items: Vec<BatchItem> = self
            .repository
            .fetch_all(entity_type)?
            .into_iter()
            .map(|m| BatchItem::new(m.text, entity_type, m.id))
            .collect();

        let results = self.cache().get_or_generate_batch_with(&items, cancel)?;
        let embedded = results.iter().filter(|r| r.is_some()).count();

        let report = WarmReport {
            requested: items.len(),
            embedded,
            unavailable_or_failed: items.len() - embedded,
        };

        log::info!(
            "warmed {entity_type} embeddings: {}/{} available",
            report.embedded,
            report.requested
        );

        Ok(report)
    }

    /// Remove cached embeddings of entities the repository no longer has.
    pub fn reconcile(&self, entity_type: EntityType) -> Result<ReconcileResult, DetectorError> {
        let live: HashSet<EntityId> = self
            .repository
            .fetch_all(entity_type)?
            .into_iter()
            .map(|m| m.id)
            .collect();
        Ok(self.cache().reconcile(entity_type, &live)?)
    }

    pub fn statistics(&self) -> Result<CacheStatistics, DetectorError> {
        Ok(self.cache().statistics()?)
    }

    /// Groups of existing entities that duplicate each other.
    pub fn duplicate_groups(&self, entity_type: EntityType) -> Result<Vec<DuplicateGroup>, DetectorError> {
        let pool = self.repository.fetch_all(entity_type)?;
        self.detector.find_duplicate_groups(entity_type, &pool)
    }

    /// Existing entities most similar to `text`, best first.
    pub fn related(
        &self,
        entity_type: EntityType,
        text: &str,
        limit: usize,
        threshold: f64,
    ) -> Result<Vec<SearchResult>, DetectorError> {
        let pool = self.repository.fetch_all(entity_type)?;
        self.detector
            .find_similar_entities(text, entity_type, &pool, limit, threshold)
    }

    fn canonical(&self, title: &str, description: &str) -> Result<String, DetectorError> {
        canonical_text(title, description, self.config.max_content_length).ok_or(DetectorError::EmptyText)
    }
}

#[cfg(feature = "fastembed")]
mod local {
    use std::time::Duration;

    use super::*;
    use crate::semantic::cache::CacheError;
    use crate::semantic::embeddings::FastEmbedProvider;
    use crate::storage::{FileStore, StoreError};

    impl<R: EntityRepository> DedupService<FileStore, FastEmbedProvider, R> {
        /// On-device service storing records under `<base>/embeddings` and
        /// models under `<base>/models`.
        pub fn open(config: DedupConfig, repository: R) -> Result<Self, DetectorError> {
            let base = config.base_path().to_path_buf();

            let store = FileStore::new(base.join("embeddings"))
                .map_err(|e| DetectorError::Cache(CacheError::Store(StoreError::Io(e))))?;

            let timeout = Duration::from_secs(config.download_timeout_secs);
            let provider = FastEmbedProvider::new(&config.model, base, Some(timeout))?;

            Ok(Self::new(config, store, provider, repository))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::semantic::duplicates::{MatchKind, PoolMember};
    use crate::storage::MemoryStore;
    use crate::tests::support::{CountingProvider, MemoryRepository, TrigramProvider, UnavailableProvider};

    type TestService = DedupService<MemoryStore, CountingProvider<TrigramProvider>, MemoryRepository>;

    fn goals() -> MemoryRepository {
        MemoryRepository::with(
            EntityType::Goal,
            vec![
                PoolMember::new("G1", "Run 120km this term"),
                PoolMember::new("G2", "Read 12 books"),
                PoolMember::new("G3", "Learn to play the cello"),
            ],
        )
    }

    fn service() -> TestService {
        DedupService::new(
            DedupConfig::default(),
            MemoryStore::new(),
            CountingProvider::new(TrigramProvider::default()),
            goals(),
        )
    }

    #[test]
    fn test_check_create_exact() {
        let verdict = service()
            .check_create(EntityType::Goal, "read 12 BOOKS", "")
            .unwrap();
        assert_eq!(verdict.match_kind, MatchKind::Exact);
        assert_eq!(verdict.matched_entity_id, Some(EntityId::from("G2")));
    }

    #[test]
    fn test_check_create_hybrid() {
        let verdict = service()
            .check_create(EntityType::Goal, "Run 120 km this term", "")
            .unwrap();
        assert!(verdict.is_duplicate);
        assert_eq!(verdict.match_kind, MatchKind::Hybrid);
        assert_eq!(verdict.matched_entity_id, Some(EntityId::from("G1")));
    }

    #[test]
    fn test_check_create_other_type_has_empty_pool() {
        let verdict = service()
            .check_create(EntityType::Action, "Read 12 books", "")
            .unwrap();
        assert!(!verdict.is_duplicate);
        assert_eq!(verdict.similarity_score, 0.0);
    }

    #[test]
    fn test_check_create_blank_rejected() {
        let result = service().check_create(EntityType::Goal, " ", "\t");
        assert!(matches!(result, Err(DetectorError::EmptyText)));
    }

    #[test]
    fn test_check_create_uses_description() {
        let service = service();
        service
            .repository()
            .insert(EntityType::Goal, PoolMember::new("G4", "Run - around the park"));

        let verdict = service
            .check_create(EntityType::Goal, "Run", "around the park")
            .unwrap();
        assert_eq!(verdict.match_kind, MatchKind::Exact);
        assert_eq!(verdict.matched_entity_id, Some(EntityId::from("G4")));
    }

    #[test]
    fn test_repository_failure_propagates() {
        let service = service();
        service.repository().fail();

        let result = service.check_create(EntityType::Goal, "Anything", "");
        assert!(matches!(result, Err(DetectorError::Repository(_))));
    }

    #[test]
    fn test_check_update_ignores_itself() {
        let verdict = service()
            .check_update(EntityType::Goal, &"G2".into(), "Read 12 books", "")
            .unwrap();
        assert!(!verdict.is_duplicate);

        let verdict = service()
            .check_update(EntityType::Goal, &"G3".into(), "Read 12 books", "")
            .unwrap();
        assert_eq!(verdict.matched_entity_id, Some(EntityId::from("G2")));
    }

    #[test]
    fn test_warm_then_check_only_embeds_candidate() {
        let service = service();

        let report = service.warm(EntityType::Goal).unwrap();
        assert_eq!(
            report,
            WarmReport {
                requested: 3,
                embedded: 3,
                unavailable_or_failed: 0
            }
        );
        assert_eq!(service.cache().adapter().provider().calls(), 3);

        service
            .check_create(EntityType::Goal, "Swim the channel", "")
            .unwrap();
        assert_eq!(service.cache().adapter().provider().calls(), 4);
    }

    #[test]
    fn test_warm_without_model() {
        let service = DedupService::new(
            DedupConfig::default(),
            MemoryStore::new(),
            UnavailableProvider,
            goals(),
        );

        let report = service.warm(EntityType::Goal).unwrap();
        assert_eq!(report.requested, 3);
        assert_eq!(report.embedded, 0);
        assert_eq!(report.unavailable_or_failed, 3);
        assert_eq!(service.statistics().unwrap().total_records, 0);
    }

    #[test]
    fn test_warm_cancelled_before_start() {
        let service = service();
        let cancel = CancelToken::new();
        cancel.cancel();

        let report = service.warm_with(EntityType::Goal, &cancel).unwrap();
        assert_eq!(report.embedded, 0);
        assert_eq!(report.unavailable_or_failed, 3);
        assert_eq!(service.cache().adapter().provider().calls(), 0);
    }

    #[test]
    fn test_entity_deleted() {
        let service = service();
        service.warm(EntityType::Goal).unwrap();

        assert!(service.entity_deleted(EntityType::Goal, &"G1".into()).unwrap());
        assert!(!service.entity_deleted(EntityType::Goal, &"G1".into()).unwrap());
        assert!(!service.cache().has_embedding(EntityType::Goal, &"G1".into()).unwrap());
    }

    #[test]
    fn test_reconcile_removes_orphans() {
        let service = service();
        service.warm(EntityType::Goal).unwrap();
        service.repository().remove(EntityType::Goal, "G3");

        let result = service.reconcile(EntityType::Goal).unwrap();
        assert_eq!(result.scanned, 3);
        assert_eq!(result.removed, 1);

        let stats = service.statistics().unwrap();
        assert_eq!(stats.total_records, 2);
        assert_eq!(stats.count_by_entity_type.get(&EntityType::Goal), Some(&2));
    }

    #[test]
    fn test_duplicate_groups_and_related() {
        let service = service();
        service
            .repository()
            .insert(EntityType::Goal, PoolMember::new("G4", "Run 120 km this term"));

        let groups = service.duplicate_groups(EntityType::Goal).unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].members, vec![EntityId::from("G1"), EntityId::from("G4")]);

        let related = service
            .related(EntityType::Goal, "run 120km", 1, 0.0)
            .unwrap();
        assert_eq!(related.len(), 1);
    }

    #[test]
    fn test_config_drives_detector() {
        let mut config = DedupConfig::default();
        config.semantic_weight = 0.0;
        config.duplicate_threshold = 0.5;
        let service = DedupService::new(config, MemoryStore::new(), TrigramProvider::default(), goals());

        assert_eq!(service.detector().weights().lexical(), 1.0);
        assert_eq!(service.detector().threshold(), 0.5);

        // lexical only: 1 insertion over 20 chars
        let verdict = service
            .check_create(EntityType::Goal, "Run 120 km this term", "")
            .unwrap();
        assert!((verdict.similarity_score - 0.95).abs() < 1e-9);
    }
}
