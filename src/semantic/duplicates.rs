//! Near-duplicate detection for planning entities.
//!
//! A candidate is compared against a pool of existing entities of the same
//! type:
//! 1. Exact match on normalized text short-circuits with score 1.0
//! 2. Otherwise every member gets a hybrid score (semantic + lexical)
//! 3. The best member is a duplicate if its score exceeds the threshold
//!
//! Without embeddings the semantic term is 0 and the detector runs on the
//! weighted lexical term alone.

use serde::Serialize;

use crate::config::DedupConfig;
use crate::eid::{EntityId, EntityType};
use crate::semantic::cache::{BatchItem, CacheError, EmbeddingCache};
use crate::semantic::embeddings::{Embedding, EmbeddingError, EmbeddingProvider};
use crate::semantic::hybrid::HybridWeights;
use crate::semantic::index::{find_similar, SearchResult};
use crate::semantic::lexical::normalized_edit_similarity;
use crate::semantic::preprocess::normalize_text;
use crate::semantic::vector::cosine_similarity;
use crate::storage::EmbeddingStore;

/// Default combined score a match must exceed to count as a duplicate.
pub const DEFAULT_DUPLICATE_THRESHOLD: f64 = 0.85;

#[derive(Debug, thiserror::Error)]
pub enum DetectorError {
    #[error("Candidate text is empty")]
    EmptyText,

    #[error("Embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Repository(#[from] anyhow::Error),
}

/// Source of the comparison pool for an entity type.
pub trait EntityRepository: Send + Sync {
    /// Every live entity of `entity_type` with its deduplication text.
    fn fetch_all(&self, entity_type: EntityType) -> anyhow::Result<Vec<PoolMember>>;
}

/// An existing entity to compare against.
#[derive(Debug, Clone, PartialEq)]
pub struct PoolMember {
    pub id: EntityId,
    /// Deduplication-relevant text (title, or title + description)
    pub text: String,
}

impl PoolMember {
    pub fn new(id: impl Into<EntityId>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchKind {
    Exact,
    Hybrid,
    None,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DuplicationVerdict {
    pub is_duplicate: bool,
    /// Combined score of the best member, in [0.0, 1.0]
    pub similarity_score: f64,
    /// Set when `is_duplicate`
    pub matched_entity_id: Option<EntityId>,
    pub match_kind: MatchKind,
}

impl DuplicationVerdict {
    fn exact(id: &EntityId) -> Self {
        Self {
            is_duplicate: true,
            similarity_score: 1.0,
            matched_entity_id: Some(id.clone()),
            match_kind: MatchKind::Exact,
        }
    }

    fn none(score: f64) -> Self {
        Self {
            is_duplicate: false,
            similarity_score: score,
            matched_entity_id: None,
            match_kind: MatchKind::None,
        }
    }
}

/// Breakdown of one member's score.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemberScore {
    pub id: EntityId,
    /// `None` when either side had no comparable embedding
    pub semantic: Option<f64>,
    pub lexical: f64,
    pub combined: f64,
}

/// Pool members that are near-duplicates of each other.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DuplicateGroup {
    /// In pool order
    pub members: Vec<EntityId>,
    /// Highest pairwise score that linked the group
    pub score: f64,
}

pub struct DuplicationDetector<S, P> {
    cache: EmbeddingCache<S, P>,
    weights: HybridWeights,
    threshold: f64,
}

impl<S: EmbeddingStore, P: EmbeddingProvider> DuplicationDetector<S, P> {
    pub fn new(cache: EmbeddingCache<S, P>) -> Self {
        Self {
            cache,
            weights: HybridWeights::default(),
            threshold: DEFAULT_DUPLICATE_THRESHOLD,
        }
    }

    pub fn from_config(cache: EmbeddingCache<S, P>, config: &DedupConfig) -> Self {
        Self::new(cache.with_parallelism(config.parallelism()))
            .with_weights(config.weights())
            .with_threshold(config.duplicate_threshold)
    }

    pub fn with_weights(mut self, weights: HybridWeights) -> Self {
        self.weights = weights;
        self
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn cache(&self) -> &EmbeddingCache<S, P> {
        &self.cache
    }

    pub fn weights(&self) -> HybridWeights {
        self.weights
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Decide whether `candidate_text` duplicates any member of `pool`.
    ///
    /// The candidate is not yet persisted, so its embedding is generated
    /// without being cached. Pool members go through the cache.
    pub fn check_duplicate(
        &self,
        candidate_text: &str,
        entity_type: EntityType,
        pool: &[PoolMember],
    ) -> Result<DuplicationVerdict, DetectorError> {
        let candidate = normalize_text(candidate_text);
        if candidate.is_empty() {
            return Err(DetectorError::EmptyText);
        }

        if let Some(member) = pool.iter().find(|m| normalize_text(&m.text) == candidate) {
            log::debug!("exact duplicate of {entity_type}/{}", member.id);
            return Ok(DuplicationVerdict::exact(&member.id));
        }

        let scores = self.score_pool(candidate_text, entity_type, pool)?;

        let mut best: Option<&MemberScore> = None;
        for score in &scores {
            if best.map_or(true, |b| score.combined > b.combined) {
                best = Some(score);
            }
        }

        let Some(best) = best else {
            return Ok(DuplicationVerdict::none(0.0));
        };

        if best.combined > self.threshold {
            log::debug!(
                "hybrid duplicate of {entity_type}/{} (score={:.3})",
                best.id,
                best.combined
            );
            Ok(DuplicationVerdict {
                is_duplicate: true,
                similarity_score: best.combined,
                matched_entity_id: Some(best.id.clone()),
                match_kind: MatchKind::Hybrid,
            })
        } else {
            Ok(DuplicationVerdict::none(best.combined))
        }
    }

    /// Hybrid score of `candidate_text` against every pool member, in pool
    /// order. No exact-match short-circuit.
    pub fn score_pool(
        &self,
        candidate_text: &str,
        entity_type: EntityType,
        pool: &[PoolMember],
    ) -> Result<Vec<MemberScore>, DetectorError> {
        let candidate_embedding = self.candidate_embedding(candidate_text)?;

        // Pool embeddings are only useful when there is something to compare them to
        let member_embeddings = match &candidate_embedding {
            Some(_) => self.pool_embeddings(entity_type, pool)?,
            None => vec![None; pool.len()],
        };

        Ok(pool
            .iter()
            .zip(member_embeddings.iter())
            .map(|(member, member_embedding)| {
                let semantic = match (&candidate_embedding, member_embedding) {
                    (Some(c), Some(m)) => semantic_similarity(c, m, &member.id),
                    _ => None,
                };
                let lexical = normalized_edit_similarity(candidate_text, &member.text);

                MemberScore {
                    id: member.id.clone(),
                    semantic,
                    lexical,
                    combined: self.weights.combine(semantic, lexical),
                }
            })
            .collect())
    }

    /// Group existing pool members that duplicate each other.
    ///
    /// Every pair is scored, so this is quadratic in the pool size.
    pub fn find_duplicate_groups(
        &self,
        entity_type: EntityType,
        pool: &[PoolMember],
    ) -> Result<Vec<DuplicateGroup>, DetectorError> {
        let embeddings = self.pool_embeddings(entity_type, pool)?;
        let normalized: Vec<String> = pool.iter().map(|m| normalize_text(&m.text)).collect();

        let mut parent: Vec<usize> = (0..pool.len()).collect();
        let mut best_link = vec![0.0f64; pool.len()];

        for i in 0..pool.len() {
            if normalized[i].is_empty() {
                continue;
            }
            for j in (i + 1)..pool.len() {
                if normalized[j].is_empty() {
                    continue;
                }

                let score = if normalized[i] == normalized[j] {
                    1.0
                } else {
                    let semantic = match (&embeddings[i], &embeddings[j]) {
                        (Some(a), Some(b)) => semantic_similarity(a, b, &pool[j].id),
                        _ => None,
                    };
                    let lexical = normalized_edit_similarity(&pool[i].text, &pool[j].text);
                    let combined = self.weights.combine(semantic, lexical);
                    if combined <= self.threshold {
                        continue;
                    }
                    combined
                };

                let linked = best_link[find(&mut parent, i)]
                    .max(best_link[find(&mut parent, j)])
                    .max(score);
                let root = union(&mut parent, i, j);
                best_link[root] = linked;
            }
        }

        let mut groups: Vec<(usize, DuplicateGroup)> = Vec::new();
        for idx in 0..pool.len() {
            let root = find(&mut parent, idx);
            match groups.iter_mut().find(|(r, _)| *r == root) {
                Some((_, group)) => group.members.push(pool[idx].id.clone()),
                None => groups.push((
                    root,
                    DuplicateGroup {
                        members: vec![pool[idx].id.clone()],
                        score: 0.0,
                    },
                )),
            }
        }

        let groups: Vec<DuplicateGroup> = groups
            .into_iter()
            .filter(|(_, group)| group.members.len() > 1)
            .map(|(root, mut group)| {
                group.score = best_link[root];
                group
            })
            .collect();

        log::info!(
            "found {} duplicate groups among {} {entity_type} entries",
            groups.len(),
            pool.len()
        );

        Ok(groups)
    }

    /// Rank pool members by similarity to `text`.
    ///
    /// Uses embeddings when the candidate has one, edit similarity otherwise.
    pub fn find_similar_entities(
        &self,
        text: &str,
        entity_type: EntityType,
        pool: &[PoolMember],
        limit: usize,
        threshold: f64,
    ) -> Result<Vec<SearchResult>, DetectorError> {
        if normalize_text(text).is_empty() {
            return Err(DetectorError::EmptyText);
        }

        if let Some(query) = self.candidate_embedding(text)? {
            let candidates: Vec<(EntityId, Embedding)> = pool
                .iter()
                .zip(self.pool_embeddings(entity_type, pool)?)
                .filter_map(|(member, embedding)| embedding.map(|e| (member.id.clone(), e)))
                .collect();
            return Ok(find_similar(&query, &candidates, limit, threshold));
        }

        let mut results: Vec<SearchResult> = pool
            .iter()
            .map(|member| SearchResult {
                id: member.id.clone(),
                score: normalized_edit_similarity(text, &member.text),
            })
            .filter(|r| r.score >= threshold)
            .collect();
        results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        results.truncate(limit);

        Ok(results)
    }

    fn candidate_embedding(&self, text: &str) -> Result<Option<Embedding>, DetectorError> {
        match self.cache.adapter().generate(text) {
            Err(EmbeddingError::EmptyText) => Err(DetectorError::EmptyText),
            other => Ok(other?),
        }
    }

    fn pool_embeddings(
        &self,
        entity_type: EntityType,
        pool: &[PoolMember],
    ) -> Result<Vec<Option<Embedding>>, DetectorError> {
        let items: Vec<BatchItem> = pool
            .iter()
            .map(|m| BatchItem::new(m.text.clone(), entity_type, m.id.clone()))
            .collect();
        Ok(self.cache.get_or_generate_batch(&items)?)
    }
}

/// Cosine similarity between embeddings from the same model; `None` (and a
/// warning) for anything else.
fn semantic_similarity(a: &Embedding, b: &Embedding, member: &EntityId) -> Option<f64> {
    if a.model_identifier != b.model_identifier {
        log::warn!(
            "skipping semantic comparison with {member}: model '{}' vs '{}'",
            a.model_identifier,
            b.model_identifier
        );
        return None;
    }

    match cosine_similarity(&a.vector, &b.vector) {
        Ok(score) => Some(score),
        Err(e) => {
            log::warn!("skipping semantic comparison with {member}: {e}");
            None
        }
    }
}

fn find(parent: &mut [usize], mut x: usize) -> usize {
    while parent[x] != x {
        parent[x] = parent[parent[x]];
        x = parent[x];
    }
    x
}

/// Returns the root of the merged set; the lower index wins so groups keep
/// pool order.
fn union(parent: &mut [usize], a: usize, b: usize) -> usize {
    let ra = find(parent, a);
    let rb = find(parent, b);
    let (root, child) = if ra <= rb { (ra, rb) } else { (rb, ra) };
    parent[child] = root;
    root
}
