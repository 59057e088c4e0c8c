//! Deterministic providers for tests.

use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, RwLock};
use std::thread::ThreadId;
use std::time::Duration;

use crate::eid::EntityType;
use crate::semantic::{EmbeddingError, EmbeddingProvider, EntityRepository, PoolMember};

/// Hashes character trigrams (whitespace removed) into a fixed number of
/// buckets and L2-normalizes the result. Texts that differ only in spacing
/// embed identically; small edits move the vector a little.
pub struct TrigramProvider {
    model: String,
    dimensions: usize,
}

impl TrigramProvider {
    pub const MODEL: &'static str = "trigram-test-v1";
    pub const DIMENSIONS: usize = 64;

    pub fn with_dimensions(dimensions: usize) -> Self {
        Self {
            model: Self::MODEL.to_string(),
            dimensions,
        }
    }

    pub fn with_model(model: &str) -> Self {
        Self {
            model: model.to_string(),
            dimensions: Self::DIMENSIONS,
        }
    }

    pub fn vectorize(text: &str, dimensions: usize) -> Vec<f64> {
        let chars: Vec<char> = text.chars().filter(|c| !c.is_whitespace()).collect();
        let mut vector = vec![0.0; dimensions];

        let grams: Vec<&[char]> = if chars.len() < 3 {
            vec![&chars[..]]
        } else {
            chars.windows(3).collect()
        };

        for gram in grams {
            let mut hasher = DefaultHasher::new();
            gram.hash(&mut hasher);
            vector[(hasher.finish() % dimensions as u64) as usize] += 1.0;
        }

        let norm = vector.iter().map(|x| x * x).sum::<f64>().sqrt();
        if norm > 0.0 {
            for x in &mut vector {
                *x /= norm;
            }
        }
        vector
    }
}

impl Default for TrigramProvider {
    fn default() -> Self {
        Self::with_dimensions(Self::DIMENSIONS)
    }
}

impl EmbeddingProvider for TrigramProvider {
    fn model_identifier(&self) -> &str {
        &self.model
    }

    fn embed(&self, text: &str) -> Result<Option<Vec<f64>>, EmbeddingError> {
        Ok(Some(Self::vectorize(text, self.dimensions)))
    }
}

/// Never has a model available.
pub struct UnavailableProvider;

impl EmbeddingProvider for UnavailableProvider {
    fn model_identifier(&self) -> &str {
        "unavailable"
    }

    fn embed(&self, _text: &str) -> Result<Option<Vec<f64>>, EmbeddingError> {
        Ok(None)
    }
}

/// Fails on a chosen input, or returns empty vectors for everything.
pub struct FailingProvider {
    failing_text: Option<String>,
}

impl FailingProvider {
    pub fn failing_on(text: &str) -> Self {
        Self {
            failing_text: Some(text.to_string()),
        }
    }

    pub fn empty_vectors() -> Self {
        Self { failing_text: None }
    }
}

impl EmbeddingProvider for FailingProvider {
    fn model_identifier(&self) -> &str {
        TrigramProvider::MODEL
    }

    fn embed(&self, text: &str) -> Result<Option<Vec<f64>>, EmbeddingError> {
        match &self.failing_text {
            None => Ok(Some(vec![])),
            Some(bad) if bad == text => Err(EmbeddingError::Provider(format!("cannot embed '{text}'"))),
            Some(_) => Ok(Some(TrigramProvider::vectorize(text, TrigramProvider::DIMENSIONS))),
        }
    }
}

/// Sleeps before embedding one particular input.
pub struct DelayedProvider {
    slow_text: String,
    delay: Duration,
}

impl DelayedProvider {
    pub fn new(slow_text: &str, delay: Duration) -> Self {
        Self {
            slow_text: slow_text.to_string(),
            delay,
        }
    }
}

impl EmbeddingProvider for DelayedProvider {
    fn model_identifier(&self) -> &str {
        TrigramProvider::MODEL
    }

    fn embed(&self, text: &str) -> Result<Option<Vec<f64>>, EmbeddingError> {
        if text == self.slow_text {
            std::thread::sleep(self.delay);
        }
        Ok(Some(TrigramProvider::vectorize(text, TrigramProvider::DIMENSIONS)))
    }
}

/// Counts calls to the wrapped provider.
pub struct CountingProvider<P> {
    inner: P,
    calls: AtomicUsize,
}

impl<P> CountingProvider<P> {
    pub fn new(inner: P) -> Self {
        Self {
            inner,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl<P: EmbeddingProvider> EmbeddingProvider for CountingProvider<P> {
    fn model_identifier(&self) -> &str {
        self.inner.model_identifier()
    }

    fn embed(&self, text: &str) -> Result<Option<Vec<f64>>, EmbeddingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.embed(text)
    }
}

/// Returns the same vector for every input.
pub struct ConstantProvider {
    vector: Vec<f64>,
}

impl ConstantProvider {
    pub fn new(vector: Vec<f64>) -> Self {
        Self { vector }
    }
}

impl EmbeddingProvider for ConstantProvider {
    fn model_identifier(&self) -> &str {
        "constant"
    }

    fn embed(&self, _text: &str) -> Result<Option<Vec<f64>>, EmbeddingError> {
        Ok(Some(self.vector.clone()))
    }
}

/// Records which threads called `embed`.
#[derive(Default)]
pub struct ThreadRecordingProvider {
    threads: Mutex<HashSet<ThreadId>>,
}

impl ThreadRecordingProvider {
    pub fn threads(&self) -> HashSet<ThreadId> {
        self.threads.lock().unwrap().clone()
    }
}

impl EmbeddingProvider for ThreadRecordingProvider {
    fn model_identifier(&self) -> &str {
        TrigramProvider::MODEL
    }

    fn embed(&self, text: &str) -> Result<Option<Vec<f64>>, EmbeddingError> {
        self.threads.lock().unwrap().insert(std::thread::current().id());
        Ok(Some(TrigramProvider::vectorize(text, TrigramProvider::DIMENSIONS)))
    }
}

/// In-memory entity repository that can be switched to fail.
#[derive(Default)]
pub struct MemoryRepository {
    entities: RwLock<HashMap<EntityType, Vec<PoolMember>>>,
    failing: AtomicBool,
}

impl MemoryRepository {
    pub fn with(entity_type: EntityType, members: Vec<PoolMember>) -> Self {
        let repo = Self::default();
        repo.entities.write().unwrap().insert(entity_type, members);
        repo
    }

    pub fn insert(&self, entity_type: EntityType, member: PoolMember) {
        self.entities
            .write()
            .unwrap()
            .entry(entity_type)
            .or_default()
            .push(member);
    }

    pub fn remove(&self, entity_type: EntityType, id: &str) {
        if let Some(members) = self.entities.write().unwrap().get_mut(&entity_type) {
            members.retain(|m| m.id.as_str() != id);
        }
    }

    pub fn fail(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }
}

impl EntityRepository for MemoryRepository {
    fn fetch_all(&self, entity_type: EntityType) -> anyhow::Result<Vec<PoolMember>> {
        if self.failing.load(Ordering::SeqCst) {
            anyhow::bail!("repository offline");
        }
        Ok(self
            .entities
            .read()
            .unwrap()
            .get(&entity_type)
            .cloned()
            .unwrap_or_default())
    }
}
