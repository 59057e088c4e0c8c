//! Record stores for cached embeddings.
//!
//! The cache only needs point access by `(entity type, entity id)` and a full
//! scan. Writes replace a whole record at once; readers never observe a
//! partially written record.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use sha2::{Digest, Sha256};

use crate::semantic::preprocess::to_hex;
use crate::semantic::record::{CachedEmbeddingRecord, RecordError, RecordKey};

const RECORD_EXTENSION: &str = "rec";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("record error in {path}: {source}")]
    Record {
        path: String,
        #[source]
        source: RecordError,
    },

    #[error("store lock poisoned: {0}")]
    Poisoned(String),
}

pub trait EmbeddingStore: Send + Sync {
    fn read(&self, key: &RecordKey) -> Result<Option<CachedEmbeddingRecord>, StoreError>;
    /// Insert or fully replace the record for `record.key`.
    fn upsert(&self, record: &CachedEmbeddingRecord) -> Result<(), StoreError>;
    /// Returns whether a record was removed.
    fn delete(&self, key: &RecordKey) -> Result<bool, StoreError>;
    fn exists(&self, key: &RecordKey) -> Result<bool, StoreError>;
    fn scan(&self) -> Result<Vec<CachedEmbeddingRecord>, StoreError>;
}

impl<S: EmbeddingStore + ?Sized> EmbeddingStore for std::sync::Arc<S> {
    fn read(&self, key: &RecordKey) -> Result<Option<CachedEmbeddingRecord>, StoreError> {
        (**self).read(key)
    }

    fn upsert(&self, record: &CachedEmbeddingRecord) -> Result<(), StoreError> {
        (**self).upsert(record)
    }

    fn delete(&self, key: &RecordKey) -> Result<bool, StoreError> {
        (**self).delete(key)
    }

    fn exists(&self, key: &RecordKey) -> Result<bool, StoreError> {
        (**self).exists(key)
    }

    fn scan(&self) -> Result<Vec<CachedEmbeddingRecord>, StoreError> {
        (**self).scan()
    }
}

/// Process-local store, mostly useful for tests and short-lived tools.
#[derive(Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<RecordKey, CachedEmbeddingRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> Result<usize, StoreError> {
        Ok(self.records.read().map_err(poisoned)?.len())
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }
}

fn poisoned<T>(e: std::sync::PoisonError<T>) -> StoreError {
    StoreError::Poisoned(e.to_string())
}

impl EmbeddingStore for MemoryStore {
    fn read(&self, key: &RecordKey) -> Result<Option<CachedEmbeddingRecord>, StoreError> {
        Ok(self.records.read().map_err(poisoned)?.get(key).cloned())
    }

    fn upsert(&self, record: &CachedEmbeddingRecord) -> Result<(), StoreError> {
        self.records
            .write()
            .map_err(poisoned)?
            .insert(record.key.clone(), record.clone());
        Ok(())
    }

    fn delete(&self, key: &RecordKey) -> Result<bool, StoreError> {
        Ok(self.records.write().map_err(poisoned)?.remove(key).is_some())
    }

    fn exists(&self, key: &RecordKey) -> Result<bool, StoreError> {
        Ok(self.records.read().map_err(poisoned)?.contains_key(key))
    }

    fn scan(&self) -> Result<Vec<CachedEmbeddingRecord>, StoreError> {
        Ok(self.records.read().map_err(poisoned)?.values().cloned().collect())
    }
}

/// Directory-backed store, one file per record.
///
/// Writes go to a uniquely named temp file and are renamed into place, so a
/// concurrent reader sees either the old or the new record.
#[derive(Clone)]
pub struct FileStore {
    pub base_dir: PathBuf,
}

impl FileStore {
    pub fn new(storage_dir: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = storage_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&path)?;
        Ok(FileStore { base_dir: path })
    }

    fn record_path(&self, key: &RecordKey) -> PathBuf {
        // Entity ids are caller-controlled; hash them into a safe file name
        let id_hash = to_hex(&Sha256::digest(key.entity_id.as_bytes()));
        self.base_dir
            .join(format!("{}-{}.{}", key.entity_type, id_hash, RECORD_EXTENSION))
    }

    fn read_path(path: &Path) -> Result<Option<CachedEmbeddingRecord>, StoreError> {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        CachedEmbeddingRecord::decode(&bytes)
            .map(Some)
            .map_err(|source| StoreError::Record {
                path: path.display().to_string(),
                source,
            })
    }
}

impl EmbeddingStore for FileStore {
    fn read(&self, key: &RecordKey) -> Result<Option<CachedEmbeddingRecord>, StoreError> {
        Self::read_path(&self.record_path(key))
    }

    fn upsert(&self, record: &CachedEmbeddingRecord) -> Result<(), StoreError> {
        let path = self.record_path(&record.key);
        let temp_path = self
            .base_dir
            .join(format!(".{}.tmp", rusty_ulid::generate_ulid_string()));

        if let Err(e) = write_synced(&temp_path, &record.encode()) {
            let _ = std::fs::remove_file(&temp_path);
            return Err(e.into());
        }

        std::fs::rename(&temp_path, &path).map_err(|e| {
            let _ = std::fs::remove_file(&temp_path);
            StoreError::from(e)
        })
    }

    fn delete(&self, key: &RecordKey) -> Result<bool, StoreError> {
        match std::fs::remove_file(self.record_path(key)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn exists(&self, key: &RecordKey) -> Result<bool, StoreError> {
        match std::fs::metadata(self.record_path(key)) {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn scan(&self) -> Result<Vec<CachedEmbeddingRecord>, StoreError> {
        let mut records = Vec::new();

        for entry in std::fs::read_dir(&self.base_dir)? {
            let path = entry?.path();
            let is_record = path.is_file()
                && path.extension().and_then(|ext| ext.to_str()) == Some(RECORD_EXTENSION);
            if !is_record {
                continue;
            }

            match Self::read_path(&path) {
                Ok(Some(record)) => records.push(record),
                // Deleted between read_dir and read
                Ok(None) => {}
                Err(StoreError::Record { path, source }) => {
                    log::warn!("skipping unreadable record {path}: {source}");
                }
                Err(e) => return Err(e),
            }
        }

        Ok(records)
    }
}

/// Data must be on disk before the rename publishes it.
fn write_synced(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = std::fs::File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}
