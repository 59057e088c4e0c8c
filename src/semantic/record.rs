//! Persistent embedding records and their binary encoding.
//!
//! Record layout:
//!
//! Header (9 bytes):
//! - version: u8 (1)
//! - body_len: u32 (little-endian)
//! - checksum: u32 (CRC32 of body)
//!
//! Body:
//! - entity_type, entity_id, content_hash, model_identifier, source_text:
//!   each a u32 (little-endian) byte length followed by UTF-8 bytes
//! - generated_at: i64 unix millis (little-endian)
//! - stored_at: i64 unix millis (little-endian)
//! - dimensionality: u32 (little-endian)
//! - vector: [f32; dimensionality] (little-endian)

use chrono::{DateTime, TimeZone, Utc};

use crate::eid::{EntityId, EntityType};
use crate::semantic::embeddings::Embedding;
use crate::semantic::vector::{deserialize_vector, serialize_vector, VectorError};

/// Current record format version
const FORMAT_VERSION: u8 = 1;

/// Header size in bytes: version(1) + body_len(4) + checksum(4)
const HEADER_SIZE: usize = 9;

/// Errors that can occur while decoding a record.
#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error("Record truncated")]
    Truncated,

    #[error("Version mismatch: record version {0}, supported version {1}")]
    VersionMismatch(u8, u8),

    #[error("Checksum mismatch: record may be corrupted")]
    ChecksumMismatch,

    #[error("Invalid UTF-8 in record field")]
    InvalidUtf8,

    #[error("Invalid field: {0}")]
    InvalidField(String),

    #[error("Dimension mismatch: header says {expected}, vector has {got}")]
    DimensionMismatch { expected: usize, got: usize },
}

/// Identity of a cached record. At most one record exists per key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordKey {
    pub entity_type: EntityType,
    pub entity_id: EntityId,
}

impl RecordKey {
    pub fn new(entity_type: EntityType, entity_id: impl Into<EntityId>) -> Self {
        Self {
            entity_type,
            entity_id: entity_id.into(),
        }
    }
}

impl std::fmt::Display for RecordKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.entity_type, self.entity_id)
    }
}

/// A stored embedding for one entity.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedEmbeddingRecord {
    pub key: RecordKey,
    pub content_hash: String,
    pub source_text: String,
    /// Packed little-endian f32 values
    pub vector_bytes: Vec<u8>,
    pub model_identifier: String,
    pub dimensionality: usize,
    pub generated_at: DateTime<Utc>,
    pub stored_at: DateTime<Utc>,
}

impl CachedEmbeddingRecord {
    /// Build a record for `key` from a freshly generated embedding.
    pub fn from_embedding(key: RecordKey, embedding: &Embedding) -> Self {
        Self {
            key,
            content_hash: embedding.content_hash.clone(),
            source_text: embedding.source_text.clone(),
            vector_bytes: serialize_vector(&embedding.vector),
            model_identifier: embedding.model_identifier.clone(),
            dimensionality: embedding.vector.len(),
            generated_at: embedding.generated_at,
            stored_at: Utc::now(),
        }
    }

    /// Reconstruct the working embedding from the stored bytes.
    pub fn to_embedding(&self) -> Result<Embedding, VectorError> {
        let vector = deserialize_vector(&self.vector_bytes)?;
        if vector.len() != self.dimensionality {
            return Err(VectorError::DimensionMismatch {
                expected: self.dimensionality,
                actual: vector.len(),
            });
        }

        Ok(Embedding {
            vector,
            source_text: self.source_text.clone(),
            content_hash: self.content_hash.clone(),
            model_identifier: self.model_identifier.clone(),
            generated_at: self.generated_at,
        })
    }

    /// Bytes used by the stored vector.
    pub fn vector_size(&self) -> usize {
        self.vector_bytes.len()
    }

    /// Encode the record to its on-disk form.
    pub fn encode(&self) -> Vec<u8> {
        let mut body = Vec::with_capacity(64 + self.source_text.len() + self.vector_bytes.len());

        write_str(&mut body, self.key.entity_type.as_str());
        write_str(&mut body, &self.key.entity_id);
        write_str(&mut body, &self.content_hash);
        write_str(&mut body, &self.model_identifier);
        write_str(&mut body, &self.source_text);
        body.extend_from_slice(&self.generated_at.timestamp_millis().to_le_bytes());
        body.extend_from_slice(&self.stored_at.timestamp_millis().to_le_bytes());
        body.extend_from_slice(&(self.dimensionality as u32).to_le_bytes());
        body.extend_from_slice(&self.vector_bytes);

        let mut out = Vec::with_capacity(HEADER_SIZE + body.len());
        out.push(FORMAT_VERSION);
        out.extend_from_slice(&(body.len() as u32).to_le_bytes());
        out.extend_from_slice(&crc32fast::hash(&body).to_le_bytes());
        out.extend_from_slice(&body);
        out
    }

    /// Decode a record written by [`CachedEmbeddingRecord::encode`].
    pub fn decode(bytes: &[u8]) -> Result<Self, RecordError> {
        if bytes.len() < HEADER_SIZE {
            return Err(RecordError::Truncated);
        }

        let version = bytes[0];
        if version != FORMAT_VERSION {
            return Err(RecordError::VersionMismatch(version, FORMAT_VERSION));
        }

        let body_len = u32::from_le_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]) as usize;
        let stored_checksum = u32::from_le_bytes([bytes[5], bytes[6], bytes[7], bytes[8]]);

        let body = bytes
            .get(HEADER_SIZE..HEADER_SIZE + body_len)
            .ok_or(RecordError::Truncated)?;
        if crc32fast::hash(body) != stored_checksum {
            return Err(RecordError::ChecksumMismatch);
        }

        let mut reader = Reader { buf: body, pos: 0 };

        let entity_type = reader
            .read_str()?
            .parse::<EntityType>()
            .map_err(|e| RecordError::InvalidField(e.to_string()))?;
        let entity_id = EntityId::from(reader.read_str()?);
        let content_hash = reader.read_str()?;
        let model_identifier = reader.read_str()?;
        let source_text = reader.read_str()?;
        let generated_at = reader.read_timestamp()?;
        let stored_at = reader.read_timestamp()?;
        let dimensionality = reader.read_u32()? as usize;
        let vector_bytes = reader.rest().to_vec();

        if vector_bytes.len() != dimensionality * 4 {
            return Err(RecordError::DimensionMismatch {
                expected: dimensionality,
                got: vector_bytes.len() / 4,
            });
        }

        Ok(Self {
            key: RecordKey {
                entity_type,
                entity_id,
            },
            content_hash,
            source_text,
            vector_bytes,
            model_identifier,
            dimensionality,
            generated_at,
            stored_at,
        })
    }
}

fn write_str(out: &mut Vec<u8>, value: &str) {
    out.extend_from_slice(&(value.len() as u32).to_le_bytes());
    out.extend_from_slice(value.as_bytes());
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], RecordError> {
        let slice = self
            .buf
            .get(self.pos..self.pos + n)
            .ok_or(RecordError::Truncated)?;
        self.pos += n;
        Ok(slice)
    }

    fn read_u32(&mut self) -> Result<u32, RecordError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn read_i64(&mut self) -> Result<i64, RecordError> {
        let b = self.take(8)?;
        let mut arr = [0u8; 8];
        arr.copy_from_slice(b);
        Ok(i64::from_le_bytes(arr))
    }

    fn read_str(&mut self) -> Result<String, RecordError> {
        let len = self.read_u32()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| RecordError::InvalidUtf8)
    }

    fn read_timestamp(&mut self) -> Result<DateTime<Utc>, RecordError> {
        let millis = self.read_i64()?;
        Utc.timestamp_millis_opt(millis)
            .single()
            .ok_or_else(|| RecordError::InvalidField(format!("timestamp {millis}")))
    }

    fn rest(&self) -> &'a [u8] {
        &self.buf[self.pos..]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record() -> CachedEmbeddingRecord {
        let embedding = Embedding {
            vector: vec![0.25, -1.0, 3.5],
            source_text: "Run 120km this term".to_string(),
            content_hash: crate::semantic::preprocess::content_hash("Run 120km this term"),
            model_identifier: "test-model".to_string(),
            generated_at: Utc.timestamp_millis_opt(1_700_000_000_123).unwrap(),
        };
        let mut record =
            CachedEmbeddingRecord::from_embedding(RecordKey::new(EntityType::Goal, "G1"), &embedding);
        record.stored_at = Utc.timestamp_millis_opt(1_700_000_000_456).unwrap();
        record
    }

    #[test]
    fn test_encode_decode_preserves_fields() {
        let record = sample_record();
        let decoded = CachedEmbeddingRecord::decode(&record.encode()).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn test_to_embedding_restores_vector() {
        let record = sample_record();
        let embedding = record.to_embedding().unwrap();
        assert_eq!(embedding.vector, vec![0.25, -1.0, 3.5]);
        assert_eq!(embedding.model_identifier, "test-model");
        assert_eq!(record.dimensionality, 3);
        assert_eq!(record.vector_size(), 12);
    }

    #[test]
    fn test_checksum_detects_corruption() {
        let mut bytes = sample_record().encode();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;

        let result = CachedEmbeddingRecord::decode(&bytes);
        assert!(matches!(result, Err(RecordError::ChecksumMismatch)));
    }

    #[test]
    fn test_truncated_record_rejected() {
        let bytes = sample_record().encode();
        assert!(matches!(
            CachedEmbeddingRecord::decode(&bytes[..bytes.len() - 2]),
            Err(RecordError::Truncated)
        ));
        assert!(matches!(
            CachedEmbeddingRecord::decode(&bytes[..4]),
            Err(RecordError::Truncated)
        ));
    }

    #[test]
    fn test_future_version_rejected() {
        let mut bytes = sample_record().encode();
        bytes[0] = 9;
        assert!(matches!(
            CachedEmbeddingRecord::decode(&bytes),
            Err(RecordError::VersionMismatch(9, 1))
        ));
    }

    #[test]
    fn test_to_embedding_rejects_inconsistent_dimensionality() {
        let mut record = sample_record();
        record.dimensionality = 4;
        assert!(record.to_embedding().is_err());
    }
}
