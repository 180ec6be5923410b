//! On-disk format for a built [`ReferenceIndex`].
//!
//! Single file: 4 magic bytes, little-endian `u32` format version, then the
//! postcard-encoded index. An index is built once and reused across many
//! searches, so round-tripping it through disk is the common deployment
//! path.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::index::ReferenceIndex;

/// Magic bytes for index files.
pub const INDEX_MAGIC: [u8; 4] = *b"CYIX";

/// Current format version.
pub const FORMAT_VERSION: u32 = 1;

/// Errors that can occur while saving or loading an index.
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// I/O error (file operations).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Format error (bad magic bytes, unknown version, truncated file).
    #[error("format error: {0}")]
    Format(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Deserialization error.
    #[error("deserialization error: {0}")]
    Deserialization(String),
}

/// Write an index to `path`, replacing any existing file.
pub fn save_index(index: &ReferenceIndex, path: impl AsRef<Path>) -> Result<(), PersistenceError> {
    let payload = postcard::to_allocvec(index)
        .map_err(|e| PersistenceError::Serialization(e.to_string()))?;

    let mut bytes = Vec::with_capacity(8 + payload.len());
    bytes.extend_from_slice(&INDEX_MAGIC);
    bytes.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    bytes.extend_from_slice(&payload);
    fs::write(path, bytes)?;
    Ok(())
}

/// Read an index previously written by [`save_index`].
pub fn load_index(path: impl AsRef<Path>) -> Result<ReferenceIndex, PersistenceError> {
    let bytes = fs::read(path)?;
    if bytes.len() < 8 {
        return Err(PersistenceError::Format("file too short".to_string()));
    }
    if bytes[..4] != INDEX_MAGIC {
        return Err(PersistenceError::Format("bad magic bytes".to_string()));
    }
    let version = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
    if version != FORMAT_VERSION {
        return Err(PersistenceError::Format(format!(
            "unsupported format version {version} (expected {FORMAT_VERSION})"
        )));
    }
    postcard::from_bytes(&bytes[8..]).map_err(|e| PersistenceError::Deserialization(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::IndexParams;
    use crate::matrix::ExpressionMatrix;

    fn small_index() -> ReferenceIndex {
        let num_features = 4;
        let num_samples = 6;
        let values: Vec<f32> = (0..num_features * num_samples)
            .map(|i| (i as f32 * 0.53).sin() + 1.5)
            .collect();
        let ids = (0..num_features).map(|f| format!("gene{f}")).collect();
        let matrix = ExpressionMatrix::new(ids, values, num_samples).unwrap();
        ReferenceIndex::build(
            &matrix,
            &IndexParams {
                num_chunks: 2,
                seed: Some(21),
                ..Default::default()
            },
        )
        .unwrap()
    }

    #[test]
    fn round_trip_preserves_the_index() {
        let index = small_index();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reference.idx");

        save_index(&index, &path).unwrap();
        let loaded = load_index(&path).unwrap();

        assert_eq!(loaded.num_chunks(), index.num_chunks());
        assert_eq!(loaded.num_clusters(), index.num_clusters());
        assert_eq!(loaded.num_samples(), index.num_samples());
        assert_eq!(loaded.failed_chunks(), index.failed_chunks());
        for m in 0..index.num_chunks() {
            assert_eq!(loaded.chunk(m).feature_ids(), index.chunk(m).feature_ids());
            for c in 0..index.num_clusters() {
                assert_eq!(loaded.chunk(m).centroid(c), index.chunk(m).centroid(c));
            }
            for n in 0..index.num_samples() {
                assert_eq!(loaded.assignment(m, n), index.assignment(m, n));
            }
        }
    }

    #[test]
    fn rejects_bad_magic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("not-an-index");
        std::fs::write(&path, b"XXXX\x01\x00\x00\x00rest").unwrap();
        let err = load_index(&path).unwrap_err();
        assert!(matches!(err, PersistenceError::Format(_)));
    }

    #[test]
    fn rejects_unknown_version() {
        let index = small_index();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reference.idx");
        save_index(&index, &path).unwrap();

        let mut bytes = std::fs::read(&path).unwrap();
        bytes[4..8].copy_from_slice(&99u32.to_le_bytes());
        std::fs::write(&path, bytes).unwrap();

        let err = load_index(&path).unwrap_err();
        assert!(matches!(err, PersistenceError::Format(_)));
    }

    #[test]
    fn rejects_truncated_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stub");
        std::fs::write(&path, b"CY").unwrap();
        let err = load_index(&path).unwrap_err();
        assert!(matches!(err, PersistenceError::Format(_)));
    }
}
