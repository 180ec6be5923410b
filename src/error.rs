//! Error types for index building, search and classification.

use thiserror::Error;

/// Errors that can occur during index building, search or classification.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum AnnotateError {
    /// Invalid parameter or input shape (chunk count, cluster count, w, empty input).
    #[error("invalid configuration: {0}")]
    Config(String),

    /// k-means failed on a block of features.
    ///
    /// During an index build this is absorbed per chunk and surfaced via
    /// [`crate::ReferenceIndex::failed_chunks`]; it only aborts the build
    /// when every chunk fails.
    #[error("clustering failed: {0}")]
    Clustering(String),

    /// Incompatible matrix shapes between query and reference.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

pub type Result<T> = std::result::Result<T, AnnotateError>;
