//! cytomap: approximate nearest-neighbor annotation of expression profiles.
//!
//! Builds a product-quantization index over a labeled reference expression
//! matrix, searches it (alone or merged with further references) under
//! approximate cosine similarity, and assigns per-sample labels by
//! consensus over the top-w neighbors.
//!
//! ```text
//! reference matrix ──▶ normalize ──▶ chunk ──▶ k-means per chunk ─┐
//!                                                                 ▼
//!                                                          ReferenceIndex
//!                                                                 │
//! query matrix ──▶ feature alignment ──▶ multi-reference search ──┘
//!                                                │
//!                                                ▼
//!                            top-w neighbors ──▶ consensus labels
//! ```
//!
//! # Why product quantization?
//!
//! Scoring a query against all N reference samples exactly costs O(M·N)
//! per query over M feature chunks. Quantizing each chunk to k centroids
//! collapses that to O(M·k) centroid dot products, reused by every
//! reference sample through its cluster assignment: the classic trade of
//! a little accuracy for orders of magnitude less work.
//!
//! # Degraded inputs
//!
//! The engine absorbs, rather than propagates, the failure modes that show
//! up in real expression data: all-zero profiles stay zero through
//! normalization, a chunk whose clustering fails contributes nothing (and
//! is reported via [`ReferenceIndex::failed_chunks`]), and a chunk sharing
//! no features with the query drops out of the similarity exactly.
//! Misconfiguration (bad chunk/cluster counts, oversized `w`, shape
//! mismatches) is fatal and reported through [`AnnotateError`].

pub mod align;
pub mod classify;
pub mod error;
pub mod index;
pub mod kmeans;
pub mod linalg;
pub mod matrix;
pub mod partition;
pub mod persistence;
pub mod search;

pub use classify::{classify, DEFAULT_THRESHOLD, UNASSIGNED};
pub use error::{AnnotateError, Result};
pub use index::{ChunkCodebook, IndexParams, ReferenceIndex};
pub use matrix::ExpressionMatrix;
pub use persistence::{load_index, save_index, PersistenceError};
pub use search::{search, SearchResult, DEFAULT_W};
