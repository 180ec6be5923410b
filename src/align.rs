//! Feature alignment between a query batch and a chunk codebook.
//!
//! Reference and query matrices may carry features in unrelated orders or
//! with unrelated supersets. Alignment computes the intersection of a
//! chunk's feature ids with the query's, in a stable lexicographic order,
//! so the searcher can take dot products row-for-row.

use std::collections::HashMap;

use crate::index::ChunkCodebook;
use crate::matrix::ExpressionMatrix;

/// Feature-id → row lookup, built once per matrix and reused across every
/// chunk and every search call.
pub struct FeatureMap<'a> {
    rows: HashMap<&'a str, usize>,
}

impl<'a> FeatureMap<'a> {
    #[must_use]
    pub fn new(matrix: &'a ExpressionMatrix) -> Self {
        let rows = matrix
            .feature_ids()
            .iter()
            .enumerate()
            .map(|(row, id)| (id.as_str(), row))
            .collect();
        Self { rows }
    }

    #[must_use]
    pub fn row(&self, feature_id: &str) -> Option<usize> {
        self.rows.get(feature_id).copied()
    }
}

/// Row-for-row alignment of one chunk against a query batch.
///
/// `codebook_rows[i]` and `query_rows[i]` address the same feature in the
/// codebook block and the query matrix respectively, sorted by feature id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkAlignment {
    pub codebook_rows: Vec<usize>,
    pub query_rows: Vec<usize>,
}

impl ChunkAlignment {
    /// True when the chunk shares no features with the query; such a chunk
    /// contributes exactly zero to every similarity.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.codebook_rows.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.codebook_rows.len()
    }
}

/// Intersect a chunk's feature ids with the query's and order the result
/// lexicographically by feature id.
#[must_use]
pub fn align_chunk(codebook: &ChunkCodebook, query: &FeatureMap<'_>) -> ChunkAlignment {
    let mut matched: Vec<(&str, usize, usize)> = codebook
        .feature_ids()
        .iter()
        .enumerate()
        .filter_map(|(cb_row, id)| query.row(id).map(|q_row| (id.as_str(), cb_row, q_row)))
        .collect();
    matched.sort_unstable_by(|a, b| a.0.cmp(b.0));

    let mut codebook_rows = Vec::with_capacity(matched.len());
    let mut query_rows = Vec::with_capacity(matched.len());
    for (_, cb_row, q_row) in matched {
        codebook_rows.push(cb_row);
        query_rows.push(q_row);
    }
    ChunkAlignment {
        codebook_rows,
        query_rows,
    }
}
