//! Reference index: per-chunk codebooks plus cluster assignments.
//!
//! The index compresses a reference matrix the product-quantization way:
//! split the (normalized) feature space into M contiguous chunks, cluster
//! each chunk independently with k-means, and keep only the k unit-length
//! subcentroids per chunk plus each sample's cluster id. Approximate
//! similarity to all N reference samples then costs O(M·k) centroid dot
//! products per query instead of O(M·N) exact comparisons.
//!
//! A chunk whose clustering fails degrades to an all-zero 1×k block that
//! contributes nothing to any similarity; the build only fails when every
//! chunk does.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{AnnotateError, Result};
use crate::kmeans::KMeans;
use crate::linalg;
use crate::matrix::ExpressionMatrix;
use crate::partition;

/// Build parameters for [`ReferenceIndex::build`].
#[derive(Clone, Debug)]
pub struct IndexParams {
    /// Number of feature chunks (M).
    pub num_chunks: usize,

    /// Clusters per chunk (k). Defaults to `floor(sqrt(num_samples))`.
    pub num_clusters: Option<usize>,

    /// Deterministic seed for k-means++ initialization. Each chunk derives
    /// its own seed from this value; unset draws from entropy.
    pub seed: Option<u64>,
}

impl Default for IndexParams {
    fn default() -> Self {
        Self {
            num_chunks: 100,
            num_clusters: None,
            seed: None,
        }
    }
}

/// Codebook for one feature chunk: k centroid columns over the chunk's rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkCodebook {
    /// Feature ids of the chunk's rows, in original reference order.
    /// Empty for a degenerate (failed) chunk.
    feature_ids: Vec<String>,
    /// Centroid-major storage: centroid `c` occupies
    /// `centroids[c * dim .. (c + 1) * dim]`. Each non-degenerate centroid
    /// has unit L2 norm.
    centroids: Vec<f32>,
    dim: usize,
    num_clusters: usize,
}

impl ChunkCodebook {
    fn degenerate(num_clusters: usize) -> Self {
        Self {
            feature_ids: Vec::new(),
            centroids: vec![0.0; num_clusters],
            dim: 1,
            num_clusters,
        }
    }

    /// Feature ids of the chunk's rows (empty when degenerate).
    #[must_use]
    pub fn feature_ids(&self) -> &[String] {
        &self.feature_ids
    }

    /// One centroid as a contiguous slice of `dim` values.
    #[must_use]
    pub fn centroid(&self, c: usize) -> &[f32] {
        let start = c * self.dim;
        &self.centroids[start..start + self.dim]
    }

    #[must_use]
    pub fn dim(&self) -> usize {
        self.dim
    }

    #[must_use]
    pub fn num_clusters(&self) -> usize {
        self.num_clusters
    }

    /// True when this chunk's clustering failed and the block is all-zero.
    #[must_use]
    pub fn is_degenerate(&self) -> bool {
        self.feature_ids.is_empty()
    }
}

/// Outcome of quantizing one chunk.
enum ChunkOutcome {
    Built {
        codebook: ChunkCodebook,
        /// 1-indexed cluster id per reference sample.
        assignments: Vec<u32>,
    },
    Failed,
}

/// Immutable product-quantization index over one reference dataset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferenceIndex {
    chunks: Vec<ChunkCodebook>,
    /// Flattened M×N matrix, chunk-major: entry `(m, n)` at `m * N + n`.
    /// Values are 1-indexed cluster ids in `[1, k]`.
    assignments: Vec<u32>,
    num_chunks: usize,
    num_clusters: usize,
    num_samples: usize,
    /// Chunk indices whose clustering failed, for index-quality audits.
    failed_chunks: Vec<usize>,
}

impl ReferenceIndex {
    /// Build an index from a reference matrix.
    ///
    /// The reference columns are L2-normalized internally; the caller's
    /// matrix is only read. Chunks are quantized independently and in
    /// parallel; a failed chunk is recorded in [`Self::failed_chunks`] and
    /// degrades to zero contribution rather than aborting the build.
    pub fn build(reference: &ExpressionMatrix, params: &IndexParams) -> Result<Self> {
        let num_samples = reference.num_samples();
        if num_samples == 0 {
            return Err(AnnotateError::Config("reference has no samples".into()));
        }

        let num_clusters = match params.num_clusters {
            Some(k) => k,
            None => (num_samples as f64).sqrt().floor() as usize,
        };
        if num_clusters == 0 {
            return Err(AnnotateError::Config(
                "cluster count must be greater than 0".into(),
            ));
        }
        if num_clusters > num_samples {
            return Err(AnnotateError::Config(format!(
                "cluster count {num_clusters} exceeds sample count {num_samples}"
            )));
        }

        let ranges = partition::chunk_ranges(reference.num_features(), params.num_chunks)?;
        let normalized = reference.l2_normalized();

        let outcomes: Vec<ChunkOutcome> = ranges
            .par_iter()
            .enumerate()
            .map(|(m, range)| {
                quantize_chunk(&normalized, range.clone(), num_clusters, params.seed, m)
            })
            .collect();

        let mut chunks = Vec::with_capacity(outcomes.len());
        let mut assignments = Vec::with_capacity(outcomes.len() * num_samples);
        let mut failed_chunks = Vec::new();

        for (m, outcome) in outcomes.into_iter().enumerate() {
            match outcome {
                ChunkOutcome::Built {
                    codebook,
                    assignments: chunk_assignments,
                } => {
                    chunks.push(codebook);
                    assignments.extend_from_slice(&chunk_assignments);
                }
                ChunkOutcome::Failed => {
                    chunks.push(ChunkCodebook::degenerate(num_clusters));
                    assignments.extend(std::iter::repeat(1).take(num_samples));
                    failed_chunks.push(m);
                }
            }
        }

        if failed_chunks.len() == chunks.len() {
            return Err(AnnotateError::Config(
                "clustering failed in every chunk; the index would carry no information".into(),
            ));
        }

        Ok(Self {
            num_chunks: chunks.len(),
            num_clusters,
            num_samples,
            chunks,
            assignments,
            failed_chunks,
        })
    }

    #[must_use]
    pub fn num_chunks(&self) -> usize {
        self.num_chunks
    }

    #[must_use]
    pub fn num_clusters(&self) -> usize {
        self.num_clusters
    }

    #[must_use]
    pub fn num_samples(&self) -> usize {
        self.num_samples
    }

    /// Chunk indices whose clustering failed during the build.
    #[must_use]
    pub fn failed_chunks(&self) -> &[usize] {
        &self.failed_chunks
    }

    #[must_use]
    pub fn chunk(&self, m: usize) -> &ChunkCodebook {
        &self.chunks[m]
    }

    /// 1-indexed cluster id of reference sample `n` in chunk `m`.
    #[must_use]
    pub fn assignment(&self, m: usize, n: usize) -> u32 {
        self.assignments[m * self.num_samples + n]
    }

    /// Verify internal shape invariants. Loaded or hand-assembled indexes
    /// go through this before a search touches them.
    pub(crate) fn check_consistent(&self) -> Result<()> {
        if self.chunks.len() != self.num_chunks {
            return Err(AnnotateError::DimensionMismatch {
                expected: self.num_chunks,
                actual: self.chunks.len(),
            });
        }
        if self.assignments.len() != self.num_chunks * self.num_samples {
            return Err(AnnotateError::DimensionMismatch {
                expected: self.num_chunks * self.num_samples,
                actual: self.assignments.len(),
            });
        }
        for chunk in &self.chunks {
            if chunk.num_clusters != self.num_clusters {
                return Err(AnnotateError::DimensionMismatch {
                    expected: self.num_clusters,
                    actual: chunk.num_clusters,
                });
            }
        }
        Ok(())
    }
}

/// Quantize one chunk: k-means over each sample's contiguous sub-vector,
/// then unit-normalize the surviving centroids.
fn quantize_chunk(
    normalized: &ExpressionMatrix,
    range: std::ops::Range<usize>,
    num_clusters: usize,
    seed: Option<u64>,
    chunk_idx: usize,
) -> ChunkOutcome {
    let num_samples = normalized.num_samples();
    let dim = range.len();

    // Columns are contiguous per sample, so the chunk's training set is a
    // straight gather of sub-slices.
    let mut training = Vec::with_capacity(num_samples * dim);
    for s in 0..num_samples {
        training.extend_from_slice(&normalized.column(s)[range.clone()]);
    }

    let Ok(mut kmeans) = KMeans::new(dim, num_clusters) else {
        return ChunkOutcome::Failed;
    };
    if let Some(base) = seed {
        kmeans = kmeans.with_seed(base.wrapping_add(chunk_idx as u64));
    }

    if let Err(err) = kmeans.fit(&training, num_samples) {
        log::warn!("chunk {chunk_idx} clustering failed: {err}; continuing without it");
        return ChunkOutcome::Failed;
    }

    let assignments: Vec<u32> = kmeans
        .assign_clusters(&training, num_samples)
        .into_iter()
        .map(|c| c as u32 + 1)
        .collect();

    // Raw k-means centroids are not unit vectors; rescale so the searcher
    // can treat centroid products as cosine terms. Zero centroids (empty
    // clusters) stay zero.
    let mut centroids = Vec::with_capacity(num_clusters * dim);
    for centroid in kmeans.centroids() {
        let mut c = centroid.clone();
        linalg::normalize_in_place(&mut c);
        centroids.extend_from_slice(&c);
    }

    ChunkOutcome::Built {
        codebook: ChunkCodebook {
            feature_ids: normalized.feature_ids()[range].to_vec(),
            centroids,
            dim,
            num_clusters,
        },
        assignments,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linalg::norm;
    use std::collections::HashSet;

    /// 4 features × 9 samples with well-spread values in every chunk.
    fn spread_matrix() -> ExpressionMatrix {
        let num_features = 4;
        let num_samples = 9;
        let values: Vec<f32> = (0..num_samples)
            .flat_map(|s| {
                (0..num_features).map(move |f| ((s * num_features + f) as f32 * 0.37).sin() + 1.5)
            })
            .collect();
        let ids = (0..num_features).map(|f| format!("gene{f}")).collect();
        ExpressionMatrix::new(ids, values, num_samples).unwrap()
    }

    #[test]
    fn default_cluster_count_is_floor_sqrt_samples() {
        let reference = spread_matrix();
        let params = IndexParams {
            num_chunks: 2,
            seed: Some(11),
            ..Default::default()
        };
        let index = ReferenceIndex::build(&reference, &params).unwrap();
        assert_eq!(index.num_clusters(), 3); // floor(sqrt(9))
        assert_eq!(index.num_chunks(), 2);
        assert_eq!(index.num_samples(), 9);
    }

    #[test]
    fn assignments_are_one_indexed_and_bounded() {
        let reference = spread_matrix();
        let params = IndexParams {
            num_chunks: 2,
            seed: Some(3),
            ..Default::default()
        };
        let index = ReferenceIndex::build(&reference, &params).unwrap();
        for m in 0..index.num_chunks() {
            for n in 0..index.num_samples() {
                let a = index.assignment(m, n);
                assert!(a >= 1 && a as usize <= index.num_clusters());
            }
        }
    }

    #[test]
    fn centroids_have_unit_norm_or_are_zero() {
        let reference = spread_matrix();
        let params = IndexParams {
            num_chunks: 2,
            seed: Some(5),
            ..Default::default()
        };
        let index = ReferenceIndex::build(&reference, &params).unwrap();
        for m in 0..index.num_chunks() {
            let chunk = index.chunk(m);
            for c in 0..chunk.num_clusters() {
                let n = norm(chunk.centroid(c));
                assert!(n < 1e-6 || (n - 1.0).abs() < 1e-5);
            }
        }
    }

    #[test]
    fn chunk_feature_ids_partition_the_covered_rows() {
        // 10 features, 3 chunks: 9 rows covered, 1 dropped.
        let num_features = 10;
        let num_samples = 9;
        let values: Vec<f32> = (0..num_features * num_samples)
            .map(|i| (i as f32 * 0.61).cos() + 2.0)
            .collect();
        let ids: Vec<String> = (0..num_features).map(|f| format!("gene{f}")).collect();
        let reference = ExpressionMatrix::new(ids.clone(), values, num_samples).unwrap();

        let params = IndexParams {
            num_chunks: 3,
            seed: Some(2),
            ..Default::default()
        };
        let index = ReferenceIndex::build(&reference, &params).unwrap();

        let mut seen = HashSet::new();
        let mut covered = 0;
        for m in 0..index.num_chunks() {
            for id in index.chunk(m).feature_ids() {
                assert!(seen.insert(id.clone()), "feature {id} in two chunks");
                assert!(ids.contains(id));
                covered += 1;
            }
        }
        assert_eq!(covered, 3 * (num_features / 3));
    }

    #[test]
    fn constant_chunk_degrades_without_aborting() {
        // Features 2..4 are identical across samples: that chunk's k-means
        // sees one distinct point and fails; the other chunk survives.
        let num_samples = 9;
        let mut values = Vec::new();
        for s in 0..num_samples {
            values.push((s as f32 * 0.7).sin() + 2.0);
            values.push((s as f32 * 1.3).cos() + 2.0);
            values.push(0.0);
            values.push(0.0);
        }
        let ids = vec!["g0".into(), "g1".into(), "g2".into(), "g3".into()];
        let reference = ExpressionMatrix::new(ids, values, num_samples).unwrap();

        let params = IndexParams {
            num_chunks: 2,
            seed: Some(9),
            ..Default::default()
        };
        let index = ReferenceIndex::build(&reference, &params).unwrap();

        assert_eq!(index.failed_chunks(), &[1]);
        let degenerate = index.chunk(1);
        assert!(degenerate.is_degenerate());
        assert_eq!(degenerate.dim(), 1);
        assert!(degenerate.centroid(0).iter().all(|&x| x == 0.0));
        assert!(!index.chunk(0).is_degenerate());
        // Degenerate assignments are pinned to cluster 1.
        for n in 0..num_samples {
            assert_eq!(index.assignment(1, n), 1);
        }
    }

    #[test]
    fn all_chunks_failing_is_fatal() {
        // Identical columns: every chunk sees a single distinct point.
        let num_samples = 4;
        let values = vec![1.0_f32; 4 * num_samples];
        let ids = vec!["g0".into(), "g1".into(), "g2".into(), "g3".into()];
        let reference = ExpressionMatrix::new(ids, values, num_samples).unwrap();

        let params = IndexParams {
            num_chunks: 2,
            seed: Some(4),
            ..Default::default()
        };
        let err = ReferenceIndex::build(&reference, &params).unwrap_err();
        assert!(matches!(err, AnnotateError::Config(_)));
    }

    #[test]
    fn explicit_cluster_count_above_samples_is_rejected() {
        let reference = spread_matrix();
        let params = IndexParams {
            num_chunks: 2,
            num_clusters: Some(10),
            seed: Some(1),
        };
        let err = ReferenceIndex::build(&reference, &params).unwrap_err();
        assert!(matches!(err, AnnotateError::Config(_)));
    }
}
