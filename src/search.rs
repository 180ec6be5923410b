//! Multi-reference approximate similarity search.
//!
//! For every query sample the searcher scores all N reference samples of
//! every supplied index using the product-quantization decomposition: per
//! chunk, the k centroid dot products are computed once and scattered over
//! the N samples through the cluster-assignment lookup, so a query costs
//! O(M·k) centroid products instead of O(M·N) exact comparisons.
//!
//! The similarity is the cosine between the query and the unit-per-chunk
//! reconstruction of a reference sample:
//!
//! ```text
//!             Σ_m  q_m · c[assignment(m, n)]
//! sim(q, n) = ─────────────────────────────────
//!             sqrt(Σ_m ‖q_m‖²) · sqrt(M_eff)
//! ```
//!
//! where the sums run over the chunks that share at least one feature with
//! the query (`M_eff` of them). Chunks with no overlap, including chunks
//! whose clustering failed at build time, drop out of both sums and
//! contribute exactly nothing.

use rayon::prelude::*;
use smallvec::SmallVec;

use crate::align::{align_chunk, ChunkAlignment, FeatureMap};
use crate::error::{AnnotateError, Result};
use crate::index::ReferenceIndex;
use crate::matrix::ExpressionMatrix;

/// Default number of neighbors kept per query sample.
pub const DEFAULT_W: usize = 3;

/// One scored reference sample with provenance.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Candidate {
    similarity: f32,
    dataset: u32,
    sample: u32,
}

impl Candidate {
    /// Column order: similarity descending, then dataset ascending, then
    /// sample ascending. Earlier datasets win ties by construction.
    fn ranks_before(&self, other: &Candidate) -> bool {
        match self.similarity.total_cmp(&other.similarity) {
            std::cmp::Ordering::Greater => true,
            std::cmp::Ordering::Less => false,
            std::cmp::Ordering::Equal => {
                (self.dataset, self.sample) < (other.dataset, other.sample)
            }
        }
    }
}

/// Bounded best-w accumulator for one query sample.
struct TopW {
    capacity: usize,
    entries: SmallVec<[Candidate; 8]>,
}

impl TopW {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: SmallVec::new(),
        }
    }

    fn push(&mut self, candidate: Candidate) {
        let pos = self
            .entries
            .iter()
            .position(|e| candidate.ranks_before(e))
            .unwrap_or(self.entries.len());
        if pos >= self.capacity {
            return;
        }
        self.entries.insert(pos, candidate);
        self.entries.truncate(self.capacity);
    }

    fn into_entries(self) -> SmallVec<[Candidate; 8]> {
        self.entries
    }
}

/// Top-w neighbors per query: three parallel w × Q matrices plus the query
/// batch's sample labels. Columns are sorted by descending similarity.
#[derive(Debug, Clone)]
pub struct SearchResult {
    /// Column-major w × Q: neighbor's sample index within its dataset.
    neighbor_samples: Vec<u32>,
    /// Column-major w × Q: index of the dataset the neighbor came from.
    neighbor_datasets: Vec<u32>,
    /// Column-major w × Q: approximate cosine similarity, in `[-1, 1]`.
    similarities: Vec<f32>,
    w: usize,
    num_queries: usize,
    sample_labels: Option<Vec<String>>,
}

impl SearchResult {
    #[must_use]
    pub fn w(&self) -> usize {
        self.w
    }

    #[must_use]
    pub fn num_queries(&self) -> usize {
        self.num_queries
    }

    /// Labels of the query columns, when the query batch carried them.
    #[must_use]
    pub fn sample_labels(&self) -> Option<&[String]> {
        self.sample_labels.as_deref()
    }

    /// Neighbor at `rank` (0 = best) for query column `query`.
    #[must_use]
    pub fn neighbor_sample(&self, rank: usize, query: usize) -> u32 {
        self.neighbor_samples[query * self.w + rank]
    }

    #[must_use]
    pub fn neighbor_dataset(&self, rank: usize, query: usize) -> u32 {
        self.neighbor_datasets[query * self.w + rank]
    }

    #[must_use]
    pub fn similarity(&self, rank: usize, query: usize) -> f32 {
        self.similarities[query * self.w + rank]
    }

    /// All w similarities of one query column, descending.
    #[must_use]
    pub fn similarities_for(&self, query: usize) -> &[f32] {
        let start = query * self.w;
        &self.similarities[start..start + self.w]
    }

    pub(crate) fn from_raw(
        w: usize,
        num_queries: usize,
        neighbor_samples: Vec<u32>,
        neighbor_datasets: Vec<u32>,
        similarities: Vec<f32>,
        sample_labels: Option<Vec<String>>,
    ) -> Self {
        debug_assert_eq!(neighbor_samples.len(), w * num_queries);
        debug_assert_eq!(neighbor_datasets.len(), w * num_queries);
        debug_assert_eq!(similarities.len(), w * num_queries);
        Self {
            neighbor_samples,
            neighbor_datasets,
            similarities,
            w,
            num_queries,
            sample_labels,
        }
    }
}

/// Alignment plan for one reference index against the current query batch.
struct IndexPlan<'a> {
    index: &'a ReferenceIndex,
    alignments: Vec<ChunkAlignment>,
    aligned_chunks: usize,
}

/// Search one or more reference indexes with a query batch, keeping the
/// top `w` matches per query sample.
///
/// Indexes are merged in the order given; a candidate from a later dataset
/// never displaces an equal-similarity incumbent from an earlier one.
pub fn search(
    indexes: &[&ReferenceIndex],
    query: &ExpressionMatrix,
    w: usize,
) -> Result<SearchResult> {
    if indexes.is_empty() {
        return Err(AnnotateError::Config("no reference indexes given".into()));
    }
    if w == 0 {
        return Err(AnnotateError::Config("w must be greater than 0".into()));
    }
    if query.num_samples() == 0 {
        return Err(AnnotateError::Config("query has no samples".into()));
    }
    for index in indexes {
        index.check_consistent()?;
    }
    let total_samples: usize = indexes.iter().map(|i| i.num_samples()).sum();
    if w > total_samples {
        return Err(AnnotateError::Config(format!(
            "w {w} exceeds total reference sample count {total_samples}"
        )));
    }

    let query_map = FeatureMap::new(query);
    let plans: Vec<IndexPlan<'_>> = indexes
        .iter()
        .enumerate()
        .map(|(d, index)| {
            let alignments: Vec<ChunkAlignment> = (0..index.num_chunks())
                .map(|m| align_chunk(index.chunk(m), &query_map))
                .collect();
            let aligned_chunks = alignments.iter().filter(|a| !a.is_empty()).count();
            if aligned_chunks == 0 {
                log::warn!("reference dataset {d} shares no features with the query");
            }
            IndexPlan {
                index,
                alignments,
                aligned_chunks,
            }
        })
        .collect();

    let num_queries = query.num_samples();
    let columns: Vec<SmallVec<[Candidate; 8]>> = (0..num_queries)
        .into_par_iter()
        .map(|q| {
            let column = query.column(q);
            let mut top = TopW::new(w);
            for (d, plan) in plans.iter().enumerate() {
                score_dataset(plan, column, d as u32, &mut top);
            }
            top.into_entries()
        })
        .collect();

    let mut neighbor_samples = Vec::with_capacity(w * num_queries);
    let mut neighbor_datasets = Vec::with_capacity(w * num_queries);
    let mut similarities = Vec::with_capacity(w * num_queries);
    for entries in &columns {
        debug_assert_eq!(entries.len(), w);
        for c in entries {
            neighbor_samples.push(c.sample);
            neighbor_datasets.push(c.dataset);
            similarities.push(c.similarity);
        }
    }

    Ok(SearchResult {
        neighbor_samples,
        neighbor_datasets,
        similarities,
        w,
        num_queries,
        sample_labels: query.sample_labels().map(<[String]>::to_vec),
    })
}

/// Score every sample of one dataset against one query column and feed the
/// results through the query's top-w accumulator.
fn score_dataset(plan: &IndexPlan<'_>, column: &[f32], dataset: u32, top: &mut TopW) {
    let index = plan.index;
    let num_samples = index.num_samples();
    let num_clusters = index.num_clusters();

    let mut accumulated = vec![0.0_f32; num_samples];
    let mut query_norm = 0.0_f32;
    let mut prods = vec![0.0_f32; num_clusters];

    for (m, alignment) in plan.alignments.iter().enumerate() {
        if alignment.is_empty() {
            continue;
        }
        let chunk = index.chunk(m);

        for &q_row in &alignment.query_rows {
            query_norm += column[q_row] * column[q_row];
        }

        // One pass over the k centroids; every reference sample reuses
        // these products through its assignment.
        for (c, prod) in prods.iter_mut().enumerate() {
            let centroid = chunk.centroid(c);
            let mut p = 0.0_f32;
            for (i, &cb_row) in alignment.codebook_rows.iter().enumerate() {
                p += centroid[cb_row] * column[alignment.query_rows[i]];
            }
            *prod = p;
        }

        for (n, acc) in accumulated.iter_mut().enumerate() {
            *acc += prods[(index.assignment(m, n) - 1) as usize];
        }
    }

    // Zero-norm queries (no expression over the shared features) score zero
    // everywhere rather than dividing by zero.
    let denom = query_norm.sqrt() * (plan.aligned_chunks as f32).sqrt();
    let scale = if denom > 0.0 { 1.0 / denom } else { 0.0 };

    for (n, acc) in accumulated.iter().enumerate() {
        top.push(Candidate {
            similarity: acc * scale,
            dataset,
            sample: n as u32,
        });
    }
}
