//! Consensus labeling of search results.
//!
//! A query sample inherits its neighbors' label only when the best
//! similarity strictly clears the threshold and all w neighbors agree;
//! anything less is left unassigned.

use crate::error::{AnnotateError, Result};
use crate::search::SearchResult;

/// Sentinel label for query samples that fail the consensus rule.
pub const UNASSIGNED: &str = "unassigned";

/// Default similarity threshold.
pub const DEFAULT_THRESHOLD: f32 = 0.5;

/// Assign a label per query sample from its top-w neighbors.
///
/// `reference_labels` holds one label vector per searched dataset, in the
/// same order the indexes were passed to [`crate::search`]; each neighbor's
/// label is looked up in the dataset recorded for it. A query is labeled
/// iff its best similarity is strictly above `threshold` and all w
/// neighbor labels are identical; otherwise it gets [`UNASSIGNED`].
pub fn classify(
    reference_labels: &[Vec<String>],
    result: &SearchResult,
    threshold: f32,
) -> Result<Vec<String>> {
    let mut labels = Vec::with_capacity(result.num_queries());

    for q in 0..result.num_queries() {
        let mut consensus: Option<&str> = None;
        let mut unanimous = true;

        for rank in 0..result.w() {
            let dataset = result.neighbor_dataset(rank, q) as usize;
            let sample = result.neighbor_sample(rank, q) as usize;
            let dataset_labels = reference_labels.get(dataset).ok_or(
                AnnotateError::DimensionMismatch {
                    expected: reference_labels.len(),
                    actual: dataset + 1,
                },
            )?;
            let label = dataset_labels
                .get(sample)
                .ok_or(AnnotateError::DimensionMismatch {
                    expected: dataset_labels.len(),
                    actual: sample + 1,
                })?
                .as_str();

            match consensus {
                None => consensus = Some(label),
                Some(seen) if seen != label => {
                    unanimous = false;
                }
                Some(_) => {}
            }
        }

        // Rank 0 is the column maximum; assignment requires it to be
        // strictly above the threshold.
        let best = result.similarity(0, q);
        let assigned = unanimous && best > threshold;
        match consensus {
            Some(label) if assigned => labels.push(label.to_string()),
            _ => labels.push(UNASSIGNED.to_string()),
        }
    }

    Ok(labels)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result_with(w: usize, sims: Vec<f32>, samples: Vec<u32>, datasets: Vec<u32>) -> SearchResult {
        let num_queries = sims.len() / w;
        SearchResult::from_raw(w, num_queries, samples, datasets, sims, None)
    }

    fn labels(l: &[&str]) -> Vec<String> {
        l.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn similarity_equal_to_threshold_is_not_assigned() {
        let result = result_with(1, vec![0.5], vec![0], vec![0]);
        let out = classify(&[labels(&["alpha"])], &result, 0.5).unwrap();
        assert_eq!(out, vec![UNASSIGNED.to_string()]);
    }

    #[test]
    fn similarity_just_above_threshold_is_assigned() {
        let result = result_with(1, vec![0.5 + 1e-6], vec![0], vec![0]);
        let out = classify(&[labels(&["alpha"])], &result, 0.5).unwrap();
        assert_eq!(out, vec!["alpha".to_string()]);
    }

    #[test]
    fn non_unanimous_neighbors_stay_unassigned_at_any_similarity() {
        let result = result_with(3, vec![0.99, 0.98, 0.97], vec![0, 1, 2], vec![0, 0, 0]);
        let out = classify(&[labels(&["alpha", "beta", "alpha"])], &result, 0.1).unwrap();
        assert_eq!(out, vec![UNASSIGNED.to_string()]);
    }

    #[test]
    fn unanimous_neighbors_above_threshold_are_assigned() {
        let result = result_with(3, vec![0.9, 0.8, 0.7], vec![0, 2, 1], vec![0, 0, 0]);
        let out = classify(&[labels(&["beta", "beta", "beta"])], &result, 0.5).unwrap();
        assert_eq!(out, vec!["beta".to_string()]);
    }

    #[test]
    fn labels_resolve_through_the_winning_dataset() {
        // Same sample index means different labels in different datasets.
        let result = result_with(2, vec![0.9, 0.85], vec![0, 0], vec![1, 1]);
        let out = classify(
            &[labels(&["alpha"]), labels(&["beta"])],
            &result,
            0.5,
        )
        .unwrap();
        assert_eq!(out, vec!["beta".to_string()]);
    }

    #[test]
    fn out_of_range_sample_index_is_a_dimension_mismatch() {
        let result = result_with(1, vec![0.9], vec![5], vec![0]);
        let err = classify(&[labels(&["alpha"])], &result, 0.5).unwrap_err();
        assert!(matches!(err, AnnotateError::DimensionMismatch { .. }));
    }

    #[test]
    fn out_of_range_dataset_index_is_a_dimension_mismatch() {
        let result = result_with(1, vec![0.9], vec![0], vec![3]);
        let err = classify(&[labels(&["alpha"])], &result, 0.5).unwrap_err();
        assert!(matches!(err, AnnotateError::DimensionMismatch { .. }));
    }
}
