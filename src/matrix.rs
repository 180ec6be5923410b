//! Dense expression matrix with feature-labeled rows.
//!
//! Columns are samples (cells), rows are features (genes). Storage is
//! column-major so each sample's profile is one contiguous slice, which is
//! what k-means and the searcher consume directly.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::{AnnotateError, Result};
use crate::linalg;

/// Dense matrix of expression values, rows labeled by feature id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpressionMatrix {
    feature_ids: Vec<String>,
    sample_labels: Option<Vec<String>>,
    /// Column-major: sample `s` occupies `values[s * rows .. (s + 1) * rows]`.
    values: Vec<f32>,
    num_features: usize,
    num_samples: usize,
}

impl ExpressionMatrix {
    /// Create a matrix from column-major values.
    ///
    /// `values.len()` must equal `feature_ids.len() * num_samples` and
    /// feature ids must be unique.
    pub fn new(
        feature_ids: Vec<String>,
        values: Vec<f32>,
        num_samples: usize,
    ) -> Result<Self> {
        let num_features = feature_ids.len();
        if num_features == 0 {
            return Err(AnnotateError::Config("matrix has no features".into()));
        }
        if values.len() != num_features * num_samples {
            return Err(AnnotateError::DimensionMismatch {
                expected: num_features * num_samples,
                actual: values.len(),
            });
        }
        let mut seen = HashSet::with_capacity(num_features);
        for id in &feature_ids {
            if !seen.insert(id.as_str()) {
                return Err(AnnotateError::Config(format!(
                    "duplicate feature id: {id}"
                )));
            }
        }
        Ok(Self {
            feature_ids,
            sample_labels: None,
            values,
            num_features,
            num_samples,
        })
    }

    /// Attach per-sample labels (one per column).
    pub fn with_sample_labels(mut self, labels: Vec<String>) -> Result<Self> {
        if labels.len() != self.num_samples {
            return Err(AnnotateError::DimensionMismatch {
                expected: self.num_samples,
                actual: labels.len(),
            });
        }
        self.sample_labels = Some(labels);
        Ok(self)
    }

    /// Feature ids in row order.
    #[must_use]
    pub fn feature_ids(&self) -> &[String] {
        &self.feature_ids
    }

    /// Sample labels, if attached.
    #[must_use]
    pub fn sample_labels(&self) -> Option<&[String]> {
        self.sample_labels.as_deref()
    }

    #[must_use]
    pub fn num_features(&self) -> usize {
        self.num_features
    }

    #[must_use]
    pub fn num_samples(&self) -> usize {
        self.num_samples
    }

    /// One sample's full profile as a contiguous slice.
    #[must_use]
    pub fn column(&self, sample: usize) -> &[f32] {
        let start = sample * self.num_features;
        &self.values[start..start + self.num_features]
    }

    /// Copy of the matrix with every column scaled to unit L2 norm.
    ///
    /// All-zero columns stay zero.
    #[must_use]
    pub fn l2_normalized(&self) -> Self {
        let mut out = self.clone();
        for s in 0..out.num_samples {
            let start = s * out.num_features;
            linalg::normalize_in_place(&mut out.values[start..start + out.num_features]);
        }
        out
    }
}
