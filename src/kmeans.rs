//! k-means clustering for per-chunk codebook training.

use crate::error::{AnnotateError, Result};
use crate::linalg;

/// Refinement iteration cap. Acts as the implicit termination bound when the
/// assignment does not stabilize earlier.
const MAX_ITERATIONS: usize = 50;

/// k-means clustering over flat sample-major vectors.
///
/// Uses k-means++ initialization and squared-Euclidean assignment.
pub struct KMeans {
    /// Centroids (k x dimension)
    centroids: Vec<Vec<f32>>,
    dimension: usize,
    k: usize,
    seed: Option<u64>,
}

impl KMeans {
    /// Create new k-means with k clusters.
    pub fn new(dimension: usize, k: usize) -> Result<Self> {
        if dimension == 0 || k == 0 {
            return Err(AnnotateError::Config(
                "dimension and k must be greater than 0".to_string(),
            ));
        }

        Ok(Self {
            centroids: Vec::new(),
            dimension,
            k,
            seed: None,
        })
    }

    /// Configure a deterministic seed for k-means++ initialization.
    ///
    /// When set, repeated `fit(...)` calls on the same inputs produce identical results.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Train k-means on vectors.
    ///
    /// Fails with [`AnnotateError::Clustering`] on non-finite input, on
    /// `k > num_vectors`, or when the data has fewer distinct points than
    /// `k`; callers treat any of these as that block's clustering failure.
    pub fn fit(&mut self, vectors: &[f32], num_vectors: usize) -> Result<()> {
        let needed = num_vectors * self.dimension;
        if vectors.len() < needed {
            return Err(AnnotateError::Clustering("insufficient vectors".to_string()));
        }
        if self.k > num_vectors {
            return Err(AnnotateError::Clustering(format!(
                "{} clusters requested for {num_vectors} points",
                self.k
            )));
        }
        if vectors[..needed].iter().any(|x| !x.is_finite()) {
            return Err(AnnotateError::Clustering(
                "non-finite value in input".to_string(),
            ));
        }

        self.centroids = self.kmeans_plus_plus(vectors, num_vectors)?;

        // Iterative refinement
        for _iteration in 0..MAX_ITERATIONS {
            let assignments = self.assign_clusters(vectors, num_vectors);
            let new_centroids = self.update_centroids(vectors, num_vectors, &assignments);

            // Check convergence
            let mut converged = true;
            for (old, new) in self.centroids.iter().zip(new_centroids.iter()) {
                if linalg::l2_distance_squared(old, new) > 1e-10 {
                    converged = false;
                    break;
                }
            }

            self.centroids = new_centroids;
            if converged {
                break;
            }
        }

        Ok(())
    }

    /// k-means++ initialization.
    fn kmeans_plus_plus(&self, vectors: &[f32], num_vectors: usize) -> Result<Vec<Vec<f32>>> {
        use rand::rngs::StdRng;
        use rand::{Rng, SeedableRng};

        // Use an explicit seed when configured; otherwise derive one from entropy.
        let seed = self.seed.unwrap_or_else(|| rand::rng().random());
        let mut rng = StdRng::seed_from_u64(seed);

        let mut centroids = Vec::with_capacity(self.k);

        // First centroid: random vector
        let first_idx = rng.random_range(0..num_vectors);
        centroids.push(self.get_vector(vectors, first_idx).to_vec());

        // Subsequent centroids: weighted by squared distance to nearest existing centroid
        for _ in 1..self.k {
            let mut distances = Vec::with_capacity(num_vectors);
            let mut total_distance = 0.0_f64;

            for i in 0..num_vectors {
                let vec = self.get_vector(vectors, i);
                let min_dist = centroids
                    .iter()
                    .map(|c| linalg::l2_distance_squared(vec, c))
                    .fold(f32::INFINITY, f32::min);

                distances.push(min_dist);
                total_distance += min_dist as f64;
            }

            if total_distance <= 0.0 {
                // Every remaining point coincides with a chosen centroid.
                return Err(AnnotateError::Clustering(format!(
                    "fewer distinct points than {} clusters",
                    self.k
                )));
            }

            // Sample proportional to squared distance
            let mut cumulative = 0.0_f64;
            let threshold = rng.random::<f64>() * total_distance;
            let mut chosen = None;

            for (i, &dist) in distances.iter().enumerate() {
                cumulative += dist as f64;
                if cumulative >= threshold && dist > 0.0 {
                    chosen = Some(i);
                    break;
                }
            }

            // Rounding can leave the walk just short of the threshold; fall
            // back to the farthest point, which always has positive weight.
            let chosen = chosen.unwrap_or_else(|| {
                distances
                    .iter()
                    .enumerate()
                    .max_by(|a, b| a.1.total_cmp(b.1))
                    .map(|(i, _)| i)
                    .unwrap_or(0)
            });
            centroids.push(self.get_vector(vectors, chosen).to_vec());
        }

        Ok(centroids)
    }

    /// Assign vectors to nearest clusters.
    pub fn assign_clusters(&self, vectors: &[f32], num_vectors: usize) -> Vec<usize> {
        let mut assignments = Vec::with_capacity(num_vectors);

        for i in 0..num_vectors {
            let vec = self.get_vector(vectors, i);
            let mut best_cluster = 0;
            let mut best_dist = f32::INFINITY;

            for (cluster_idx, centroid) in self.centroids.iter().enumerate() {
                let dist = linalg::l2_distance_squared(vec, centroid);
                if dist < best_dist {
                    best_dist = dist;
                    best_cluster = cluster_idx;
                }
            }

            assignments.push(best_cluster);
        }

        assignments
    }

    /// Update centroids based on assignments.
    fn update_centroids(
        &self,
        vectors: &[f32],
        num_vectors: usize,
        assignments: &[usize],
    ) -> Vec<Vec<f32>> {
        let mut cluster_sums = vec![vec![0.0f32; self.dimension]; self.k];
        let mut cluster_counts = vec![0usize; self.k];

        for (i, &cluster) in assignments.iter().enumerate().take(num_vectors) {
            cluster_counts[cluster] += 1;

            let vec = self.get_vector(vectors, i);
            for (j, &val) in vec.iter().enumerate() {
                cluster_sums[cluster][j] += val;
            }
        }

        // Compute centroids as means; empty clusters collapse to zero.
        let mut new_centroids = Vec::with_capacity(self.k);
        for (sums, &count) in cluster_sums.iter().zip(cluster_counts.iter()) {
            if count > 0 {
                let centroid: Vec<f32> = sums.iter().map(|&s| s / count as f32).collect();
                new_centroids.push(centroid);
            } else {
                new_centroids.push(vec![0.0; self.dimension]);
            }
        }

        new_centroids
    }

    /// Get vector from flat sample-major storage.
    fn get_vector<'a>(&self, vectors: &'a [f32], idx: usize) -> &'a [f32] {
        let start = idx * self.dimension;
        let end = start + self.dimension;
        &vectors[start..end]
    }

    /// Get centroids.
    pub fn centroids(&self) -> &[Vec<f32>] {
        &self.centroids
    }
}
