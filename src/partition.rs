//! Contiguous equal-size feature chunking.

use std::ops::Range;

use crate::error::{AnnotateError, Result};

/// Split `num_features` rows into `num_chunks` contiguous blocks of
/// `floor(num_features / num_chunks)` rows each.
///
/// Rows beyond `num_chunks * chunk_size` are dropped. No row is assigned to
/// two chunks.
pub fn chunk_ranges(num_features: usize, num_chunks: usize) -> Result<Vec<Range<usize>>> {
    if num_chunks == 0 {
        return Err(AnnotateError::Config(
            "chunk count must be greater than 0".into(),
        ));
    }
    if num_chunks > num_features {
        return Err(AnnotateError::Config(format!(
            "chunk count {num_chunks} exceeds feature count {num_features}"
        )));
    }
    let chunk_size = num_features / num_chunks;
    Ok((0..num_chunks)
        .map(|i| i * chunk_size..(i + 1) * chunk_size)
        .collect())
}
