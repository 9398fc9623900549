//! Similarity search
//!
//! Exact top-k cosine scan over a vector set, plus a transient two-level
//! centroid index for large corpora. Everything here is deterministic:
//! score ties break on ascending vector id, and k-means seeds by uniform
//! stride sampling instead of an RNG.

use crate::domain::{ChunkId, DocumentId, Vector, VectorId};
use crate::error::{Result, VecBaseError};
use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashSet};
use tracing::debug;

/// Maximum k-means refinement passes when building a centroid index.
const KMEANS_MAX_ITERATIONS: usize = 8;

/// A scored vector before enrichment.
#[derive(Debug, Clone)]
pub struct ScoredVector {
    pub vector_id: VectorId,
    pub document_id: DocumentId,
    pub chunk_id: ChunkId,
    pub score: f32,
}

impl PartialEq for ScoredVector {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ScoredVector {}

impl PartialOrd for ScoredVector {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScoredVector {
    /// Greater means "better": higher score first, then lower vector id.
    fn cmp(&self, other: &Self) -> Ordering {
        self.score
            .total_cmp(&other.score)
            .then_with(|| other.vector_id.cmp(&self.vector_id))
    }
}

/// Cosine similarity of `query` (norm precomputed) against `vector`.
///
/// Returns `None` on dimension mismatch.
pub fn cosine_score(query: &[f32], query_norm: f32, vector: &Vector) -> Option<f32> {
    if query.len() != vector.embedding.len() {
        return None;
    }
    let dot: f32 = query
        .iter()
        .zip(vector.embedding.iter())
        .map(|(a, b)| a * b)
        .sum();
    Some(dot / (query_norm * vector.norm))
}

/// Exact top-k cosine search over `vectors`.
///
/// Maintains a bounded min-heap of size `k`; results come back sorted by
/// descending score, ties by ascending vector id.
pub fn search_exact(
    query: &[f32],
    vectors: &[Vector],
    k: usize,
    min_score: Option<f32>,
    filter: Option<&HashSet<DocumentId>>,
) -> Result<Vec<ScoredVector>> {
    let indices: Vec<usize> = (0..vectors.len()).collect();
    search_subset(query, vectors, &indices, k, min_score, filter)
}

/// Exact top-k restricted to `indices` into `vectors`.
fn search_subset(
    query: &[f32],
    vectors: &[Vector],
    indices: &[usize],
    k: usize,
    min_score: Option<f32>,
    filter: Option<&HashSet<DocumentId>>,
) -> Result<Vec<ScoredVector>> {
    if k == 0 || vectors.is_empty() {
        return Ok(Vec::new());
    }

    let query_norm = crate::domain::validate_embedding(query)
        .map_err(|_| VecBaseError::invalid("query_embedding", "must be finite with positive norm"))?;

    if let Some(first) = vectors.first() {
        if first.embedding.len() != query.len() {
            return Err(VecBaseError::invalid(
                "query_embedding",
                format!(
                    "dimension {} does not match stored dimension {}",
                    query.len(),
                    first.embedding.len()
                ),
            ));
        }
    }

    let mut heap: BinaryHeap<Reverse<ScoredVector>> = BinaryHeap::with_capacity(k + 1);

    for &idx in indices {
        let vector = &vectors[idx];
        if let Some(allowed) = filter {
            if !allowed.contains(&vector.document_id) {
                continue;
            }
        }
        let Some(score) = cosine_score(query, query_norm, vector) else {
            continue;
        };
        if let Some(min) = min_score {
            if score < min {
                continue;
            }
        }

        let candidate = ScoredVector {
            vector_id: vector.id.clone(),
            document_id: vector.document_id.clone(),
            chunk_id: vector.chunk_id.clone(),
            score,
        };

        if heap.len() < k {
            heap.push(Reverse(candidate));
        } else if let Some(Reverse(worst)) = heap.peek() {
            if candidate > *worst {
                heap.pop();
                heap.push(Reverse(candidate));
            }
        }
    }

    let mut results: Vec<ScoredVector> = heap.into_iter().map(|r| r.0).collect();
    results.sort_by(|a, b| b.cmp(a));
    Ok(results)
}

// ============================================================================
// Centroid index
// ============================================================================

/// Transient two-level clustering of a vector set.
///
/// Built on demand, cached alongside the vectors it was built from, and
/// dropped with them; never persisted.
#[derive(Debug, Clone)]
pub struct CentroidIndex {
    /// Unit-normalized cluster centers.
    centroids: Vec<Vec<f32>>,

    /// Member positions (into the source vector slice) per cluster.
    clusters: Vec<Vec<usize>>,

    /// Number of vectors indexed.
    indexed: usize,
}

impl CentroidIndex {
    /// Cluster `vectors` into `⌈√N⌉` groups by k-means over cosine
    /// distance. Seeding is uniform stride sampling, so the result is a
    /// pure function of the input order.
    pub fn build(vectors: &[Vector]) -> Self {
        let n = vectors.len();
        if n == 0 {
            return Self {
                centroids: Vec::new(),
                clusters: Vec::new(),
                indexed: 0,
            };
        }

        let cluster_count = ((n as f64).sqrt().ceil() as usize).clamp(1, n);

        // Work on unit vectors so dot product is cosine similarity.
        let units: Vec<Vec<f32>> = vectors
            .iter()
            .map(|v| v.embedding.iter().map(|x| x / v.norm).collect())
            .collect();
        let dim = units[0].len();

        let mut centroids: Vec<Vec<f32>> = (0..cluster_count)
            .map(|i| units[i * n / cluster_count].clone())
            .collect();
        let mut assignment: Vec<usize> = vec![0; n];

        for iteration in 0..KMEANS_MAX_ITERATIONS {
            let mut changed = false;
            for (i, unit) in units.iter().enumerate() {
                let best = nearest_centroid(unit, &centroids);
                if assignment[i] != best || iteration == 0 {
                    if assignment[i] != best {
                        changed = true;
                    }
                    assignment[i] = best;
                }
            }
            if iteration > 0 && !changed {
                break;
            }

            // Recompute centers as normalized means; empty clusters keep
            // their previous center.
            let mut sums = vec![vec![0.0f32; dim]; cluster_count];
            let mut counts = vec![0usize; cluster_count];
            for (i, unit) in units.iter().enumerate() {
                let c = assignment[i];
                counts[c] += 1;
                for (s, x) in sums[c].iter_mut().zip(unit.iter()) {
                    *s += x;
                }
            }
            for (c, sum) in sums.into_iter().enumerate() {
                if counts[c] == 0 {
                    continue;
                }
                let norm = crate::domain::l2_norm(&sum);
                if norm > 0.0 {
                    centroids[c] = sum.into_iter().map(|x| x / norm).collect();
                }
            }
        }

        let mut clusters = vec![Vec::new(); cluster_count];
        for (i, &c) in assignment.iter().enumerate() {
            clusters[c].push(i);
        }

        debug!(
            "Built centroid index: {} vectors in {} clusters",
            n, cluster_count
        );

        Self {
            centroids,
            clusters,
            indexed: n,
        }
    }

    /// Number of vectors this index was built from.
    pub fn indexed(&self) -> usize {
        self.indexed
    }

    pub fn cluster_count(&self) -> usize {
        self.centroids.len()
    }

    /// Member positions of the `probes` clusters nearest to `query`, in
    /// ascending position order.
    fn candidate_indices(&self, query: &[f32], query_norm: f32, probes: usize) -> Vec<usize> {
        let mut scored: Vec<(f32, usize)> = self
            .centroids
            .iter()
            .enumerate()
            .map(|(c, centroid)| {
                let dot: f32 = query
                    .iter()
                    .zip(centroid.iter())
                    .map(|(a, b)| a * b)
                    .sum();
                (dot / query_norm, c)
            })
            .collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| a.1.cmp(&b.1)));

        let mut indices: Vec<usize> = scored
            .iter()
            .take(probes)
            .flat_map(|&(_, c)| self.clusters[c].iter().copied())
            .collect();
        indices.sort_unstable();
        indices
    }
}

/// Approximate top-k: exact search inside the union of the clusters
/// nearest to the query.
pub fn search_approx(
    query: &[f32],
    vectors: &[Vector],
    index: &CentroidIndex,
    k: usize,
    min_score: Option<f32>,
    filter: Option<&HashSet<DocumentId>>,
    candidate_factor: f32,
) -> Result<Vec<ScoredVector>> {
    if k == 0 || vectors.is_empty() {
        return Ok(Vec::new());
    }
    if index.indexed() != vectors.len() {
        return Err(VecBaseError::CorruptState(
            "centroid index does not match vector set".to_string(),
        ));
    }

    let query_norm = crate::domain::validate_embedding(query)
        .map_err(|_| VecBaseError::invalid("query_embedding", "must be finite with positive norm"))?;

    let cluster_count = index.cluster_count();
    let probes = (((cluster_count as f32).sqrt() * candidate_factor).ceil() as usize)
        .max(1)
        .min(cluster_count);

    let candidates = index.candidate_indices(query, query_norm, probes);
    debug!(
        "Approximate search probing {}/{} clusters ({} candidates)",
        probes,
        cluster_count,
        candidates.len()
    );

    search_subset(query, vectors, &candidates, k, min_score, filter)
}

fn nearest_centroid(unit: &[f32], centroids: &[Vec<f32>]) -> usize {
    let mut best = 0;
    let mut best_dot = f32::NEG_INFINITY;
    for (c, centroid) in centroids.iter().enumerate() {
        let dot: f32 = unit.iter().zip(centroid.iter()).map(|(a, b)| a * b).sum();
        if dot > best_dot {
            best_dot = dot;
            best = c;
        }
    }
    best
}
