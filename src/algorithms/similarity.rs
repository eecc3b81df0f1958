//! Cosine similarity between users (matrix rows) and items (matrix columns).

use crate::algorithms::matrix::InteractionMatrix;
use crate::models::ItemKey;
use crate::utils::by_score_then_key;
use nalgebra::DMatrix;
use std::collections::HashMap;
use std::hash::Hash;
use tracing::debug;

/// Symmetric entity × entity similarity in `[-1, 1]`. The diagonal is never
/// reported: an entity is not its own neighbour.
#[derive(Debug, Clone)]
pub struct SimilarityMatrix<K> {
    ids: Vec<K>,
    index: HashMap<K, usize>,
    values: DMatrix<f64>,
}

impl<K> SimilarityMatrix<K>
where
    K: Clone + Eq + Hash + Ord,
{
    fn from_vectors(ids: Vec<K>, vectors: &DMatrix<f64>) -> Self {
        let index = ids.iter().enumerate().map(|(i, id)| (id.clone(), i)).collect();
        Self {
            ids,
            index,
            values: cosine_gram(vectors),
        }
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn ids(&self) -> &[K] {
        &self.ids
    }

    pub fn contains(&self, id: &K) -> bool {
        self.index.contains_key(id)
    }

    /// `None` for unknown entities and for the diagonal.
    pub fn get(&self, a: &K, b: &K) -> Option<f64> {
        let i = *self.index.get(a)?;
        let j = *self.index.get(b)?;
        if i == j {
            return None;
        }
        Some(self.values[(i, j)])
    }

    /// Neighbours ordered by similarity descending, ties by id ascending.
    /// Unknown entities have no neighbours.
    pub fn top_k_neighbors(&self, id: &K, k: usize) -> Vec<(K, f64)> {
        let Some(&i) = self.index.get(id) else {
            return Vec::new();
        };

        let mut neighbors: Vec<(K, f64)> = self
            .ids
            .iter()
            .enumerate()
            .filter(|(j, _)| *j != i)
            .map(|(j, other)| (other.clone(), self.values[(i, j)]))
            .collect();

        neighbors.sort_by(by_score_then_key);
        neighbors.truncate(k);
        neighbors
    }
}

/// Row-wise cosine similarity. Zero rows stay zero after normalisation, so
/// they come out with similarity 0 against everything.
fn cosine_gram(vectors: &DMatrix<f64>) -> DMatrix<f64> {
    let mut normalized = vectors.clone();
    for i in 0..normalized.nrows() {
        let norm = normalized.row(i).norm();
        if norm > 0.0 {
            normalized.row_mut(i).unscale_mut(norm);
        }
    }

    let gram = &normalized * normalized.transpose();
    gram.map(|v| v.clamp(-1.0, 1.0))
}

#[derive(Debug, Clone, Default)]
pub struct SimilarityEngine;

impl SimilarityEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn user_similarity(&self, matrix: &InteractionMatrix) -> SimilarityMatrix<String> {
        let dense = matrix.to_dense();
        let similarity = SimilarityMatrix::from_vectors(matrix.users().to_vec(), &dense);
        debug!("Calculated user similarity matrix: {}x{}", similarity.len(), similarity.len());
        similarity
    }

    pub fn item_similarity(&self, matrix: &InteractionMatrix) -> SimilarityMatrix<ItemKey> {
        let dense = matrix.to_dense().transpose();
        let similarity = SimilarityMatrix::from_vectors(matrix.items().to_vec(), &dense);
        debug!("Calculated item similarity matrix: {}x{}", similarity.len(), similarity.len());
        similarity
    }

    /// Both similarity matrices, computed in parallel over the shared read-only matrix.
    pub fn compute(
        &self,
        matrix: &InteractionMatrix,
    ) -> (SimilarityMatrix<String>, SimilarityMatrix<ItemKey>) {
        rayon::join(
            || self.user_similarity(matrix),
            || self.item_similarity(matrix),
        )
    }
}
