pub mod aggregator;
pub mod factorization;
pub mod initializer;
pub mod matrix;
pub mod similarity;

pub use aggregator::{CandidateAggregator, SourceList};
pub use factorization::{AlsParams, AlsTrainer, LatentFactorModel};
pub use matrix::{InteractionMatrix, MatrixBuilder, MatrixStats};
pub use similarity::{SimilarityEngine, SimilarityMatrix};

use crate::models::*;
use crate::utils::top_k_by_score;
use std::collections::BTreeMap;
use tracing::debug;

/// Neighbourhood-based collaborative filtering over one matrix snapshot.
#[derive(Debug, Clone)]
pub struct CollaborativeFiltering {
    pub user_similarity: SimilarityMatrix<String>,
    pub item_similarity: SimilarityMatrix<ItemKey>,
    pub neighbors: usize,
}

impl CollaborativeFiltering {
    pub fn fit(matrix: &InteractionMatrix, neighbors: usize) -> Self {
        let (user_similarity, item_similarity) = SimilarityEngine::new().compute(matrix);
        Self {
            user_similarity,
            item_similarity,
            neighbors,
        }
    }

    /// Items rated by the user's positively-similar neighbours:
    /// `score(i) = Σ sim(u, v) * r(v, i)` over unrated items, positive totals only.
    pub fn user_based(&self, matrix: &InteractionMatrix, user_id: &str, n: usize) -> Vec<Candidate> {
        let Some(rated) = matrix.row(user_id) else {
            debug!("User {} not found in matrix, no user-based candidates", user_id);
            return Vec::new();
        };

        let mut scores: BTreeMap<ItemKey, (f64, usize)> = BTreeMap::new();
        for (neighbor, similarity) in self.user_similarity.top_k_neighbors(&user_id.to_string(), self.neighbors) {
            if similarity <= 0.0 {
                continue;
            }
            let Some(neighbor_row) = matrix.row(&neighbor) else {
                continue;
            };
            for (item, rating) in neighbor_row {
                if rated.contains_key(item) {
                    continue;
                }
                let entry = scores.entry(item.clone()).or_insert((0.0, 0));
                entry.0 += similarity * rating;
                entry.1 += 1;
            }
        }

        let supporters: BTreeMap<ItemKey, usize> =
            scores.iter().map(|(item, (_, count))| (item.clone(), *count)).collect();
        let scored: Vec<(ItemKey, f64)> = scores
            .into_iter()
            .filter(|(_, (score, _))| *score > 0.0)
            .map(|(item, (score, _))| (item, score))
            .collect();

        top_k_by_score(scored, n)
            .into_iter()
            .map(|(item, score)| {
                let count = supporters.get(&item).copied().unwrap_or(0);
                Candidate::new(item, score, SourceTag::CollaborativeUser)
                    .with_metadata("cf_score", serde_json::json!(score))
                    .with_metadata("supporting_neighbors", serde_json::json!(count))
            })
            .collect()
    }

    /// Neighbours of the items the user likes that the user has not rated yet.
    pub fn item_based(&self, matrix: &InteractionMatrix, user_id: &str, n: usize) -> Vec<Candidate> {
        let Some(rated) = matrix.row(user_id) else {
            debug!("User {} not found in matrix, no item-based candidates", user_id);
            return Vec::new();
        };

        let mut scores: BTreeMap<ItemKey, f64> = BTreeMap::new();
        for (liked, rating) in rated.iter().filter(|(_, r)| **r > 0.0) {
            for (similar, similarity) in self.item_similarity.top_k_neighbors(liked, self.neighbors) {
                if similarity <= 0.0 || rated.contains_key(&similar) {
                    continue;
                }
                *scores.entry(similar).or_insert(0.0) += similarity * rating;
            }
        }

        top_k_by_score(scores.into_iter().collect(), n)
            .into_iter()
            .map(|(item, score)| {
                Candidate::new(item, score, SourceTag::CollaborativeItem)
                    .with_metadata("item_cf_score", serde_json::json!(score))
            })
            .collect()
    }

    /// Positively similar users, most similar first.
    pub fn similar_users(&self, user_id: &str, n: usize) -> Vec<SimilarUser> {
        self.user_similarity
            .top_k_neighbors(&user_id.to_string(), n)
            .into_iter()
            .filter(|(_, similarity)| *similarity > 0.0)
            .map(|(user_id, similarity)| SimilarUser { user_id, similarity })
            .collect()
    }

    /// Items voted on like `item_id`, positive similarity only.
    pub fn similar_items(&self, item_id: &ItemKey, n: usize) -> Vec<SimilarItem> {
        if !self.item_similarity.contains(item_id) {
            debug!("Item {} not found in matrix, no similar items", item_id);
            return Vec::new();
        }

        self.item_similarity
            .top_k_neighbors(item_id, n)
            .into_iter()
            .filter(|(_, similarity)| *similarity > 0.0)
            .map(|(item_id, similarity)| SimilarItem { item_id, similarity })
            .collect()
    }
}
