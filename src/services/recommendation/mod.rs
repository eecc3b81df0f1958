use crate::algorithms::{
    CandidateAggregator, CollaborativeFiltering, InteractionMatrix, MatrixBuilder, MatrixStats,
    SourceList,
};
use crate::config::Config;
use crate::error::{RecError, RecResult};
use crate::models::*;
use crate::services::explanation::{ExplanationAdapter, ExplanationSource};
use crate::services::training::TrainingService;
use crate::services::vector_db::VectorCandidateSource;
use crate::services::votes::{VoteScope, VoteSource};
use crate::utils::validation::validate_recommendation_request;
use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// Hybrid recommender over injected vote, vector and explanation sources.
///
/// Every request builds its own immutable matrix snapshot. The latent factor
/// model is shared through [`TrainingService`] and only retrained when the
/// snapshot changes.
pub struct RecommendationService {
    votes: Arc<dyn VoteSource>,
    vectors: Arc<dyn VectorCandidateSource>,
    explanation: ExplanationAdapter,
    training: Arc<TrainingService>,
    aggregator: CandidateAggregator,
    config: Arc<Config>,
}

impl RecommendationService {
    pub fn new(
        votes: Arc<dyn VoteSource>,
        vectors: Arc<dyn VectorCandidateSource>,
        explainer: Arc<dyn ExplanationSource>,
        training: Arc<TrainingService>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            votes,
            vectors,
            explanation: ExplanationAdapter::new(explainer, config.explanation.clone()),
            training,
            aggregator: CandidateAggregator::new(config.recommendation.normalization),
            config,
        }
    }

    /// Validated entry point for request handlers.
    pub async fn recommend(&self, request: &RecommendationRequest) -> RecResult<RecommendationResponse> {
        validate_recommendation_request(request, &self.config.recommendation)
            .map_err(|e| RecError::InvalidRequest(e.to_string()))?;

        let recommendations = self
            .get_hybrid_recommendations(
                &request.user_id,
                request.query_text.as_deref(),
                request.num_recommendations,
            )
            .await;

        Ok(RecommendationResponse {
            user_id: request.user_id.clone(),
            recommendations,
            generated_at: Utc::now(),
        })
    }

    /// Never fails: unavailable sources are dropped from the merge and the
    /// result may be empty.
    pub async fn get_hybrid_recommendations(
        &self,
        user_id: &str,
        query_text: Option<&str>,
        n: usize,
    ) -> Vec<RankedRecommendation> {
        if n == 0 {
            return Vec::new();
        }

        let start = Instant::now();
        let matrix = self.load_matrix().await;

        let query = query_text
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .map(str::to_string)
            .or_else(|| synthesize_query(&matrix, user_id));

        // Each source proposes more than n so the merge has something to reorder.
        let pool = n.max(self.config.sources.vector_candidates);
        let (mut lists, vector) = tokio::join!(
            self.collaborative_lists(matrix.clone(), user_id, pool),
            self.vector_list(&matrix, query.as_deref(), user_id, pool)
        );
        lists.extend(vector);

        let ranked = self.aggregator.combine(&lists, n);
        let ranked = if self.config.explanation.enabled {
            self.explanation.annotate(ranked, user_id).await
        } else {
            ranked
        };

        info!(
            "Generated {} hybrid recommendations for user {} from {} sources in {:?}",
            ranked.len(),
            user_id,
            lists.iter().filter(|l| !l.candidates.is_empty()).count(),
            start.elapsed()
        );
        ranked
    }

    pub async fn similar_users(&self, user_id: &str, n: usize) -> Vec<SimilarUser> {
        let matrix = self.load_matrix().await;
        let neighbors = self.config.recommendation.neighbors;
        let user = user_id.to_string();

        tokio::task::spawn_blocking(move || {
            CollaborativeFiltering::fit(&matrix, neighbors).similar_users(&user, n)
        })
        .await
        .unwrap_or_else(|e| {
            error!("Similar-user task failed: {}", e);
            Vec::new()
        })
    }

    pub async fn similar_items(&self, item_id: &ItemKey, n: usize) -> Vec<SimilarItem> {
        let matrix = self.load_matrix().await;
        let neighbors = self.config.recommendation.neighbors;
        let item = item_id.clone();

        tokio::task::spawn_blocking(move || {
            CollaborativeFiltering::fit(&matrix, neighbors).similar_items(&item, n)
        })
        .await
        .unwrap_or_else(|e| {
            error!("Similar-item task failed: {}", e);
            Vec::new()
        })
    }

    pub async fn matrix_stats(&self) -> MatrixStats {
        self.load_matrix().await.stats()
    }

    /// Snapshot of all votes. A slow or failing vote source yields an empty
    /// matrix, which leaves only the vector source in play.
    async fn load_matrix(&self) -> Arc<InteractionMatrix> {
        let vote_timeout = self.config.sources.vote_timeout();
        let records = match timeout(vote_timeout, self.votes.load(&VoteScope::All)).await {
            Ok(Ok(records)) => records,
            Ok(Err(e)) => {
                let e = RecError::SourceFailed {
                    source_name: "votes",
                    message: e.to_string(),
                };
                warn!("{}", e);
                Vec::new()
            }
            Err(_) => {
                let e = RecError::SourceTimeout {
                    source_name: "votes",
                    timeout_ms: self.config.sources.vote_timeout_ms,
                };
                warn!("{}", e);
                Vec::new()
            }
        };

        Arc::new(MatrixBuilder::new().build(&records))
    }

    async fn collaborative_lists(
        &self,
        matrix: Arc<InteractionMatrix>,
        user_id: &str,
        pool: usize,
    ) -> Vec<SourceList> {
        if !matrix.contains_user(user_id) {
            info!("User {} has no vote history, skipping collaborative sources", user_id);
            return Vec::new();
        }

        let model = match self.training.model_for(matrix.clone()).await {
            Ok(model) => Some(model),
            Err(e) => {
                warn!("Latent factor source unavailable: {}", e);
                None
            }
        };

        let neighbors = self.config.recommendation.neighbors;
        let weights = self.config.recommendation.weights.clone();
        let user = user_id.to_string();

        tokio::task::spawn_blocking(move || {
            let cf = CollaborativeFiltering::fit(&matrix, neighbors);
            let mut lists = vec![
                SourceList::new(
                    SourceTag::CollaborativeUser,
                    weights.weight(SourceTag::CollaborativeUser),
                    cf.user_based(&matrix, &user, pool),
                ),
                SourceList::new(
                    SourceTag::CollaborativeItem,
                    weights.weight(SourceTag::CollaborativeItem),
                    cf.item_based(&matrix, &user, pool),
                ),
            ];

            if let Some(model) = model {
                // A stale model does not know about the newest votes.
                let rated = matrix.row(&user);
                let candidates = model
                    .recommend(&user, pool)
                    .into_iter()
                    .filter(|c| rated.map_or(true, |row| !row.contains_key(&c.item_id)))
                    .collect();
                lists.push(SourceList::new(
                    SourceTag::LatentFactor,
                    weights.weight(SourceTag::LatentFactor),
                    candidates,
                ));
            }
            lists
        })
        .await
        .unwrap_or_else(|e| {
            error!("Collaborative scoring task failed: {}", e);
            Vec::new()
        })
    }

    async fn vector_list(
        &self,
        matrix: &InteractionMatrix,
        query: Option<&str>,
        user_id: &str,
        pool: usize,
    ) -> Option<SourceList> {
        let Some(query) = query else {
            debug!("No query for user {}, skipping vector search", user_id);
            return None;
        };

        let search = self.vectors.search(query, user_id, pool);
        let candidates = match timeout(self.config.sources.vector_timeout(), search).await {
            Ok(Ok(candidates)) => candidates,
            Ok(Err(e)) => {
                let e = RecError::SourceFailed {
                    source_name: "vector_search",
                    message: e.to_string(),
                };
                warn!("{}", e);
                return None;
            }
            Err(_) => {
                let e = RecError::SourceTimeout {
                    source_name: "vector_search",
                    timeout_ms: self.config.sources.vector_timeout_ms,
                };
                warn!("{}", e);
                return None;
            }
        };

        // Places the user voted down are not proposed back to them.
        let candidates = candidates
            .into_iter()
            .filter(|c| matrix.get(user_id, &c.item_id) >= 0.0)
            .collect();

        Some(SourceList::new(
            SourceTag::VectorSimilarity,
            self.config.recommendation.weights.weight(SourceTag::VectorSimilarity),
            candidates,
        ))
    }
}

/// Query built from what the user currently likes, in item order.
fn synthesize_query(matrix: &InteractionMatrix, user_id: &str) -> Option<String> {
    let row = matrix.row(user_id)?;
    let liked: Vec<&str> = row
        .iter()
        .filter(|(_, rating)| **rating > 0.0)
        .map(|(item, _)| item.value.as_str())
        .collect();

    if liked.is_empty() {
        None
    } else {
        Some(liked.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_synthesize_query_uses_liked_values_only() {
        let now = Utc::now() - chrono::Duration::minutes(1);
        let records = vec![
            VoteRecord::new("u1", "kimchi stew", VoteAction::Like, now).with_category(VoteCategory::Menu),
            VoteRecord::new("u1", "pasta", VoteAction::Unlike, now).with_category(VoteCategory::Menu),
            VoteRecord::new("u1", "12", VoteAction::Like, now),
            VoteRecord::new("u2", "13", VoteAction::Unlike, now),
        ];
        let matrix = MatrixBuilder::new().build(&records);

        assert_eq!(synthesize_query(&matrix, "u1").as_deref(), Some("kimchi stew 12"));
        assert_eq!(synthesize_query(&matrix, "u2"), None);
        assert_eq!(synthesize_query(&matrix, "ghost"), None);
    }
}
