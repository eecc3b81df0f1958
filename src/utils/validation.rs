use crate::config::{RecommendationConfig, SourceWeights};
use crate::models::*;
use anyhow::{Result, anyhow};
use chrono::{DateTime, Duration, Utc};

/// How far past `now` a vote timestamp may lie before the record is rejected.
pub const MAX_CLOCK_SKEW_HOURS: i64 = 1;

pub fn validate_vote_record(record: &VoteRecord) -> Result<()> {
    if record.user_id.trim().is_empty() {
        return Err(anyhow!("User ID cannot be empty"));
    }

    if record.item_id.trim().is_empty() {
        return Err(anyhow!("Item ID cannot be empty"));
    }

    Ok(())
}

/// Rejects votes stamped further in the future than the tolerated clock skew
/// between the vote tables and this process.
pub fn validate_vote_timestamp(record: &VoteRecord, now: DateTime<Utc>) -> Result<()> {
    if record.timestamp > now + Duration::hours(MAX_CLOCK_SKEW_HOURS) {
        return Err(anyhow!(
            "Timestamp cannot be more than {} hour in the future",
            MAX_CLOCK_SKEW_HOURS
        ));
    }
    Ok(())
}

pub fn validate_recommendation_request(
    request: &RecommendationRequest,
    config: &RecommendationConfig,
) -> Result<()> {
    if request.user_id.trim().is_empty() {
        return Err(anyhow!("User ID cannot be empty"));
    }

    if request.num_recommendations == 0 {
        return Err(anyhow!("Number of recommendations must be greater than 0"));
    }

    if request.num_recommendations > config.max_n {
        return Err(anyhow!(
            "Number of recommendations too large (max {})",
            config.max_n
        ));
    }

    if let Some(ref query) = request.query_text {
        if query.len() > 1000 {
            return Err(anyhow!("Query text too long (max 1000 characters)"));
        }
    }

    Ok(())
}

pub fn validate_source_weights(weights: &SourceWeights) -> Result<()> {
    let all = [
        ("collaborative_user", weights.collaborative_user),
        ("collaborative_item", weights.collaborative_item),
        ("latent_factor", weights.latent_factor),
        ("vector_similarity", weights.vector_similarity),
    ];

    for (name, weight) in all {
        if !weight.is_finite() || weight < 0.0 {
            return Err(anyhow!("Weight for {} must be finite and non-negative", name));
        }
    }

    if all.iter().all(|(_, w)| *w == 0.0) {
        return Err(anyhow!("At least one source weight must be positive"));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use chrono::Utc;

    #[test]
    fn test_validate_vote_record() {
        let valid = VoteRecord::new("84927", "12", VoteAction::Like, Utc::now());
        assert!(validate_vote_record(&valid).is_ok());

        let invalid = VoteRecord::new(" ", "12", VoteAction::Like, Utc::now());
        assert!(validate_vote_record(&invalid).is_err());

        // ids only; the clock is checked separately
        let future = VoteRecord::new("84927", "12", VoteAction::Like, Utc::now() + Duration::days(2));
        assert!(validate_vote_record(&future).is_ok());
    }

    #[test]
    fn test_validate_vote_timestamp_against_reference_time() {
        let now = Utc::now();
        let record = VoteRecord::new("84927", "12", VoteAction::Like, now + Duration::minutes(30));
        assert!(validate_vote_timestamp(&record, now).is_ok());
        assert!(validate_vote_timestamp(&record, now - Duration::hours(1)).is_err());
    }

    #[test]
    fn test_validate_recommendation_request() {
        let config = Config::default();
        let mut request = RecommendationRequest {
            user_id: "84927".to_string(),
            num_recommendations: 10,
            query_text: None,
        };
        assert!(validate_recommendation_request(&request, &config.recommendation).is_ok());

        request.num_recommendations = 0;
        assert!(validate_recommendation_request(&request, &config.recommendation).is_err());

        request.num_recommendations = config.recommendation.max_n + 1;
        assert!(validate_recommendation_request(&request, &config.recommendation).is_err());
    }

    #[test]
    fn test_validate_source_weights() {
        assert!(validate_source_weights(&SourceWeights::default()).is_ok());

        let mut weights = SourceWeights::default();
        weights.latent_factor = f64::NAN;
        assert!(validate_source_weights(&weights).is_err());

        let zero = SourceWeights {
            collaborative_user: 0.0,
            collaborative_item: 0.0,
            latent_factor: 0.0,
            vector_similarity: 0.0,
        };
        assert!(validate_source_weights(&zero).is_err());
    }
}
