pub mod algorithms;
pub mod config;
pub mod error;
pub mod models;
pub mod services;
pub mod utils;

pub use config::Config;
pub use error::{RecError, RecResult};
pub use models::*;

use anyhow::Result;
use services::explanation::{ExplanationSource, TemplateExplainer};
use services::recommendation::RecommendationService;
use services::training::TrainingService;
use services::vector_db::{HashingEmbedder, InMemoryVectorSource, VectorCandidateSource};
use services::votes::{InMemoryVoteSource, VoteSource};
use std::sync::Arc;
use tracing::info;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub recommendation_service: Arc<RecommendationService>,
    pub training_service: Arc<TrainingService>,
}

impl AppState {
    /// Wires the in-memory collaborators, loading votes and documents from
    /// the files named in `config.server` when present.
    pub async fn new(config: Config) -> Result<Self> {
        let votes: Arc<dyn VoteSource> = match config.server.votes_file.as_deref() {
            Some(path) => Arc::new(InMemoryVoteSource::from_json_file(path)?),
            None => {
                info!("No votes file configured, starting with an empty vote store");
                Arc::new(InMemoryVoteSource::new())
            }
        };

        let embedder = Arc::new(HashingEmbedder::default());
        let vectors: Arc<dyn VectorCandidateSource> = match config.server.documents_file.as_deref() {
            Some(path) => Arc::new(InMemoryVectorSource::from_json_file(path, embedder)?),
            None => Arc::new(InMemoryVectorSource::new(embedder)),
        };

        Self::with_sources(config, votes, vectors, Arc::new(TemplateExplainer::new()))
    }

    pub fn with_sources(
        config: Config,
        votes: Arc<dyn VoteSource>,
        vectors: Arc<dyn VectorCandidateSource>,
        explainer: Arc<dyn ExplanationSource>,
    ) -> Result<Self> {
        utils::validation::validate_source_weights(&config.recommendation.weights)?;
        let config = Arc::new(config);

        let training_service = Arc::new(TrainingService::new((&config.training).into()));

        let recommendation_service = Arc::new(RecommendationService::new(
            votes,
            vectors,
            explainer,
            training_service.clone(),
            config.clone(),
        ));

        Ok(Self {
            config,
            recommendation_service,
            training_service,
        })
    }
}

/// Installs the global subscriber. `RUST_LOG` takes precedence over
/// `default_level`; a second call is a no-op.
pub fn init_tracing(default_level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
