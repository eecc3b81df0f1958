use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

use crate::models::SourceTag;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub recommendation: RecommendationConfig,
    pub training: TrainingConfig,
    pub sources: SourcesConfig,
    pub explanation: ExplanationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub workers: usize,
    /// JSON file with vote records for the in-memory vote store.
    pub votes_file: Option<String>,
    /// JSON file with restaurant documents for the in-memory vector store.
    pub documents_file: Option<String>,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(format!("{}:{}", self.host, self.port).parse()?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Normalization {
    MinMax,
    Rank,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceWeights {
    pub collaborative_user: f64,
    pub collaborative_item: f64,
    pub latent_factor: f64,
    pub vector_similarity: f64,
}

impl SourceWeights {
    pub fn weight(&self, source: SourceTag) -> f64 {
        match source {
            SourceTag::CollaborativeUser => self.collaborative_user,
            SourceTag::CollaborativeItem => self.collaborative_item,
            SourceTag::LatentFactor => self.latent_factor,
            SourceTag::VectorSimilarity => self.vector_similarity,
        }
    }
}

impl Default for SourceWeights {
    // CF block (0.6) split 0.4/0.3/0.3 across user, item and latent; vector 0.4.
    fn default() -> Self {
        Self {
            collaborative_user: 0.24,
            collaborative_item: 0.18,
            latent_factor: 0.18,
            vector_similarity: 0.40,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendationConfig {
    pub default_n: usize,
    pub max_n: usize,
    pub neighbors: usize,
    pub normalization: Normalization,
    pub weights: SourceWeights,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfig {
    pub factors: usize,
    pub iterations: usize,
    pub regularization: f64,
    pub alpha: f64,
    pub seed: u64,
    /// Stop early once the relative loss change falls below this value.
    pub tolerance: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourcesConfig {
    pub vote_timeout_ms: u64,
    pub vector_timeout_ms: u64,
    pub vector_candidates: usize,
}

impl SourcesConfig {
    pub fn vote_timeout(&self) -> Duration {
        Duration::from_millis(self.vote_timeout_ms)
    }

    pub fn vector_timeout(&self) -> Duration {
        Duration::from_millis(self.vector_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExplanationConfig {
    pub enabled: bool,
    pub max_concurrency: usize,
    pub call_timeout_ms: u64,
    pub deadline_ms: u64,
}

impl ExplanationConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn deadline(&self) -> Duration {
        Duration::from_millis(self.deadline_ms)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
                workers: num_cpus::get(),
                votes_file: None,
                documents_file: None,
            },
            recommendation: RecommendationConfig {
                default_n: 10,
                max_n: 100,
                neighbors: 10,
                normalization: Normalization::MinMax,
                weights: SourceWeights::default(),
            },
            training: TrainingConfig {
                factors: 50,
                iterations: 20,
                regularization: 0.01,
                alpha: 1.0,
                seed: 42,
                tolerance: None,
            },
            sources: SourcesConfig {
                vote_timeout_ms: 2000,
                vector_timeout_ms: 1500,
                vector_candidates: 10,
            },
            explanation: ExplanationConfig {
                enabled: true,
                max_concurrency: 4,
                call_timeout_ms: 3000,
                deadline_ms: 8000,
            },
        }
    }
}

impl Config {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::Config::try_from(&Config::default())?)
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("LUNCHREC").separator("__"))
            .build()?;

        Ok(settings.try_deserialize()?)
    }
}
