use crate::models::*;
use anyhow::{Context, Result};
use crate::utils::validation::{validate_vote_record, validate_vote_timestamp};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use std::path::Path;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoteScope {
    All,
    User(String),
}

/// Read side of the vote store.
#[async_trait]
pub trait VoteSource: Send + Sync {
    async fn load(&self, scope: &VoteScope) -> Result<Vec<VoteRecord>>;
}

/// Vote store held in memory, keyed by user. Records of one user keep their
/// insertion order.
#[derive(Debug, Default)]
pub struct InMemoryVoteSource {
    votes: DashMap<String, Vec<VoteRecord>>,
}

impl InMemoryVoteSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records(records: impl IntoIterator<Item = VoteRecord>) -> Self {
        let source = Self::new();
        for record in records {
            source.insert(record);
        }
        source
    }

    /// Loads a JSON array of vote records.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read vote file {}", path.display()))?;
        let records: Vec<VoteRecord> = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse vote file {}", path.display()))?;

        info!("Loaded {} vote records from {}", records.len(), path.display());
        Ok(Self::from_records(records))
    }

    /// Stores the record unless it is malformed or stamped too far in the
    /// future. Returns whether it was kept.
    pub fn insert(&self, record: VoteRecord) -> bool {
        let checked = validate_vote_record(&record)
            .and_then(|_| validate_vote_timestamp(&record, Utc::now()));
        if let Err(e) = checked {
            warn!("Rejecting vote record for user '{}': {}", record.user_id, e);
            return false;
        }

        self.votes
            .entry(record.user_id.clone())
            .or_default()
            .push(record);
        true
    }

    pub fn len(&self) -> usize {
        self.votes.iter().map(|entry| entry.value().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn user_count(&self) -> usize {
        self.votes.len()
    }
}

#[async_trait]
impl VoteSource for InMemoryVoteSource {
    async fn load(&self, scope: &VoteScope) -> Result<Vec<VoteRecord>> {
        let records = match scope {
            VoteScope::User(user_id) => self
                .votes
                .get(user_id)
                .map(|entry| entry.value().clone())
                .unwrap_or_default(),
            VoteScope::All => {
                let mut users: Vec<String> = self.votes.iter().map(|e| e.key().clone()).collect();
                users.sort();
                users
                    .iter()
                    .filter_map(|user| self.votes.get(user).map(|e| e.value().clone()))
                    .flatten()
                    .collect()
            }
        };

        debug!("Loaded {} vote records for {:?}", records.len(), scope);
        Ok(records)
    }
}
