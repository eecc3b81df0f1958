use crate::models::*;
use crate::utils::{cosine_similarity, l2_norm, normalize_vector, stable_hash, top_k_by_score};
use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Semantic search over item descriptions.
#[async_trait]
pub trait VectorCandidateSource: Send + Sync {
    async fn search(&self, query_text: &str, user_id: &str, n: usize) -> Result<Vec<Candidate>>;
}

pub trait TextEmbedder: Send + Sync {
    fn dimension(&self) -> usize;
    fn embed(&self, text: &str) -> Vec<f64>;
}

/// Signed feature hashing over lowercase word tokens. Texts sharing words
/// land close together; unrelated texts are near-orthogonal.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(256)
    }
}

impl TextEmbedder for HashingEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed(&self, text: &str) -> Vec<f64> {
        let mut vector = vec![0.0; self.dimension];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let hash = stable_hash(&token.to_lowercase());
            let slot = (hash % self.dimension as u64) as usize;
            let sign = if (hash >> 63) == 0 { 1.0 } else { -1.0 };
            vector[slot] += sign;
        }
        normalize_vector(&mut vector);
        vector
    }
}

/// A searchable item: its key, the text it is embedded from and the metadata
/// handed back with every hit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorDocument {
    pub item_id: ItemKey,
    pub text: String,
    #[serde(default)]
    pub metadata: Metadata,
}

impl VectorDocument {
    pub fn new(item_id: ItemKey, text: impl Into<String>) -> Self {
        Self {
            item_id,
            text: text.into(),
            metadata: Metadata::new(),
        }
    }

    pub fn with_metadata(mut self, key: &str, value: serde_json::Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }
}

#[derive(Debug, Clone)]
struct IndexedDocument {
    document: VectorDocument,
    embedding: Vec<f64>,
}

pub struct InMemoryVectorSource {
    embedder: Arc<dyn TextEmbedder>,
    documents: RwLock<BTreeMap<ItemKey, IndexedDocument>>,
}

impl InMemoryVectorSource {
    pub fn new(embedder: Arc<dyn TextEmbedder>) -> Self {
        info!("Initialized in-memory vector store with dimension {}", embedder.dimension());
        Self {
            embedder,
            documents: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn with_hashing_embedder() -> Self {
        Self::new(Arc::new(HashingEmbedder::default()))
    }

    /// Loads a JSON array of documents.
    pub fn from_json_file(path: impl AsRef<Path>, embedder: Arc<dyn TextEmbedder>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read document file {}", path.display()))?;
        let documents: Vec<VectorDocument> = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse document file {}", path.display()))?;

        let source = Self::new(embedder);
        source.insert_many(documents);
        Ok(source)
    }

    /// Inserts or replaces the document for its item.
    pub fn insert(&self, document: VectorDocument) {
        let embedding = self.embedder.embed(&document.text);
        self.documents.write().insert(
            document.item_id.clone(),
            IndexedDocument {
                document,
                embedding,
            },
        );
    }

    pub fn insert_many(&self, documents: impl IntoIterator<Item = VectorDocument>) {
        let mut count = 0usize;
        for document in documents {
            self.insert(document);
            count += 1;
        }
        info!("Batch inserted {} documents", count);
    }

    pub fn remove(&self, item_id: &ItemKey) -> bool {
        self.documents.write().remove(item_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.documents.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.read().is_empty()
    }

    /// Items with positive cosine similarity to the query, best first.
    pub fn search_similar(&self, query_text: &str, n: usize) -> Vec<Candidate> {
        let query = self.embedder.embed(query_text);
        if l2_norm(&query) == 0.0 {
            return Vec::new();
        }

        let documents = self.documents.read();
        let scored: Vec<(ItemKey, f64)> = documents
            .iter()
            .map(|(item, indexed)| (item.clone(), cosine_similarity(&query, &indexed.embedding)))
            .filter(|(_, similarity)| *similarity > 0.0)
            .collect();

        top_k_by_score(scored, n)
            .into_iter()
            .filter_map(|(item, similarity)| {
                let indexed = documents.get(&item)?;
                let mut candidate = Candidate::new(item, similarity, SourceTag::VectorSimilarity)
                    .with_metadata("vector_score", serde_json::json!(similarity))
                    .with_metadata("document", serde_json::json!(indexed.document.text));
                for (key, value) in &indexed.document.metadata {
                    candidate.metadata.insert(key.clone(), value.clone());
                }
                Some(candidate)
            })
            .collect()
    }
}

#[async_trait]
impl VectorCandidateSource for InMemoryVectorSource {
    async fn search(&self, query_text: &str, user_id: &str, n: usize) -> Result<Vec<Candidate>> {
        let results = self.search_similar(query_text, n);
        debug!("Vector search for user {} returned {} candidates", user_id, results.len());
        Ok(results)
    }
}
