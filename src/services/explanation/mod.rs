use crate::config::ExplanationConfig;
use crate::error::RecError;
use crate::models::*;
use anyhow::Result;
use async_trait::async_trait;
use futures::stream::{FuturesUnordered, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, warn};

/// What the explainer gets to see about one merged recommendation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExplanationContext {
    pub combined_score: f64,
    pub sources: Vec<SourceTag>,
    pub source_scores: BTreeMap<SourceTag, SourceScore>,
    pub metadata: Metadata,
}

impl From<&RankedRecommendation> for ExplanationContext {
    fn from(rec: &RankedRecommendation) -> Self {
        Self {
            combined_score: rec.combined_score,
            sources: rec.sources.iter().copied().collect(),
            source_scores: rec.source_scores.clone(),
            metadata: rec.metadata.clone(),
        }
    }
}

#[async_trait]
pub trait ExplanationSource: Send + Sync {
    async fn explain(
        &self,
        user_id: &str,
        item_id: &ItemKey,
        context: &ExplanationContext,
    ) -> Result<String>;
}

/// Attaches rationales best-effort. A failed, slow or empty explanation leaves
/// `rationale` as `None` for that item only.
pub struct ExplanationAdapter {
    source: Arc<dyn ExplanationSource>,
    config: ExplanationConfig,
}

impl ExplanationAdapter {
    pub fn new(source: Arc<dyn ExplanationSource>, config: ExplanationConfig) -> Self {
        Self { source, config }
    }

    pub async fn annotate(
        &self,
        mut ranked: Vec<RankedRecommendation>,
        user_id: &str,
    ) -> Vec<RankedRecommendation> {
        if ranked.is_empty() {
            return ranked;
        }

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency.max(1)));
        let call_timeout = self.config.call_timeout();
        let deadline = Instant::now() + self.config.deadline();

        let mut pending: FuturesUnordered<_> = ranked
            .iter()
            .enumerate()
            .map(|(idx, rec)| {
                let semaphore = semaphore.clone();
                let source = self.source.clone();
                let context = ExplanationContext::from(rec);
                let item_id = rec.item_id.clone();
                let user_id = user_id.to_string();

                async move {
                    let Ok(_permit) = semaphore.acquire_owned().await else {
                        return (idx, Err(anyhow::anyhow!("explanation pool closed")));
                    };
                    let result = match timeout(call_timeout, source.explain(&user_id, &item_id, &context)).await {
                        Ok(result) => result,
                        Err(_) => Err(RecError::SourceTimeout {
                            source_name: "explanation",
                            timeout_ms: call_timeout.as_millis() as u64,
                        }
                        .into()),
                    };
                    (idx, result)
                }
            })
            .collect();

        let mut annotated = 0usize;
        loop {
            match timeout_at(deadline, pending.next()).await {
                Ok(Some((idx, Ok(text)))) => {
                    let text = text.trim();
                    if !text.is_empty() {
                        ranked[idx].rationale = Some(text.to_string());
                        annotated += 1;
                    }
                }
                Ok(Some((idx, Err(e)))) => {
                    warn!("No rationale for {}: {}", ranked[idx].item_id, e);
                }
                Ok(None) => break,
                Err(_) => {
                    warn!(
                        "Explanation deadline of {}ms reached, {} items left unannotated",
                        self.config.deadline_ms,
                        pending.len()
                    );
                    break;
                }
            }
        }

        debug!("Annotated {}/{} recommendations for user {}", annotated, ranked.len(), user_id);
        ranked
    }
}

/// Renders a rationale from the recommendation's own evidence.
#[derive(Debug, Clone, Default)]
pub struct TemplateExplainer;

impl TemplateExplainer {
    pub fn new() -> Self {
        Self
    }

    fn reason(source: SourceTag) -> &'static str {
        match source {
            SourceTag::CollaborativeUser => "colleagues who vote like you liked it",
            SourceTag::CollaborativeItem => "it is close to places you already liked",
            SourceTag::LatentFactor => "it fits your overall voting pattern",
            SourceTag::VectorSimilarity => "its description matches what you are looking for",
        }
    }
}

#[async_trait]
impl ExplanationSource for TemplateExplainer {
    async fn explain(
        &self,
        _user_id: &str,
        item_id: &ItemKey,
        context: &ExplanationContext,
    ) -> Result<String> {
        if context.sources.is_empty() {
            return Err(anyhow::anyhow!("No evidence to explain {}", item_id));
        }

        let name = ["place_name", "name"]
            .iter()
            .find_map(|key| context.metadata.get(*key).and_then(|v| v.as_str()))
            .map(str::to_string)
            .unwrap_or_else(|| item_id.to_string());

        // Strongest contribution first.
        let mut sources = context.sources.clone();
        sources.sort_by(|a, b| {
            let ca = context.source_scores.get(a).map(|s| s.contribution()).unwrap_or(0.0);
            let cb = context.source_scores.get(b).map(|s| s.contribution()).unwrap_or(0.0);
            cb.total_cmp(&ca).then_with(|| a.cmp(b))
        });

        let reasons: Vec<&str> = sources.iter().map(|s| Self::reason(*s)).collect();
        let joined = match reasons.split_last() {
            Some((last, [])) => last.to_string(),
            Some((last, rest)) => format!("{} and {}", rest.join(", "), last),
            None => String::new(),
        };

        Ok(format!(
            "{} is recommended because {} (score {:.2}).",
            name, joined, context.combined_score
        ))
    }
}
