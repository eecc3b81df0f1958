//! Weighted fusion of per-source candidate lists into one ranking.
//!
//! Each list is normalised on its own, so a source that scores on a wider
//! range cannot drown the others. Combined score is `Σ weight * normalized`
//! over the sources that proposed the item; the output is the union of all
//! lists, never an intersection.

use crate::config::Normalization;
use crate::models::*;
use crate::utils::{min_max_normalize, rank_normalize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

/// Candidates produced by one source together with the weight it carries.
#[derive(Debug, Clone)]
pub struct SourceList {
    pub source: SourceTag,
    pub weight: f64,
    pub candidates: Vec<Candidate>,
}

impl SourceList {
    pub fn new(source: SourceTag, weight: f64, candidates: Vec<Candidate>) -> Self {
        Self {
            source,
            weight,
            candidates,
        }
    }
}

#[derive(Debug, Default)]
struct Accumulator {
    combined: f64,
    sources: BTreeSet<SourceTag>,
    source_scores: BTreeMap<SourceTag, SourceScore>,
    metadata: Metadata,
}

#[derive(Debug, Clone)]
pub struct CandidateAggregator {
    normalization: Normalization,
}

impl Default for CandidateAggregator {
    fn default() -> Self {
        Self::new(Normalization::MinMax)
    }
}

impl CandidateAggregator {
    pub fn new(normalization: Normalization) -> Self {
        Self { normalization }
    }

    pub fn normalization(&self) -> Normalization {
        self.normalization
    }

    /// Merge `lists` into at most `n` recommendations ordered by combined
    /// score descending, then number of contributing sources descending, then
    /// item id ascending.
    pub fn combine(&self, lists: &[SourceList], n: usize) -> Vec<RankedRecommendation> {
        let mut merged: BTreeMap<ItemKey, Accumulator> = BTreeMap::new();

        for list in lists {
            if !list.weight.is_finite() || list.weight <= 0.0 {
                debug!("Skipping {} list with weight {}", list.source, list.weight);
                continue;
            }

            let deduped = dedupe_keep_max(list);
            if deduped.is_empty() {
                continue;
            }

            let raw: Vec<f64> = deduped.values().map(|c| c.score).collect();
            let normalized = match self.normalization {
                Normalization::MinMax => min_max_normalize(&raw),
                Normalization::Rank => rank_normalize(&raw),
            };

            for ((item, candidate), normalized) in deduped.into_iter().zip(normalized) {
                let score = SourceScore {
                    raw: candidate.score,
                    normalized,
                    weight: list.weight,
                };
                let acc = merged.entry(item.clone()).or_default();
                acc.combined += score.contribution();
                // Only the list that scored the item counts as its source, whatever
                // tags the candidate itself carries.
                acc.sources.insert(list.source);

                // Two lists under the same tag both count toward the total;
                // provenance keeps the larger contribution.
                match acc.source_scores.get(&list.source) {
                    Some(existing) if existing.contribution() >= score.contribution() => {}
                    _ => {
                        acc.source_scores.insert(list.source, score);
                    }
                }

                for (key, value) in &candidate.metadata {
                    acc.metadata.entry(key.clone()).or_insert_with(|| value.clone());
                }
            }
        }

        let mut ranked: Vec<RankedRecommendation> = merged
            .into_iter()
            .map(|(item_id, acc)| RankedRecommendation {
                item_id,
                combined_score: acc.combined,
                sources: acc.sources,
                source_scores: acc.source_scores,
                metadata: acc.metadata,
                rationale: None,
            })
            .collect();

        ranked.sort_by(compare_ranked);
        ranked.truncate(n);
        ranked
    }
}

/// One entry per item, keeping the highest finite score the list gave it.
fn dedupe_keep_max(list: &SourceList) -> BTreeMap<&ItemKey, &Candidate> {
    let mut best: BTreeMap<&ItemKey, &Candidate> = BTreeMap::new();
    let mut dropped = 0usize;

    for candidate in &list.candidates {
        if !candidate.score.is_finite() {
            dropped += 1;
            continue;
        }
        match best.get(&candidate.item_id) {
            Some(existing) if existing.score >= candidate.score => {}
            _ => {
                best.insert(&candidate.item_id, candidate);
            }
        }
    }

    if dropped > 0 {
        warn!("Dropped {} non-finite {} candidates", dropped, list.source);
    }
    best
}

fn compare_ranked(a: &RankedRecommendation, b: &RankedRecommendation) -> Ordering {
    b.combined_score
        .total_cmp(&a.combined_score)
        .then_with(|| b.sources.len().cmp(&a.sources.len()))
        .then_with(|| a.item_id.cmp(&b.item_id))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cand(item: &str, score: f64, source: SourceTag) -> Candidate {
        Candidate::new(ItemKey::place(item), score, source)
    }

    fn list(source: SourceTag, weight: f64, items: &[(&str, f64)]) -> SourceList {
        SourceList::new(
            source,
            weight,
            items.iter().map(|(id, s)| cand(id, *s, source)).collect(),
        )
    }

    fn ids(ranked: &[RankedRecommendation]) -> Vec<String> {
        ranked.iter().map(|r| r.item_id.value.clone()).collect()
    }

    #[test]
    fn test_no_lists_or_empty_lists() {
        let agg = CandidateAggregator::default();
        assert!(agg.combine(&[], 5).is_empty());

        let empty = vec![
            list(SourceTag::CollaborativeUser, 0.6, &[]),
            list(SourceTag::VectorSimilarity, 0.4, &[]),
        ];
        assert!(agg.combine(&empty, 5).is_empty());
    }

    #[test]
    fn test_single_source_keeps_its_order() {
        let agg = CandidateAggregator::default();
        let ranked = agg.combine(
            &[list(SourceTag::VectorSimilarity, 0.4, &[("b", 0.9), ("c", 0.5), ("a", 0.1)])],
            10,
        );
        assert_eq!(ids(&ranked), vec!["b", "c", "a"]);
        assert!((ranked[0].combined_score - 0.4).abs() < 1e-12);
        assert_eq!(ranked[2].combined_score, 0.0);
    }

    #[test]
    fn test_weighted_sum_of_normalized_scores() {
        let agg = CandidateAggregator::new(Normalization::MinMax);
        let lists = vec![
            list(SourceTag::CollaborativeUser, 0.6, &[("x", 0.8), ("y", 0.0), ("z", 1.0)]),
            list(SourceTag::VectorSimilarity, 0.4, &[("x", 0.5), ("w", 0.0), ("v", 1.0)]),
        ];
        let ranked = agg.combine(&lists, 10);
        let x = ranked
            .iter()
            .find(|r| r.item_id == ItemKey::place("x"))
            .unwrap();

        assert!((x.combined_score - 0.68).abs() < 1e-12);
        assert_eq!(x.sources.len(), 2);
        let cf = x.source_scores[&SourceTag::CollaborativeUser];
        assert_eq!(cf.raw, 0.8);
        assert!((cf.normalized - 0.8).abs() < 1e-12);
        assert_eq!(cf.weight, 0.6);
    }

    #[test]
    fn test_union_of_sources() {
        let agg = CandidateAggregator::default();
        let lists = vec![
            list(SourceTag::CollaborativeUser, 0.6, &[("a", 1.0), ("b", 0.5)]),
            list(SourceTag::VectorSimilarity, 0.4, &[("c", 0.7)]),
        ];
        let ranked = agg.combine(&lists, 10);
        assert_eq!(ranked.len(), 3);
        let c = ranked.iter().find(|r| r.item_id.value == "c").unwrap();
        assert_eq!(c.sources, BTreeSet::from([SourceTag::VectorSimilarity]));
    }

    #[test]
    fn test_tie_broken_by_source_count_then_id() {
        let agg = CandidateAggregator::default();
        let lists = vec![
            list(SourceTag::CollaborativeUser, 0.5, &[("p", 1.0), ("q", 0.0)]),
            list(SourceTag::VectorSimilarity, 0.5, &[("q", 1.0), ("r", 0.0)]),
        ];
        let ranked = agg.combine(&lists, 10);
        // p and q both score 0.5; q has two sources
        assert_eq!(ids(&ranked), vec!["q", "p", "r"]);

        let flat = agg.combine(
            &[list(SourceTag::LatentFactor, 0.2, &[("m", 0.3), ("k", 0.3), ("l", 0.3)])],
            10,
        );
        assert_eq!(ids(&flat), vec!["k", "l", "m"]);
        assert!(flat.iter().all(|r| (r.combined_score - 0.2).abs() < 1e-12));
    }

    #[test]
    fn test_candidate_tags_do_not_count_as_sources() {
        let agg = CandidateAggregator::default();
        let mut tagged = cand("b", 1.0, SourceTag::VectorSimilarity);
        tagged.sources.insert(SourceTag::CollaborativeUser);
        tagged.sources.insert(SourceTag::LatentFactor);

        let lists = vec![
            list(SourceTag::CollaborativeUser, 0.5, &[("a", 1.0), ("c", 0.0)]),
            SourceList::new(
                SourceTag::VectorSimilarity,
                0.5,
                vec![tagged, cand("a", 0.0, SourceTag::VectorSimilarity)],
            ),
        ];
        let ranked = agg.combine(&lists, 10);

        // a and b both score 0.5; only a was scored by two lists
        assert_eq!(ids(&ranked), vec!["a", "b", "c"]);
        let b = &ranked[1];
        assert_eq!(b.sources, BTreeSet::from([SourceTag::VectorSimilarity]));
        assert!(b.sources.iter().eq(b.source_scores.keys()));
    }

    #[test]
    fn test_cross_category_tie_follows_item_id_string() {
        let agg = CandidateAggregator::default();
        let lists = vec![SourceList::new(
            SourceTag::VectorSimilarity,
            1.0,
            vec![
                Candidate::new(ItemKey::place("z"), 0.7, SourceTag::VectorSimilarity),
                Candidate::new(ItemKey::menu("a"), 0.7, SourceTag::VectorSimilarity),
            ],
        )];
        let ranked = agg.combine(&lists, 10);
        let rendered: Vec<String> = ranked.iter().map(|r| r.item_id.to_string()).collect();
        assert_eq!(rendered, vec!["menu:a", "place:z"]);
    }

    #[test]
    fn test_truncates_to_n() {
        let agg = CandidateAggregator::default();
        let items: Vec<(String, f64)> = (0..10).map(|i| (format!("i{}", i), i as f64)).collect();
        let borrowed: Vec<(&str, f64)> = items.iter().map(|(id, s)| (id.as_str(), *s)).collect();
        let ranked = agg.combine(&[list(SourceTag::CollaborativeItem, 1.0, &borrowed)], 3);
        assert_eq!(ids(&ranked), vec!["i9", "i8", "i7"]);
        assert!(agg.combine(&[list(SourceTag::CollaborativeItem, 1.0, &borrowed)], 0).is_empty());
    }

    #[test]
    fn test_invalid_weights_and_scores_are_ignored() {
        let agg = CandidateAggregator::default();
        let lists = vec![
            list(SourceTag::CollaborativeUser, 0.0, &[("zero", 1.0)]),
            list(SourceTag::CollaborativeItem, f64::NAN, &[("nan", 1.0)]),
            list(SourceTag::LatentFactor, -0.3, &[("neg", 1.0)]),
            list(SourceTag::VectorSimilarity, 0.4, &[("ok", 0.9), ("bad", f64::INFINITY)]),
        ];
        let ranked = agg.combine(&lists, 10);
        assert_eq!(ids(&ranked), vec!["ok"]);
        assert!((ranked[0].combined_score - 0.4).abs() < 1e-12);
    }

    #[test]
    fn test_duplicates_in_one_list_keep_max() {
        let agg = CandidateAggregator::default();
        let lists = vec![list(
            SourceTag::VectorSimilarity,
            1.0,
            &[("a", 0.2), ("b", 0.6), ("a", 0.9)],
        )];
        let ranked = agg.combine(&lists, 10);
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].item_id.value, "a");
        assert_eq!(ranked[0].source_scores[&SourceTag::VectorSimilarity].raw, 0.9);
    }

    #[test]
    fn test_rank_normalization() {
        let agg = CandidateAggregator::new(Normalization::Rank);
        let ranked = agg.combine(
            &[list(SourceTag::CollaborativeUser, 1.0, &[("a", 100.0), ("b", 3.0), ("c", 2.0), ("d", 1.0)])],
            10,
        );
        let scores: Vec<f64> = ranked.iter().map(|r| r.combined_score).collect();
        assert_eq!(scores, vec![1.0, 0.75, 0.5, 0.25]);
    }

    #[test]
    fn test_metadata_is_merged() {
        let agg = CandidateAggregator::default();
        let lists = vec![
            SourceList::new(
                SourceTag::VectorSimilarity,
                0.4,
                vec![cand("a", 0.9, SourceTag::VectorSimilarity)
                    .with_metadata("name", serde_json::json!("Noodle House"))],
            ),
            SourceList::new(
                SourceTag::CollaborativeUser,
                0.6,
                vec![cand("a", 0.3, SourceTag::CollaborativeUser)
                    .with_metadata("cf_score", serde_json::json!(0.3))],
            ),
        ];
        let ranked = agg.combine(&lists, 1);
        assert_eq!(ranked[0].metadata["name"], "Noodle House");
        assert_eq!(ranked[0].metadata["cf_score"], 0.3);
        assert!(ranked[0].rationale.is_none());
    }

    #[test]
    fn test_deterministic_regardless_of_candidate_order() {
        let agg = CandidateAggregator::default();
        let forward = vec![
            list(SourceTag::CollaborativeUser, 0.6, &[("a", 0.4), ("b", 0.4), ("c", 0.1)]),
            list(SourceTag::VectorSimilarity, 0.4, &[("c", 0.8), ("d", 0.2)]),
        ];
        let reversed = vec![
            list(SourceTag::CollaborativeUser, 0.6, &[("c", 0.1), ("b", 0.4), ("a", 0.4)]),
            list(SourceTag::VectorSimilarity, 0.4, &[("d", 0.2), ("c", 0.8)]),
        ];
        let first = agg.combine(&forward, 10);
        let second = agg.combine(&reversed, 10);
        assert_eq!(ids(&first), ids(&second));
        for (a, b) in first.iter().zip(&second) {
            assert_eq!(a.combined_score, b.combined_score);
        }
    }
}
