use std::cmp::Ordering;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

pub mod validation;

/// Cosine similarity with the zero-vector convention: if either side has no
/// magnitude the similarity is 0, never NaN.
pub fn cosine_similarity(a: &[f64], b: &[f64]) -> f64 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot_product: f64 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f64 = a.iter().map(|x| x * x).sum::<f64>().sqrt();
    let norm_b: f64 = b.iter().map(|x| x * x).sum::<f64>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        (dot_product / (norm_a * norm_b)).clamp(-1.0, 1.0)
    }
}

pub fn l2_norm(vector: &[f64]) -> f64 {
    vector.iter().map(|x| x * x).sum::<f64>().sqrt()
}

pub fn normalize_vector(vector: &mut [f64]) {
    let norm = l2_norm(vector);
    if norm > 0.0 {
        for x in vector.iter_mut() {
            *x /= norm;
        }
    }
}

/// Scales scores into `[0, 1]`. A list whose scores are all equal maps to 1.0.
pub fn min_max_normalize(scores: &[f64]) -> Vec<f64> {
    if scores.is_empty() {
        return Vec::new();
    }

    let min = scores.iter().copied().fold(f64::INFINITY, f64::min);
    let max = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let range = max - min;

    if range <= f64::EPSILON {
        return vec![1.0; scores.len()];
    }

    scores.iter().map(|s| (s - min) / range).collect()
}

/// Rank-based scaling: the best score gets 1.0, the worst `1/len`. Equal
/// scores share the rank of their first occurrence.
pub fn rank_normalize(scores: &[f64]) -> Vec<f64> {
    let len = scores.len();
    if len == 0 {
        return Vec::new();
    }

    let mut order: Vec<usize> = (0..len).collect();
    order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]).then(a.cmp(&b)));

    let mut normalized = vec![0.0; len];
    let mut rank = 0;
    for (position, &idx) in order.iter().enumerate() {
        if position > 0 && scores[idx] != scores[order[position - 1]] {
            rank = position;
        }
        normalized[idx] = (len - rank) as f64 / len as f64;
    }
    normalized
}

/// Descending by score, ascending by key on ties.
pub fn by_score_then_key<K: Ord>(a: &(K, f64), b: &(K, f64)) -> Ordering {
    b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0))
}

pub fn top_k_by_score<K: Ord>(mut scored: Vec<(K, f64)>, k: usize) -> Vec<(K, f64)> {
    scored.sort_by(by_score_then_key);
    scored.truncate(k);
    scored
}

/// Stable 64-bit seed for a value. `DefaultHasher::new()` uses fixed keys.
pub fn stable_hash<T: Hash + ?Sized>(value: &T) -> u64 {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        assert_eq!(cosine_similarity(&a, &b), 0.0);

        let a = vec![1.0, 1.0];
        let b = vec![1.0, 1.0];
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_cosine_similarity_zero_vector_is_zero() {
        let zero = vec![0.0, 0.0, 0.0];
        let any = vec![0.3, -2.0, 5.0];
        let sim = cosine_similarity(&zero, &any);
        assert_eq!(sim, 0.0);
        assert!(!sim.is_nan());
        assert_eq!(cosine_similarity(&zero, &zero), 0.0);
    }

    #[test]
    fn test_min_max_normalize() {
        assert_eq!(min_max_normalize(&[2.0, 4.0, 3.0]), vec![0.0, 1.0, 0.5]);
        assert_eq!(min_max_normalize(&[0.7, 0.7]), vec![1.0, 1.0]);
        assert!(min_max_normalize(&[]).is_empty());
    }

    #[test]
    fn test_rank_normalize_shares_rank_on_ties() {
        let normalized = rank_normalize(&[0.2, 0.9, 0.9, 0.1]);
        assert_eq!(normalized, vec![0.5, 1.0, 1.0, 0.25]);
    }

    #[test]
    fn test_top_k_breaks_ties_by_key() {
        let scored = vec![("b", 0.5), ("a", 0.5), ("c", 0.9)];
        assert_eq!(top_k_by_score(scored, 2), vec![("c", 0.9), ("a", 0.5)]);
    }
}
