//! User × item signed preference matrix built from vote records.
//!
//! Rows exist only for users with at least one non-zero entry and columns only
//! for items that some user rated non-zero. Missing entries mean "no expressed
//! preference" (0), not dislike.

use crate::models::{ItemKey, VoteRecord};
use crate::utils::validation::validate_vote_record;
use chrono::{DateTime, Utc};
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::hash::{Hash, Hasher};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default)]
pub struct InteractionMatrix {
    rows: BTreeMap<String, BTreeMap<ItemKey, f64>>,
    users: Vec<String>,
    items: Vec<ItemKey>,
    item_index: HashMap<ItemKey, usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MatrixStats {
    pub total_users: usize,
    pub total_items: usize,
    pub total_ratings: usize,
    pub sparsity: f64,
    pub avg_rating: f64,
    pub avg_ratings_per_user: f64,
    pub avg_ratings_per_item: f64,
}

impl InteractionMatrix {
    pub fn empty() -> Self {
        Self::default()
    }

    fn from_rows(rows: BTreeMap<String, BTreeMap<ItemKey, f64>>) -> Self {
        let users: Vec<String> = rows.keys().cloned().collect();
        let items: Vec<ItemKey> = rows
            .values()
            .flat_map(|row| row.keys().cloned())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let item_index = items.iter().enumerate().map(|(i, k)| (k.clone(), i)).collect();

        Self {
            rows,
            users,
            items,
            item_index,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    pub fn item_count(&self) -> usize {
        self.items.len()
    }

    /// Users in ascending order; position equals the dense row index.
    pub fn users(&self) -> &[String] {
        &self.users
    }

    /// Items in ascending order; position equals the dense column index.
    pub fn items(&self) -> &[ItemKey] {
        &self.items
    }

    /// Dense column index of `item`, if it has a column.
    pub(crate) fn item_position(&self, item: &ItemKey) -> Option<usize> {
        self.item_index.get(item).copied()
    }

    pub fn contains_user(&self, user_id: &str) -> bool {
        self.rows.contains_key(user_id)
    }

    pub fn get(&self, user_id: &str, item: &ItemKey) -> f64 {
        self.rows
            .get(user_id)
            .and_then(|row| row.get(item))
            .copied()
            .unwrap_or(0.0)
    }

    pub fn row(&self, user_id: &str) -> Option<&BTreeMap<ItemKey, f64>> {
        self.rows.get(user_id)
    }

    pub fn rows(&self) -> impl Iterator<Item = (&String, &BTreeMap<ItemKey, f64>)> {
        self.rows.iter()
    }

    pub fn non_zero_count(&self) -> usize {
        self.rows.values().map(|row| row.len()).sum()
    }

    /// Dense users × items copy for one compute cycle.
    pub fn to_dense(&self) -> DMatrix<f64> {
        let mut dense = DMatrix::zeros(self.users.len(), self.items.len());
        for (r, user) in self.users.iter().enumerate() {
            if let Some(row) = self.rows.get(user) {
                for (item, score) in row {
                    if let Some(&c) = self.item_index.get(item) {
                        dense[(r, c)] = *score;
                    }
                }
            }
        }
        dense
    }

    /// Identifies the vote snapshot this matrix was built from.
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        for (user, row) in &self.rows {
            user.hash(&mut hasher);
            for (item, score) in row {
                item.hash(&mut hasher);
                score.to_bits().hash(&mut hasher);
            }
        }
        hasher.finish()
    }

    pub fn stats(&self) -> MatrixStats {
        let total_users = self.user_count();
        let total_items = self.item_count();
        let total_ratings = self.non_zero_count();

        if total_ratings == 0 {
            return MatrixStats {
                total_users,
                total_items,
                total_ratings,
                sparsity: 1.0,
                avg_rating: 0.0,
                avg_ratings_per_user: 0.0,
                avg_ratings_per_item: 0.0,
            };
        }

        let cells = (total_users * total_items) as f64;
        let rating_sum: f64 = self.rows.values().flat_map(|row| row.values()).sum();

        MatrixStats {
            total_users,
            total_items,
            total_ratings,
            sparsity: 1.0 - total_ratings as f64 / cells,
            avg_rating: rating_sum / total_ratings as f64,
            avg_ratings_per_user: total_ratings as f64 / total_users as f64,
            avg_ratings_per_item: total_ratings as f64 / total_items as f64,
        }
    }
}

/// Sole writer of [`InteractionMatrix`].
#[derive(Debug, Clone, Default)]
pub struct MatrixBuilder;

impl MatrixBuilder {
    pub fn new() -> Self {
        Self
    }

    /// Latest vote per (user, item) wins; on equal timestamps the record that
    /// comes later in `records` wins. The result depends on `records` alone,
    /// never on the wall clock.
    pub fn build(&self, records: &[VoteRecord]) -> InteractionMatrix {
        if records.is_empty() {
            debug!("No vote records, returning empty interaction matrix");
            return InteractionMatrix::empty();
        }

        let mut latest: HashMap<(&str, ItemKey), (DateTime<Utc>, f64)> = HashMap::new();
        let mut skipped = 0usize;

        for record in records {
            if let Err(e) = validate_vote_record(record) {
                warn!("Skipping vote record for user '{}': {}", record.user_id, e);
                skipped += 1;
                continue;
            }

            let key = (record.user_id.as_str(), record.item_key());
            let score = record.action.score();
            match latest.get_mut(&key) {
                Some(existing) if record.timestamp < existing.0 => {}
                Some(existing) => *existing = (record.timestamp, score),
                None => {
                    latest.insert(key, (record.timestamp, score));
                }
            }
        }

        let mut rows: BTreeMap<String, BTreeMap<ItemKey, f64>> = BTreeMap::new();
        for ((user, item), (_, score)) in latest {
            if score != 0.0 {
                rows.entry(user.to_string()).or_default().insert(item, score);
            }
        }

        let matrix = InteractionMatrix::from_rows(rows);
        info!(
            "Built interaction matrix: {} users x {} items ({} non-zero, {} records skipped)",
            matrix.user_count(),
            matrix.item_count(),
            matrix.non_zero_count(),
            skipped
        );
        matrix
    }
}
