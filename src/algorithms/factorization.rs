//! Alternating least squares over implicit feedback.
//!
//! The signed matrix is read as preference/confidence pairs: a like is
//! preference 1, an unlike is preference 0, and both carry confidence
//! `1 + alpha * |r|`. Unobserved cells are preference 0 with confidence 1.
//! Training runs a fixed number of sweeps unless a tolerance is configured.

use crate::algorithms::initializer::{EmbeddingInitializer, InitializationMethod};
use crate::algorithms::matrix::InteractionMatrix;
use crate::config::TrainingConfig;
use crate::error::{RecError, RecResult};
use crate::models::{Candidate, ItemKey, SourceTag};
use crate::utils::top_k_by_score;
use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;
use std::collections::{HashMap, HashSet};
use std::time::Instant;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq)]
pub struct AlsParams {
    pub factors: usize,
    pub iterations: usize,
    pub regularization: f64,
    pub alpha: f64,
    pub seed: u64,
    pub tolerance: Option<f64>,
}

impl Default for AlsParams {
    fn default() -> Self {
        Self {
            factors: 50,
            iterations: 20,
            regularization: 0.01,
            alpha: 1.0,
            seed: 42,
            tolerance: None,
        }
    }
}

impl From<&TrainingConfig> for AlsParams {
    fn from(config: &TrainingConfig) -> Self {
        Self {
            factors: config.factors,
            iterations: config.iterations,
            regularization: config.regularization,
            alpha: config.alpha,
            seed: config.seed,
            tolerance: config.tolerance,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LatentFactorModel {
    users: Vec<String>,
    user_index: HashMap<String, usize>,
    items: Vec<ItemKey>,
    user_factors: DMatrix<f64>,
    item_factors: DMatrix<f64>,
    rated: Vec<HashSet<usize>>,
    snapshot: u64,
    iterations_run: usize,
    final_loss: f64,
}

impl LatentFactorModel {
    pub fn snapshot(&self) -> u64 {
        self.snapshot
    }

    pub fn iterations_run(&self) -> usize {
        self.iterations_run
    }

    pub fn final_loss(&self) -> f64 {
        self.final_loss
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    pub fn item_count(&self) -> usize {
        self.items.len()
    }

    pub fn factors(&self) -> usize {
        self.user_factors.ncols()
    }

    pub fn knows_user(&self, user_id: &str) -> bool {
        self.user_index.contains_key(user_id)
    }

    /// Predicted preference of `user_id` for `item`.
    pub fn score(&self, user_id: &str, item: &ItemKey) -> Option<f64> {
        let u = *self.user_index.get(user_id)?;
        let i = self.items.iter().position(|k| k == item)?;
        Some(self.user_factors.row(u).dot(&self.item_factors.row(i)))
    }

    /// Top `n` items the user has not voted on yet. Cold users get nothing.
    pub fn recommend(&self, user_id: &str, n: usize) -> Vec<Candidate> {
        let Some(&u) = self.user_index.get(user_id) else {
            info!("Cold user {} has no latent factors, skipping ALS candidates", user_id);
            return Vec::new();
        };

        let user_vector = self.user_factors.row(u).transpose();
        let scores = &self.item_factors * user_vector;
        let rated = &self.rated[u];

        let scored: Vec<(ItemKey, f64)> = self
            .items
            .iter()
            .enumerate()
            .filter(|(i, _)| !rated.contains(i))
            .map(|(i, item)| (item.clone(), scores[i]))
            .collect();

        top_k_by_score(scored, n)
            .into_iter()
            .map(|(item, score)| {
                Candidate::new(item, score, SourceTag::LatentFactor)
                    .with_metadata("als_score", serde_json::json!(score))
            })
            .collect()
    }
}

/// Observed cells of one row (or column): (index, signed rating).
type Observations = Vec<Vec<(usize, f64)>>;

#[derive(Debug, Clone)]
pub struct AlsTrainer {
    params: AlsParams,
}

impl AlsTrainer {
    pub fn new(params: AlsParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &AlsParams {
        &self.params
    }

    pub fn train(&self, matrix: &InteractionMatrix) -> RecResult<LatentFactorModel> {
        if matrix.is_empty() {
            return Err(RecError::DataUnavailable(
                "cannot train latent factors on an empty matrix".to_string(),
            ));
        }
        if self.params.factors == 0 {
            return Err(RecError::InvalidRequest("factors must be positive".to_string()));
        }
        if !(self.params.regularization > 0.0) {
            return Err(RecError::InvalidRequest(
                "regularization must be positive".to_string(),
            ));
        }

        let start = Instant::now();
        let k = self.params.factors;
        let users = matrix.users().to_vec();
        let items = matrix.items().to_vec();

        let mut by_user: Observations = vec![Vec::new(); users.len()];
        let mut by_item: Observations = vec![Vec::new(); items.len()];
        for (u, user) in users.iter().enumerate() {
            if let Some(row) = matrix.row(user) {
                for (item, &rating) in row {
                    if let Some(i) = matrix.item_position(item) {
                        by_user[u].push((i, rating));
                        by_item[i].push((u, rating));
                    }
                }
            }
        }

        let user_init = EmbeddingInitializer::new(InitializationMethod::Zeros, k, self.params.seed);
        let item_init = EmbeddingInitializer::new(
            InitializationMethod::Uniform { scale: 0.1 },
            k,
            self.params.seed,
        );
        let mut user_factors = factor_matrix(&users, |id| user_init.initialize("user", id), k);
        let mut item_factors = factor_matrix(&items, |id| item_init.initialize("item", id), k);

        let mut previous_loss = f64::INFINITY;
        let mut loss = f64::INFINITY;
        let mut iterations_run = 0;

        for iteration in 0..self.params.iterations {
            user_factors = self.solve_side(&item_factors, &by_user)?;
            item_factors = self.solve_side(&user_factors, &by_item)?;
            iterations_run = iteration + 1;

            loss = self.loss(&user_factors, &item_factors, &by_user);
            debug!("ALS iteration {}: loss = {:.6}", iteration, loss);

            if let Some(tolerance) = self.params.tolerance {
                let change = (previous_loss - loss).abs() / previous_loss.abs().max(f64::EPSILON);
                if previous_loss.is_finite() && change < tolerance {
                    debug!("ALS converged after {} iterations (relative change {:.2e})", iterations_run, change);
                    break;
                }
            }
            previous_loss = loss;
        }

        if !loss.is_finite() && iterations_run > 0 {
            return Err(RecError::Computation(format!(
                "ALS loss diverged to {} after {} iterations",
                loss, iterations_run
            )));
        }

        let user_index = users.iter().enumerate().map(|(i, u)| (u.clone(), i)).collect();
        let rated = by_user
            .iter()
            .map(|obs| obs.iter().map(|(i, _)| *i).collect())
            .collect();

        info!(
            "Trained ALS model: {} users, {} items, {} factors, {} iterations in {:?}",
            users.len(),
            items.len(),
            k,
            iterations_run,
            start.elapsed()
        );

        Ok(LatentFactorModel {
            users,
            user_index,
            items,
            user_factors,
            item_factors,
            rated,
            snapshot: matrix.fingerprint(),
            iterations_run,
            final_loss: loss,
        })
    }

    /// Solves every row of one side with the other side held fixed:
    /// `(FᵀF + Fᵀ(Cᵤ - I)F + λI) x = FᵀCᵤp(u)`.
    fn solve_side(&self, fixed: &DMatrix<f64>, observations: &Observations) -> RecResult<DMatrix<f64>> {
        let k = fixed.ncols();
        let gram = fixed.transpose() * fixed;
        let alpha = self.params.alpha;
        let lambda = self.params.regularization;

        let rows: Vec<DVector<f64>> = observations
            .par_iter()
            .enumerate()
            .map(|(row, observed)| {
                let mut a = gram.clone();
                let mut b = DVector::<f64>::zeros(k);

                for &(j, rating) in observed {
                    let y = fixed.row(j).transpose();
                    let confidence = 1.0 + alpha * rating.abs();
                    a += (&y * y.transpose()) * (confidence - 1.0);
                    if rating > 0.0 {
                        b += &y * confidence;
                    }
                }

                for d in 0..k {
                    a[(d, d)] += lambda;
                }

                a.cholesky()
                    .map(|chol| chol.solve(&b))
                    .ok_or_else(|| {
                        RecError::Computation(format!(
                            "ALS normal equations for row {} are not positive definite",
                            row
                        ))
                    })
            })
            .collect::<RecResult<Vec<_>>>()?;

        let mut solved = DMatrix::zeros(observations.len(), k);
        for (r, x) in rows.iter().enumerate() {
            solved.set_row(r, &x.transpose());
        }
        Ok(solved)
    }

    fn loss(&self, user_factors: &DMatrix<f64>, item_factors: &DMatrix<f64>, by_user: &Observations) -> f64 {
        let predictions = user_factors * item_factors.transpose();
        let alpha = self.params.alpha;

        // Every cell starts as preference 0 with confidence 1; observed cells are corrected below.
        let mut total: f64 = predictions.iter().map(|p| p * p).sum();
        for (u, observed) in by_user.iter().enumerate() {
            for &(i, rating) in observed {
                let predicted = predictions[(u, i)];
                let preference = if rating > 0.0 { 1.0 } else { 0.0 };
                let confidence = 1.0 + alpha * rating.abs();
                total -= predicted * predicted;
                total += confidence * (preference - predicted).powi(2);
            }
        }

        total
            + self.params.regularization
                * (user_factors.norm_squared() + item_factors.norm_squared())
    }
}

fn factor_matrix<K>(ids: &[K], init: impl Fn(&K) -> Vec<f64>, k: usize) -> DMatrix<f64> {
    let mut factors = DMatrix::zeros(ids.len(), k);
    for (r, id) in ids.iter().enumerate() {
        for (c, value) in init(id).into_iter().enumerate() {
            factors[(r, c)] = value;
        }
    }
    factors
}

/// `train(matrix, factors, iterations)` with the remaining parameters at defaults.
pub fn train(matrix: &InteractionMatrix, factors: usize, iterations: usize) -> RecResult<LatentFactorModel> {
    AlsTrainer::new(AlsParams {
        factors,
        iterations,
        ..AlsParams::default()
    })
    .train(matrix)
}
