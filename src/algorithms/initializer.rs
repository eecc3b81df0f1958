use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::hash::Hash;

use crate::utils::stable_hash;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InitializationMethod {
    /// Uniform in `[-scale, scale)`.
    Uniform { scale: f64 },
    Zeros,
}

/// Deterministic factor initialisation keyed by entity id, so a user's starting
/// vector does not depend on how many other users are in the snapshot.
#[derive(Debug, Clone)]
pub struct EmbeddingInitializer {
    method: InitializationMethod,
    dimension: usize,
    seed: u64,
}

impl EmbeddingInitializer {
    pub fn new(method: InitializationMethod, dimension: usize, seed: u64) -> Self {
        Self {
            method,
            dimension,
            seed,
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn initialize<T: Hash + ?Sized>(&self, namespace: &str, id: &T) -> Vec<f64> {
        let seed = self.seed ^ stable_hash(&(namespace, stable_hash(id)));
        let mut rng = StdRng::seed_from_u64(seed);

        match self.method {
            InitializationMethod::Uniform { scale } => (0..self.dimension)
                .map(|_| rng.gen_range(-scale..scale))
                .collect(),
            InitializationMethod::Zeros => vec![0.0; self.dimension],
        }
    }
}
