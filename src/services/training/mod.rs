//! Latent factor model as a rebuildable cache keyed by the vote snapshot.
//!
//! One rebuild runs at a time. Requests that arrive while it is in flight get
//! the last-good model when there is one, and only wait when there is not.

use crate::algorithms::{AlsParams, AlsTrainer, InteractionMatrix, LatentFactorModel};
use crate::error::{RecError, RecResult};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

#[derive(Debug, Clone)]
struct TrainedModel {
    model: Arc<LatentFactorModel>,
    trained_at: DateTime<Utc>,
}

pub struct TrainingService {
    trainer: AlsTrainer,
    current: RwLock<Option<TrainedModel>>,
    rebuild: Mutex<()>,
    rebuilds: AtomicU64,
    stale_serves: AtomicU64,
}

impl TrainingService {
    pub fn new(params: AlsParams) -> Self {
        Self {
            trainer: AlsTrainer::new(params),
            current: RwLock::new(None),
            rebuild: Mutex::new(()),
            rebuilds: AtomicU64::new(0),
            stale_serves: AtomicU64::new(0),
        }
    }

    pub fn params(&self) -> &AlsParams {
        self.trainer.params()
    }

    /// Last successfully trained model, whatever snapshot it belongs to.
    pub fn current(&self) -> Option<Arc<LatentFactorModel>> {
        self.current.read().as_ref().map(|t| t.model.clone())
    }

    fn fresh_for(&self, snapshot: u64) -> Option<Arc<LatentFactorModel>> {
        self.current().filter(|model| model.snapshot() == snapshot)
    }

    /// Model for `matrix`. Trains when the cached model belongs to an older
    /// snapshot, unless another rebuild is already running and a stale model
    /// can be served instead.
    pub async fn model_for(&self, matrix: Arc<InteractionMatrix>) -> RecResult<Arc<LatentFactorModel>> {
        let snapshot = matrix.fingerprint();
        if let Some(model) = self.fresh_for(snapshot) {
            return Ok(model);
        }

        let _guard = match self.rebuild.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                if let Some(stale) = self.current() {
                    self.stale_serves.fetch_add(1, Ordering::Relaxed);
                    debug!("Rebuild in flight, serving model for snapshot {:x}", stale.snapshot());
                    return Ok(stale);
                }
                debug!("Rebuild in flight and no model yet, waiting");
                self.rebuild.lock().await
            }
        };

        // The rebuild we waited on may have produced exactly this snapshot.
        if let Some(model) = self.fresh_for(snapshot) {
            return Ok(model);
        }

        let trainer = self.trainer.clone();
        let result = tokio::task::spawn_blocking(move || trainer.train(&matrix))
            .await
            .map_err(|e| RecError::Computation(format!("training task failed: {}", e)))?;

        let model = match result {
            Ok(model) => Arc::new(model),
            Err(e) => {
                if !e.is_recoverable() {
                    error!("ALS training failed: {}", e);
                }
                return Err(e);
            }
        };

        *self.current.write() = Some(TrainedModel {
            model: model.clone(),
            trained_at: Utc::now(),
        });
        self.rebuilds.fetch_add(1, Ordering::Relaxed);
        info!("Latent factor model refreshed for snapshot {:x}", snapshot);

        Ok(model)
    }

    pub fn invalidate(&self) {
        *self.current.write() = None;
    }

    pub fn get_training_stats(&self) -> HashMap<String, serde_json::Value> {
        let current = self.current.read().clone();
        let mut stats = HashMap::new();

        stats.insert("rebuilds".to_string(), self.rebuilds.load(Ordering::Relaxed).into());
        stats.insert("stale_serves".to_string(), self.stale_serves.load(Ordering::Relaxed).into());
        stats.insert("factors".to_string(), self.params().factors.into());

        if let Some(trained) = current {
            stats.insert("model_users".to_string(), trained.model.user_count().into());
            stats.insert("model_items".to_string(), trained.model.item_count().into());
            stats.insert("iterations_run".to_string(), trained.model.iterations_run().into());
            stats.insert("final_loss".to_string(), serde_json::json!(trained.model.final_loss()));
            stats.insert("trained_at".to_string(), trained.trained_at.to_rfc3339().into());
        }

        stats
    }
}
