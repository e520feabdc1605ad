//! Registry of trained models keyed by (symbol, period, lookback).
//!
//! Each key moves through `Uninitialized -> Training -> Ready` and back to
//! `Training` on retrain. Exactly one training run services all concurrent
//! callers for an uncached key; callers for distinct keys never block each
//! other. Training runs on a detached task, so a caller that goes away
//! mid-run never strands a key in `Training`. A failed training leaves the
//! key uninitialized and surfaces the error to every waiting caller.

use crate::application::features;
use crate::domain::errors::ForecastError;
use crate::domain::ports::{Forecaster, ForecasterFactory, MarketDataSource};
use crate::domain::repositories::{ModelArtifact, ModelArtifactRepository, PriceRepository};
use crate::domain::types::{Metrics, ModelKey, PricePoint, ScaleParams, TrainConfig};
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tracing::{info, warn};

/// A fully trained model. Published only once construction is complete and
/// replaced wholesale on retrain; readers never see a partial instance.
pub struct CachedModel {
    pub key: ModelKey,
    forecaster: Box<dyn Forecaster>,
    pub scale: ScaleParams,
    scaled_series: Vec<f64>,
    pub last_close: f64,
    pub trained_from: NaiveDate,
    pub trained_to: NaiveDate,
    pub trained_at: DateTime<Utc>,
    pub metrics: Metrics,
}

impl std::fmt::Debug for CachedModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedModel")
            .field("key", &self.key)
            .field("scale", &self.scale)
            .field("last_close", &self.last_close)
            .field("trained_from", &self.trained_from)
            .field("trained_to", &self.trained_to)
            .field("trained_at", &self.trained_at)
            .field("metrics", &self.metrics)
            .finish_non_exhaustive()
    }
}

impl CachedModel {
    /// Next-step price prediction from the last lookback window the model
    /// was trained against.
    pub fn predict_next(&self) -> Result<f64, ForecastError> {
        features::predict_next(
            self.forecaster.as_ref(),
            &self.scaled_series,
            self.key.lookback,
            self.scale,
        )
        .map_err(|reason| ForecastError::Training {
            symbol: self.key.symbol.clone(),
            reason,
        })
    }
}

type TrainResult = Result<Arc<CachedModel>, ForecastError>;

/// Handle to one in-flight training. The id distinguishes runs so stale
/// cleanup never removes a slot claimed by a newer run.
#[derive(Clone)]
struct TrainingRun {
    id: u64,
    forced: bool,
    rx: watch::Receiver<Option<TrainResult>>,
}

enum Slot {
    Training(TrainingRun),
    Ready(Arc<CachedModel>),
}

/// Collaborators the detached training task needs, cloned into the task so
/// training outlives the caller that started it.
#[derive(Clone)]
struct TrainContext {
    prices: Arc<dyn PriceRepository>,
    source: Arc<dyn MarketDataSource>,
    factory: Arc<dyn ForecasterFactory>,
    artifacts: Arc<dyn ModelArtifactRepository>,
}

pub struct ModelCache {
    slots: Arc<Mutex<HashMap<ModelKey, Slot>>>,
    ctx: TrainContext,
    next_run_id: AtomicU64,
    training_timeout: Option<Duration>,
}

impl ModelCache {
    pub fn new(
        prices: Arc<dyn PriceRepository>,
        source: Arc<dyn MarketDataSource>,
        factory: Arc<dyn ForecasterFactory>,
        artifacts: Arc<dyn ModelArtifactRepository>,
        training_timeout: Option<Duration>,
    ) -> Self {
        Self {
            slots: Arc::new(Mutex::new(HashMap::new())),
            ctx: TrainContext {
                prices,
                source,
                factory,
                artifacts,
            },
            next_run_id: AtomicU64::new(0),
            training_timeout,
        }
    }

    /// Return the Ready model for `key`, training one if necessary.
    /// Concurrent callers for the same key share a single training run.
    pub async fn get_or_create(
        &self,
        key: &ModelKey,
        config: TrainConfig,
    ) -> Result<Arc<CachedModel>, ForecastError> {
        self.get_or_create_inner(key, config, false).await
    }

    /// Force a fresh training run for `key`, ignoring any persisted
    /// artifact. A Ready entry is taken over atomically; a forced run
    /// already in flight is joined; an unforced run in flight is waited
    /// out first, so a forced retrain never resolves to a warm start.
    pub async fn retrain(
        &self,
        key: &ModelKey,
        config: TrainConfig,
    ) -> Result<Arc<CachedModel>, ForecastError> {
        self.get_or_create_inner(key, config, true).await
    }

    /// Drop the Ready entry for `key`, if any. An in-flight training keeps
    /// its slot so the single-flight guarantee holds.
    pub async fn invalidate(&self, key: &ModelKey) {
        let mut slots = self.slots.lock().await;
        if matches!(slots.get(key), Some(Slot::Ready(_))) {
            slots.remove(key);
        }
    }

    /// Atomically install a model: readers observe the old entry or the new
    /// one, never a mix.
    pub async fn replace(&self, key: &ModelKey, model: Arc<CachedModel>) {
        let mut slots = self.slots.lock().await;
        slots.insert(key.clone(), Slot::Ready(model));
    }

    pub async fn ready_count(&self) -> usize {
        let slots = self.slots.lock().await;
        slots
            .values()
            .filter(|s| matches!(s, Slot::Ready(_)))
            .count()
    }

    async fn get_or_create_inner(
        &self,
        key: &ModelKey,
        config: TrainConfig,
        force: bool,
    ) -> Result<Arc<CachedModel>, ForecastError> {
        enum Claim {
            Hit(Arc<CachedModel>),
            Wait(TrainingRun),
            Run(watch::Sender<Option<TrainResult>>, TrainingRun),
        }

        loop {
            // The map lock is only held to inspect or install the slot,
            // never across training or waiting. A forced caller takes over
            // a Ready slot under the same lock, leaving no window for an
            // unforced caller to slip a warm start in between.
            let claim = {
                let mut slots = self.slots.lock().await;
                match slots.get(key) {
                    Some(Slot::Ready(model)) if !force => Claim::Hit(model.clone()),
                    Some(Slot::Training(run)) => Claim::Wait(run.clone()),
                    _ => {
                        let (tx, rx) = watch::channel(None);
                        let run = TrainingRun {
                            id: self.next_run_id.fetch_add(1, Ordering::Relaxed),
                            forced: force,
                            rx,
                        };
                        slots.insert(key.clone(), Slot::Training(run.clone()));
                        Claim::Run(tx, run)
                    }
                }
            };

            match claim {
                Claim::Hit(model) => return Ok(model),
                Claim::Wait(run) => {
                    if force && !run.forced {
                        // The in-flight run may have warm started; wait it
                        // out and claim a fresh forced run on the next pass.
                        let _ = self.await_outcome(key, run, None).await;
                        continue;
                    }
                    return self.await_outcome(key, run, self.training_timeout).await;
                }
                Claim::Run(tx, run) => {
                    self.spawn_training(key.clone(), config, force, tx, run.id);
                    // The starter waits like any other caller, but without
                    // the waiter timeout: it asked for this run.
                    return self.await_outcome(key, run, None).await;
                }
            }
        }
    }

    /// Run the training pipeline on a detached task. The task owns the
    /// watch sender and always publishes an outcome and settles the slot,
    /// even when every caller has gone away.
    fn spawn_training(
        &self,
        key: ModelKey,
        config: TrainConfig,
        force: bool,
        tx: watch::Sender<Option<TrainResult>>,
        run_id: u64,
    ) {
        let ctx = self.ctx.clone();
        let slots = Arc::clone(&self.slots);
        tokio::spawn(async move {
            let outcome = ctx.train(&key, config, force).await;
            let mut slots = slots.lock().await;
            match &outcome {
                Ok(model) => {
                    slots.insert(key.clone(), Slot::Ready(model.clone()));
                    let _ = tx.send(Some(Ok(model.clone())));
                }
                Err(err) => {
                    // Back to Uninitialized; nothing is cached on failure.
                    if matches!(slots.get(&key), Some(Slot::Training(run)) if run.id == run_id) {
                        slots.remove(&key);
                    }
                    let _ = tx.send(Some(Err(err.clone())));
                }
            }
        });
    }

    async fn await_outcome(
        &self,
        key: &ModelKey,
        mut run: TrainingRun,
        timeout: Option<Duration>,
    ) -> Result<Arc<CachedModel>, ForecastError> {
        // Scope the watch guard so it is dropped before any later await:
        // holding it across an await would make this future !Send.
        let resolved = {
            let wait = run.rx.wait_for(|outcome| outcome.is_some());
            let outcome = match timeout {
                Some(limit) => match tokio::time::timeout(limit, wait).await {
                    Ok(changed) => changed,
                    Err(_) => {
                        return Err(ForecastError::Training {
                            symbol: key.symbol.clone(),
                            reason: format!("timed out after {:?} waiting for training", limit),
                        });
                    }
                },
                None => wait.await,
            };

            match outcome {
                Ok(guard) => match &*guard {
                    Some(Ok(model)) => Some(Ok(model.clone())),
                    Some(Err(err)) => Some(Err(err.clone())),
                    None => unreachable!("wait_for resolved without an outcome"),
                },
                Err(_) => None,
            }
        };

        match resolved {
            Some(result) => result,
            None => {
                // Sender gone without publishing: the training task
                // panicked. Clear the stale slot so the key can be
                // claimed again.
                self.clear_run(key, run.id).await;
                Err(ForecastError::Training {
                    symbol: key.symbol.clone(),
                    reason: "training task dropped before completing".to_string(),
                })
            }
        }
    }

    /// Remove the Training slot for `key` only if it still belongs to run
    /// `id`; a slot claimed by a newer run is left alone.
    async fn clear_run(&self, key: &ModelKey, id: u64) {
        let mut slots = self.slots.lock().await;
        if matches!(slots.get(key), Some(Slot::Training(run)) if run.id == id) {
            slots.remove(key);
        }
    }
}

impl TrainContext {
    /// Full training pipeline: fetch-if-absent, scale, window, fit off the
    /// async runtime, evaluate, persist the artifact.
    async fn train(
        &self,
        key: &ModelKey,
        config: TrainConfig,
        force: bool,
    ) -> Result<Arc<CachedModel>, ForecastError> {
        let rows = self.load_series(key).await?;
        let closes: Vec<f64> = rows.iter().map(|r| r.close).collect();
        let dates: Vec<NaiveDate> = rows.iter().map(|r| r.date).collect();

        if !force {
            if let Some(model) = self.try_warm_start(key, &closes).await {
                info!("ModelCache: warm start for {} from persisted artifact", key);
                return Ok(model);
            }
        }

        let scale = ScaleParams::fit(&closes);
        let scaled = scale.scale_series(&closes);
        let (x, y) = features::window(&scaled, key.lookback)?;

        info!(
            "ModelCache: training {} on {} windows ({} epochs)",
            key,
            x.len(),
            config.epochs
        );

        let factory = self.factory.clone();
        let lookback = key.lookback;
        let symbol = key.symbol.clone();
        let fit_result = tokio::task::spawn_blocking(move || {
            let mut forecaster = factory.build(lookback);
            forecaster.fit(&x, &y, &config)?;
            let metrics = features::evaluate(forecaster.as_ref(), &x, &y, scale)?;
            Ok::<_, String>((forecaster, metrics))
        })
        .await
        .map_err(|e| ForecastError::Training {
            symbol: symbol.clone(),
            reason: format!("training task panicked: {}", e),
        })?;

        let (forecaster, metrics) = fit_result.map_err(|reason| ForecastError::Training {
            symbol: symbol.clone(),
            reason,
        })?;

        let model = Arc::new(CachedModel {
            key: key.clone(),
            forecaster,
            scale,
            scaled_series: scaled,
            last_close: *closes.last().unwrap_or(&0.0),
            trained_from: dates[0],
            trained_to: dates[dates.len() - 1],
            trained_at: Utc::now(),
            metrics,
        });

        self.persist_artifact(&model).await;
        info!(
            "ModelCache: trained {} (rmse={:.4}, mae={:.4})",
            key, metrics.rmse, metrics.mae
        );
        Ok(model)
    }

    /// Query stored history for the key's period; on a miss or a series too
    /// short to window, fetch from the source, upsert, and re-query.
    async fn load_series(&self, key: &ModelKey) -> Result<Vec<PricePoint>, ForecastError> {
        let start = period_start(&key.period);
        let rows = self
            .prices
            .query(&key.symbol, key.asset_class, start, None)
            .await?;
        if rows.len() > key.lookback {
            return Ok(rows);
        }

        info!(
            "ModelCache: {} rows stored for {}, fetching {} from source",
            rows.len(),
            key.symbol,
            key.period
        );
        let fetched = self
            .source
            .fetch(&key.symbol, key.asset_class, &key.period)
            .await?;
        self.prices.upsert(&fetched).await?;

        let rows = self
            .prices
            .query(&key.symbol, key.asset_class, start, None)
            .await?;
        if rows.len() <= key.lookback {
            return Err(ForecastError::InsufficientData {
                required: key.lookback,
                available: rows.len(),
            });
        }
        Ok(rows)
    }

    async fn try_warm_start(&self, key: &ModelKey, closes: &[f64]) -> Option<Arc<CachedModel>> {
        let artifact = match self.artifacts.load(&key.artifact_name()).await {
            Ok(Some(artifact)) => artifact,
            Ok(None) => return None,
            Err(e) => {
                warn!("ModelCache: failed to load artifact for {}: {}", key, e);
                return None;
            }
        };
        if artifact.lookback != key.lookback {
            return None;
        }
        let forecaster = self
            .factory
            .restore(key.lookback, &artifact.forecaster_state)?;

        let scale = ScaleParams {
            min: artifact.scale_min,
            max: artifact.scale_max,
        };
        Some(Arc::new(CachedModel {
            key: key.clone(),
            forecaster,
            scale,
            scaled_series: scale.scale_series(closes),
            last_close: *closes.last()?,
            trained_from: artifact.trained_from,
            trained_to: artifact.trained_to,
            trained_at: artifact.trained_at,
            metrics: Metrics {
                rmse: artifact.rmse,
                mae: artifact.mae,
            },
        }))
    }

    /// Artifact persistence is best-effort: a failed save is logged and the
    /// in-memory model stays usable.
    async fn persist_artifact(&self, model: &CachedModel) {
        let state = match model.forecaster.state_json() {
            Ok(state) => state,
            Err(e) => {
                warn!("ModelCache: cannot serialize {}: {}", model.key, e);
                return;
            }
        };
        let artifact = ModelArtifact {
            symbol: model.key.symbol.clone(),
            period: model.key.period.clone(),
            lookback: model.key.lookback,
            scale_min: model.scale.min,
            scale_max: model.scale.max,
            trained_from: model.trained_from,
            trained_to: model.trained_to,
            trained_at: model.trained_at,
            rmse: model.metrics.rmse,
            mae: model.metrics.mae,
            forecaster_state: state,
        };
        if let Err(e) = self
            .artifacts
            .save(&model.key.artifact_name(), &artifact)
            .await
        {
            warn!("ModelCache: failed to persist artifact for {}: {}", model.key, e);
        }
    }
}

/// Map a period label to the start date of its window; `None` means the
/// full stored history.
pub fn period_start(period: &str) -> Option<NaiveDate> {
    let days = match period {
        "1mo" => 30,
        "3mo" => 90,
        "6mo" => 182,
        "1y" => 365,
        "2y" => 730,
        "5y" => 1825,
        _ => return None,
    };
    Some(Utc::now().date_naive() - chrono::Duration::days(days))
}
