//! Periodic refresh pipeline: an hourly data-refresh job and a daily
//! retrain job over the tracked symbol set.
//!
//! Jobs are singleton definitions keyed by id. Re-registering an id swaps
//! the trigger and body but never touches a run already in progress, and a
//! trigger firing while the previous run is still active is skipped, not
//! run in parallel. Per-symbol failures inside a run are recorded in the
//! run's report and never abort the remaining symbols.

use crate::application::model_cache::ModelCache;
use crate::domain::ports::MarketDataSource;
use crate::domain::repositories::PriceRepository;
use crate::domain::types::{
    AssetClass, JobReport, ModelKey, SymbolOutcome, TrainConfig, TriggerSpec,
};
use chrono::{NaiveTime, Utc};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

pub const REFRESH_JOB_ID: &str = "refresh_data";
pub const RETRAIN_JOB_ID: &str = "retrain_models";

/// Window fetched when the store is already close to current; the full
/// refresh period is only fetched for cold or stale symbols.
const CATCHUP_PERIOD: &str = "5d";
const CATCHUP_MAX_AGE_DAYS: i64 = 5;

type BodyFuture = Pin<Box<dyn Future<Output = Vec<SymbolOutcome>> + Send>>;
pub type JobBody = Arc<dyn Fn() -> BodyFuture + Send + Sync>;

#[derive(Clone)]
struct JobDefinition {
    trigger: TriggerSpec,
    body: JobBody,
}

/// Per-id state that survives re-registration, so the no-overlap guard
/// keeps covering a run started under the old definition.
struct JobRuntime {
    running: Arc<Mutex<()>>,
    last_report: RwLock<Option<JobReport>>,
}

pub struct RefreshScheduler {
    jobs: RwLock<HashMap<String, JobDefinition>>,
    runtimes: RwLock<HashMap<String, Arc<JobRuntime>>>,
}

impl RefreshScheduler {
    pub fn new() -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            runtimes: RwLock::new(HashMap::new()),
        }
    }

    /// Register or replace a job definition. The id is a singleton: a
    /// second registration swaps trigger and body only.
    pub async fn register(&self, id: &str, trigger: TriggerSpec, body: JobBody) {
        let mut jobs = self.jobs.write().await;
        if jobs.insert(id.to_string(), JobDefinition { trigger, body }).is_some() {
            info!("Scheduler: replaced definition of job '{}'", id);
        } else {
            info!("Scheduler: registered job '{}'", id);
        }

        let mut runtimes = self.runtimes.write().await;
        runtimes.entry(id.to_string()).or_insert_with(|| {
            Arc::new(JobRuntime {
                running: Arc::new(Mutex::new(())),
                last_report: RwLock::new(None),
            })
        });
    }

    /// Spawn one dispatch loop per registered job. The trigger is re-read
    /// every cycle so a replaced definition takes effect on the next fire.
    pub async fn start(self: &Arc<Self>) -> Vec<tokio::task::JoinHandle<()>> {
        let ids: Vec<String> = self.jobs.read().await.keys().cloned().collect();
        let mut handles = Vec::with_capacity(ids.len());
        for id in ids {
            let scheduler = Arc::clone(self);
            handles.push(tokio::spawn(async move {
                scheduler.dispatch_loop(&id).await;
            }));
        }
        handles
    }

    async fn dispatch_loop(&self, id: &str) {
        loop {
            let trigger = match self.jobs.read().await.get(id) {
                Some(def) => def.trigger,
                None => {
                    warn!("Scheduler: job '{}' disappeared, stopping its loop", id);
                    return;
                }
            };
            tokio::time::sleep(sleep_until_next_fire(trigger)).await;
            self.trigger(id).await;
        }
    }

    /// Fire a job on its worker task. Skips when the previous run of the
    /// same id is still active.
    pub async fn trigger(&self, id: &str) {
        let Some(def) = self.jobs.read().await.get(id).cloned() else {
            return;
        };
        let Some(runtime) = self.runtimes.read().await.get(id).cloned() else {
            return;
        };

        let guard = match Arc::clone(&runtime.running).try_lock_owned() {
            Ok(guard) => guard,
            Err(_) => {
                warn!("Scheduler: job '{}' still running, skipping this firing", id);
                return;
            }
        };

        let job_id = id.to_string();
        tokio::spawn(async move {
            let report = run_body(&job_id, &def.body).await;
            *runtime.last_report.write().await = Some(report);
            drop(guard);
        });
    }

    /// Run a job immediately, waiting for any in-flight run to finish
    /// first. Used by the CLI subcommands.
    pub async fn run_job_once(&self, id: &str) -> Option<JobReport> {
        let def = self.jobs.read().await.get(id).cloned()?;
        let runtime = self.runtimes.read().await.get(id).cloned()?;

        let _guard = runtime.running.lock().await;
        let report = run_body(id, &def.body).await;
        *runtime.last_report.write().await = Some(report.clone());
        Some(report)
    }

    pub async fn last_report(&self, id: &str) -> Option<JobReport> {
        let runtime = self.runtimes.read().await.get(id).cloned()?;
        let report = runtime.last_report.read().await.clone();
        report
    }

    pub async fn job_count(&self) -> usize {
        self.jobs.read().await.len()
    }
}

impl Default for RefreshScheduler {
    fn default() -> Self {
        Self::new()
    }
}

async fn run_body(id: &str, body: &JobBody) -> JobReport {
    let started_at = Utc::now();
    info!("Scheduler: job '{}' starting", id);
    let outcomes = (body)().await;
    let failed = outcomes.iter().filter(|o| !o.is_ok()).count();
    if failed > 0 {
        warn!(
            "Scheduler: job '{}' finished, {}/{} symbols failed",
            id,
            failed,
            outcomes.len()
        );
    } else {
        info!(
            "Scheduler: job '{}' finished, {} symbols ok",
            id,
            outcomes.len()
        );
    }
    JobReport {
        job_id: id.to_string(),
        started_at,
        finished_at: Utc::now(),
        outcomes,
    }
}

fn sleep_until_next_fire(trigger: TriggerSpec) -> Duration {
    match trigger {
        TriggerSpec::Interval { every } => every,
        TriggerSpec::Daily { hour, minute } => {
            let now = Utc::now();
            let fire_time = NaiveTime::from_hms_opt(hour, minute, 0)
                .unwrap_or(NaiveTime::MIN);
            let today_fire = now.date_naive().and_time(fire_time).and_utc();
            let next = if today_fire > now {
                today_fire
            } else {
                today_fire + chrono::Duration::days(1)
            };
            (next - now).to_std().unwrap_or(Duration::from_secs(60))
        }
    }
}

/// Body of the hourly refresh job: fetch the latest window for every
/// tracked symbol and upsert it. Symbols whose stored history is already
/// close to current only fetch a short catch-up window instead of the full
/// refresh period. One symbol failing never stops the rest.
pub fn refresh_job_body(
    source: Arc<dyn MarketDataSource>,
    prices: Arc<dyn PriceRepository>,
    symbols: Vec<(String, AssetClass)>,
    period: String,
) -> JobBody {
    Arc::new(move || {
        let source = source.clone();
        let prices = prices.clone();
        let symbols = symbols.clone();
        let period = period.clone();
        Box::pin(async move {
            let today = Utc::now().date_naive();
            let mut outcomes = Vec::with_capacity(symbols.len());
            for (symbol, asset_class) in &symbols {
                let result = async {
                    let latest = prices.latest_date(symbol, *asset_class).await?;
                    let fetch_period = match latest {
                        Some(date)
                            if today - date <= chrono::Duration::days(CATCHUP_MAX_AGE_DAYS) =>
                        {
                            CATCHUP_PERIOD
                        }
                        _ => period.as_str(),
                    };
                    let rows = source.fetch(symbol, *asset_class, fetch_period).await?;
                    prices.upsert(&rows).await?;
                    Ok::<_, crate::domain::errors::ForecastError>((rows.len(), fetch_period))
                }
                .await;

                match result {
                    Ok((count, fetch_period)) => {
                        info!("Refresh: stored {} rows for {} ({})", count, symbol, fetch_period);
                        outcomes.push(SymbolOutcome::ok(symbol));
                    }
                    Err(e) => {
                        warn!("Refresh: {} failed: {}", symbol, e);
                        outcomes.push(SymbolOutcome::failed(symbol, &e));
                    }
                }
            }
            outcomes
        })
    })
}

/// Body of the daily retrain job: force a fresh training run per tracked
/// symbol. Failed symbols are recorded and retried on the next firing.
pub fn retrain_job_body(
    cache: Arc<ModelCache>,
    symbols: Vec<(String, AssetClass)>,
    period: String,
    lookback: usize,
    config: TrainConfig,
) -> JobBody {
    Arc::new(move || {
        let cache = cache.clone();
        let symbols = symbols.clone();
        let period = period.clone();
        Box::pin(async move {
            let mut outcomes = Vec::with_capacity(symbols.len());
            for (symbol, asset_class) in &symbols {
                let key = ModelKey::new(symbol, *asset_class, &period, lookback);
                match cache.retrain(&key, config).await {
                    Ok(model) => {
                        info!(
                            "Retrain: {} ok (rmse={:.4})",
                            symbol, model.metrics.rmse
                        );
                        outcomes.push(SymbolOutcome::ok(symbol));
                    }
                    Err(e) => {
                        warn!("Retrain: {} failed: {}", symbol, e);
                        outcomes.push(SymbolOutcome::failed(symbol, &e));
                    }
                }
            }
            outcomes
        })
    })
}
