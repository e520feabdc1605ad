//! System orchestrator: wires persistence, market data, the model cache and
//! the scheduler from configuration.

use crate::application::forecast_service::ForecastService;
use crate::application::model_cache::ModelCache;
use crate::application::scheduler::{
    refresh_job_body, retrain_job_body, RefreshScheduler, REFRESH_JOB_ID, RETRAIN_JOB_ID,
};
use crate::config::Config;
use crate::domain::ports::{ForecasterFactory, MarketDataSource};
use crate::domain::repositories::{ModelArtifactRepository, PriceRepository};
use crate::domain::types::{TrainConfig, TriggerSpec};
use crate::infrastructure::forecaster::GradientForecasterFactory;
use crate::infrastructure::market_data::ChartHttpSource;
use crate::infrastructure::persistence::artifacts::FileModelArtifactRepository;
use crate::infrastructure::persistence::database::Database;
use crate::infrastructure::persistence::price_repository::SqlitePriceRepository;
use anyhow::Result;
use std::sync::Arc;
use tracing::info;

pub struct Application {
    pub config: Config,
    pub service: Arc<ForecastService>,
    pub cache: Arc<ModelCache>,
    pub scheduler: Arc<RefreshScheduler>,
}

impl Application {
    /// Build the full service with the default infrastructure: SQLite
    /// store, HTTP market data, file artifacts, gradient forecaster.
    pub async fn build(config: Config) -> Result<Self> {
        let database = Database::new(&config.db_url).await?;
        let prices: Arc<dyn PriceRepository> =
            Arc::new(SqlitePriceRepository::new(database.pool.clone()));
        let source: Arc<dyn MarketDataSource> =
            Arc::new(ChartHttpSource::new(&config.market_data_base_url)?);
        let factory: Arc<dyn ForecasterFactory> = Arc::new(GradientForecasterFactory::default());
        let artifacts: Arc<dyn ModelArtifactRepository> =
            Arc::new(FileModelArtifactRepository::new(&config.model_dir));

        Self::build_with(config, prices, source, factory, artifacts).await
    }

    /// Build with explicit collaborators. Tests wire mocks through here.
    pub async fn build_with(
        config: Config,
        prices: Arc<dyn PriceRepository>,
        source: Arc<dyn MarketDataSource>,
        factory: Arc<dyn ForecasterFactory>,
        artifacts: Arc<dyn ModelArtifactRepository>,
    ) -> Result<Self> {
        let tracked = config.tracked_symbols();
        if tracked.is_empty() {
            anyhow::bail!("Cannot build application without tracked symbols");
        }

        let cache = Arc::new(ModelCache::new(
            prices.clone(),
            source.clone(),
            factory,
            artifacts,
            config.training_timeout,
        ));

        let service = Arc::new(ForecastService::new(
            cache.clone(),
            prices.clone(),
            source.clone(),
            config.lookback_days,
            config.default_batch_size,
        ));

        let scheduler = Arc::new(RefreshScheduler::new());
        scheduler
            .register(
                REFRESH_JOB_ID,
                TriggerSpec::Interval {
                    every: config.refresh_interval,
                },
                refresh_job_body(
                    source.clone(),
                    prices.clone(),
                    tracked.clone(),
                    config.refresh_period.clone(),
                ),
            )
            .await;
        scheduler
            .register(
                RETRAIN_JOB_ID,
                TriggerSpec::Daily {
                    hour: config.retrain_hour,
                    minute: config.retrain_minute,
                },
                retrain_job_body(
                    cache.clone(),
                    tracked,
                    config.retrain_period.clone(),
                    config.lookback_days,
                    TrainConfig {
                        epochs: config.retrain_epochs,
                        batch_size: config.default_batch_size,
                    },
                ),
            )
            .await;

        info!(
            "Application built: {} stock / {} crypto symbols tracked",
            config.stock_symbols.len(),
            config.crypto_symbols.len()
        );

        Ok(Self {
            config,
            service,
            cache,
            scheduler,
        })
    }

    /// Start the scheduler dispatch loops.
    pub async fn start(&self) -> Vec<tokio::task::JoinHandle<()>> {
        info!(
            "Starting scheduler: refresh every {:?}, retrain daily at {:02}:{:02} UTC",
            self.config.refresh_interval, self.config.retrain_hour, self.config.retrain_minute
        );
        self.scheduler.start().await
    }
}
