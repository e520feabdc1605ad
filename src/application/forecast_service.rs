//! Library-facing service surface consumed by the thin API layer:
//! next-step prediction, historical lookup, forced model update, health.

use crate::application::model_cache::{period_start, ModelCache};
use crate::domain::errors::ForecastError;
use crate::domain::ports::MarketDataSource;
use crate::domain::repositories::PriceRepository;
use crate::domain::types::{
    AssetClass, Health, Metrics, ModelKey, Prediction, PricePoint, TrainConfig,
};
use chrono::Utc;
use std::sync::Arc;
use tracing::info;

pub struct ForecastService {
    cache: Arc<ModelCache>,
    prices: Arc<dyn PriceRepository>,
    source: Arc<dyn MarketDataSource>,
    lookback: usize,
    default_batch_size: usize,
}

impl ForecastService {
    pub fn new(
        cache: Arc<ModelCache>,
        prices: Arc<dyn PriceRepository>,
        source: Arc<dyn MarketDataSource>,
        lookback: usize,
        default_batch_size: usize,
    ) -> Self {
        Self {
            cache,
            prices,
            source,
            lookback,
            default_batch_size,
        }
    }

    /// Predict the next closing price for a symbol. Trains a model on the
    /// first request for a (symbol, period) and reuses it afterwards.
    pub async fn predict(
        &self,
        symbol: &str,
        asset_class: AssetClass,
        period: &str,
        epochs: usize,
    ) -> Result<Prediction, ForecastError> {
        info!("Predicting next price for {} ({})", symbol, period);
        let key = ModelKey::new(symbol, asset_class, period, self.lookback);
        let config = TrainConfig {
            epochs,
            batch_size: self.default_batch_size,
        };

        let model = self.cache.get_or_create(&key, config).await?;
        let predicted_price = model.predict_next()?;
        let current_price = model.last_close;
        let change = predicted_price - current_price;
        let change_percent = if current_price != 0.0 {
            change / current_price * 100.0
        } else {
            0.0
        };

        Ok(Prediction {
            symbol: symbol.to_string(),
            current_price,
            predicted_price,
            change,
            change_percent,
            rmse: model.metrics.rmse,
            mae: model.metrics.mae,
        })
    }

    /// Stored history for the requested range, fetching from the source
    /// first when nothing is stored yet for the symbol.
    pub async fn historical(
        &self,
        symbol: &str,
        asset_class: AssetClass,
        range: &str,
    ) -> Result<Vec<PricePoint>, ForecastError> {
        let start = period_start(range);
        let rows = self.prices.query(symbol, asset_class, start, None).await?;
        if !rows.is_empty() {
            return Ok(rows);
        }

        info!("No stored history for {}, fetching {}", symbol, range);
        let fetched = self.source.fetch(symbol, asset_class, range).await?;
        self.prices.upsert(&fetched).await?;
        self.prices.query(symbol, asset_class, start, None).await
    }

    /// Force a retrain for (symbol, period) and return the fresh metrics.
    pub async fn force_update(
        &self,
        symbol: &str,
        asset_class: AssetClass,
        period: &str,
        epochs: usize,
    ) -> Result<Metrics, ForecastError> {
        info!("Forcing model update for {} ({}, {} epochs)", symbol, period, epochs);
        let key = ModelKey::new(symbol, asset_class, period, self.lookback);
        let config = TrainConfig {
            epochs,
            batch_size: self.default_batch_size,
        };
        let model = self.cache.retrain(&key, config).await?;
        Ok(model.metrics)
    }

    pub fn health(&self) -> Health {
        Health {
            status: "healthy",
            timestamp: Utc::now(),
        }
    }
}
