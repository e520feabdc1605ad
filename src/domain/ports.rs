use crate::domain::errors::ForecastError;
use crate::domain::types::{AssetClass, PricePoint, TrainConfig};
use async_trait::async_trait;

// Need async_trait for async functions in traits
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    /// Fetch the latest history for a symbol, ascending by date.
    /// Returns `NoData` when the source has nothing for the symbol.
    async fn fetch(
        &self,
        symbol: &str,
        asset_class: AssetClass,
        period: &str,
    ) -> Result<Vec<PricePoint>, ForecastError>;
}

/// Trainable next-step numeric model over fixed-length windows.
///
/// `fit` and `predict` are synchronous and CPU-bound; callers move them off
/// the async runtime with `spawn_blocking`. No determinism is assumed.
pub trait Forecaster: Send + Sync {
    /// Train on supervised windows: `features[i]` holds `lookback` scaled
    /// values, `targets[i]` the scaled value that follows them.
    fn fit(
        &mut self,
        features: &[Vec<f64>],
        targets: &[f64],
        config: &TrainConfig,
    ) -> Result<(), String>;

    /// Predict the scaled next value for one window.
    fn predict(&self, window: &[f64]) -> Result<f64, String>;

    /// Serialized trained state, persisted alongside the scale parameters.
    fn state_json(&self) -> Result<serde_json::Value, String>;
}

pub trait ForecasterFactory: Send + Sync {
    fn build(&self, lookback: usize) -> Box<dyn Forecaster>;

    /// Rehydrate a forecaster from persisted state, if supported.
    fn restore(&self, lookback: usize, state: &serde_json::Value) -> Option<Box<dyn Forecaster>>;
}
