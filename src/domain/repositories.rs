use crate::domain::errors::ForecastError;
use crate::domain::types::{AssetClass, PricePoint};
use async_trait::async_trait;
use chrono::NaiveDate;

#[async_trait]
pub trait PriceRepository: Send + Sync {
    /// Idempotent batch upsert keyed by (symbol, date, asset_class).
    /// The whole batch is one transaction. Returns the number of rows written.
    async fn upsert(&self, records: &[PricePoint]) -> Result<u64, ForecastError>;

    /// Stored history for a symbol, ascending by date. Absent bounds return
    /// the full history.
    async fn query(
        &self,
        symbol: &str,
        asset_class: AssetClass,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<Vec<PricePoint>, ForecastError>;

    /// Newest stored date for a symbol, if any.
    async fn latest_date(
        &self,
        symbol: &str,
        asset_class: AssetClass,
    ) -> Result<Option<NaiveDate>, ForecastError>;
}

/// Persisted trained-model artifact: forecaster state plus the scale
/// parameters it was fitted with, addressed by `{symbol}_{period}`.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ModelArtifact {
    pub symbol: String,
    pub period: String,
    pub lookback: usize,
    pub scale_min: f64,
    pub scale_max: f64,
    pub trained_from: NaiveDate,
    pub trained_to: NaiveDate,
    pub trained_at: chrono::DateTime<chrono::Utc>,
    pub rmse: f64,
    pub mae: f64,
    pub forecaster_state: serde_json::Value,
}

#[async_trait]
pub trait ModelArtifactRepository: Send + Sync {
    async fn save(&self, name: &str, artifact: &ModelArtifact) -> Result<(), ForecastError>;

    /// Returns `None` when no artifact exists under the name.
    async fn load(&self, name: &str) -> Result<Option<ModelArtifact>, ForecastError>;
}
