use thiserror::Error;

/// Errors surfaced by the forecasting core.
///
/// Request paths propagate these to the caller; scheduled jobs catch them
/// per symbol and record the kind in the run report.
#[derive(Debug, Clone, Error)]
pub enum ForecastError {
    #[error("Failed to fetch data for {symbol}: {reason}")]
    DataFetch { symbol: String, reason: String },

    #[error("No data returned for {symbol}")]
    NoData { symbol: String },

    #[error("Insufficient data: need more than {required} rows, have {available}")]
    InsufficientData { required: usize, available: usize },

    #[error("Invalid price row: {reason}")]
    Validation { reason: String },

    #[error("Storage failure: {reason}")]
    Storage { reason: String },

    #[error("Training failed for {symbol}: {reason}")]
    Training { symbol: String, reason: String },

    #[error("No trained model for {symbol}; train one first")]
    ModelNotTrained { symbol: String },
}

impl From<sqlx::Error> for ForecastError {
    fn from(e: sqlx::Error) -> Self {
        ForecastError::Storage {
            reason: e.to_string(),
        }
    }
}

impl ForecastError {
    /// Short stable tag used when recording per-symbol job outcomes.
    pub fn kind(&self) -> &'static str {
        match self {
            ForecastError::DataFetch { .. } => "data_fetch",
            ForecastError::NoData { .. } => "no_data",
            ForecastError::InsufficientData { .. } => "insufficient_data",
            ForecastError::Validation { .. } => "validation",
            ForecastError::Storage { .. } => "storage",
            ForecastError::Training { .. } => "training",
            ForecastError::ModelNotTrained { .. } => "model_not_trained",
        }
    }
}
