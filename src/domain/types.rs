use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AssetClass {
    Stock,
    Crypto,
}

impl fmt::Display for AssetClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssetClass::Stock => write!(f, "stock"),
            AssetClass::Crypto => write!(f, "crypto"),
        }
    }
}

impl std::str::FromStr for AssetClass {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "stock" => Ok(AssetClass::Stock),
            "crypto" => Ok(AssetClass::Crypto),
            _ => anyhow::bail!("Invalid asset class: {}. Must be 'stock' or 'crypto'", s),
        }
    }
}

/// One OHLCV row. Unique per (symbol, date, asset_class); replaced wholesale
/// by upsert, read-only everywhere else.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub symbol: String,
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: i64,
    pub asset_class: AssetClass,
}

/// Identity of one cached model. Epoch count is a training parameter, not
/// part of the key: requesting the same (symbol, period, lookback) with a
/// different epoch count hits the same entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModelKey {
    pub symbol: String,
    pub asset_class: AssetClass,
    pub period: String,
    pub lookback: usize,
}

impl ModelKey {
    pub fn new(symbol: &str, asset_class: AssetClass, period: &str, lookback: usize) -> Self {
        Self {
            symbol: symbol.to_string(),
            asset_class,
            period: period.to_string(),
            lookback,
        }
    }

    /// Stable artifact name, `{symbol}_{period}`.
    pub fn artifact_name(&self) -> String {
        format!("{}_{}", self.symbol, self.period)
    }
}

impl fmt::Display for ModelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.symbol, self.period, self.lookback)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TrainConfig {
    pub epochs: usize,
    pub batch_size: usize,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            epochs: 30,
            batch_size: 32,
        }
    }
}

/// Min/max scale parameters fitted over a price series. Travel with the
/// model so a prediction is always inverted with the fit it trained under.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScaleParams {
    pub min: f64,
    pub max: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Metrics {
    pub rmse: f64,
    pub mae: f64,
}

/// Response payload for a next-step prediction.
#[derive(Debug, Clone, Serialize)]
pub struct Prediction {
    pub symbol: String,
    pub current_price: f64,
    pub predicted_price: f64,
    pub change: f64,
    pub change_percent: f64,
    pub rmse: f64,
    pub mae: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Health {
    pub status: &'static str,
    pub timestamp: DateTime<Utc>,
}

/// Declarative job trigger: fixed interval or fixed time of day (UTC).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerSpec {
    Interval { every: Duration },
    Daily { hour: u32, minute: u32 },
}

/// Result of processing one symbol within a job run.
#[derive(Debug, Clone)]
pub struct SymbolOutcome {
    pub symbol: String,
    pub result: Result<(), String>,
    pub error_kind: Option<&'static str>,
}

impl SymbolOutcome {
    pub fn ok(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            result: Ok(()),
            error_kind: None,
        }
    }

    pub fn failed(symbol: &str, err: &crate::domain::errors::ForecastError) -> Self {
        Self {
            symbol: symbol.to_string(),
            result: Err(err.to_string()),
            error_kind: Some(err.kind()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// Aggregated outcome of one job run. The job completes even when some
/// symbols failed; failures are visible here, not raised.
#[derive(Debug, Clone)]
pub struct JobReport {
    pub job_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcomes: Vec<SymbolOutcome>,
}

impl JobReport {
    pub fn failed_symbols(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|o| !o.is_ok())
            .map(|o| o.symbol.as_str())
            .collect()
    }

    pub fn succeeded_symbols(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|o| o.is_ok())
            .map(|o| o.symbol.as_str())
            .collect()
    }
}
