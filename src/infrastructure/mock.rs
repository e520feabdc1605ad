//! Mock collaborators used by tests: a canned market data source and a
//! counting forecaster.

use crate::domain::errors::ForecastError;
use crate::domain::ports::{Forecaster, ForecasterFactory, MarketDataSource};
use crate::domain::types::{AssetClass, PricePoint, TrainConfig};
use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

#[derive(Default)]
pub struct MockMarketDataSource {
    series: RwLock<HashMap<String, Vec<PricePoint>>>,
    failing: RwLock<HashSet<String>>,
    fetch_count: AtomicUsize,
    requests: RwLock<Vec<(String, String)>>,
}

impl MockMarketDataSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_series(&self, symbol: &str, points: Vec<PricePoint>) {
        self.series.write().await.insert(symbol.to_string(), points);
    }

    pub async fn fail_symbol(&self, symbol: &str) {
        self.failing.write().await.insert(symbol.to_string());
    }

    pub fn fetch_count(&self) -> usize {
        self.fetch_count.load(Ordering::SeqCst)
    }

    /// Every (symbol, period) this source was asked for, in call order.
    pub async fn requests(&self) -> Vec<(String, String)> {
        self.requests.read().await.clone()
    }
}

#[async_trait]
impl MarketDataSource for MockMarketDataSource {
    async fn fetch(
        &self,
        symbol: &str,
        _asset_class: AssetClass,
        period: &str,
    ) -> Result<Vec<PricePoint>, ForecastError> {
        self.fetch_count.fetch_add(1, Ordering::SeqCst);
        self.requests
            .write()
            .await
            .push((symbol.to_string(), period.to_string()));

        if self.failing.read().await.contains(symbol) {
            return Err(ForecastError::DataFetch {
                symbol: symbol.to_string(),
                reason: "mock source configured to fail".to_string(),
            });
        }

        match self.series.read().await.get(symbol) {
            Some(points) if !points.is_empty() => Ok(points.clone()),
            _ => Err(ForecastError::NoData {
                symbol: symbol.to_string(),
            }),
        }
    }
}

/// Forecaster that predicts the mean of the window. Counts fit calls so
/// tests can assert the single-flight guarantee.
pub struct MockForecaster {
    fit_counter: Arc<AtomicUsize>,
    fit_delay: Duration,
    fail_fit: bool,
    trained: bool,
}

impl Forecaster for MockForecaster {
    fn fit(
        &mut self,
        _features: &[Vec<f64>],
        _targets: &[f64],
        _config: &TrainConfig,
    ) -> Result<(), String> {
        std::thread::sleep(self.fit_delay);
        self.fit_counter.fetch_add(1, Ordering::SeqCst);
        if self.fail_fit {
            return Err("mock fit failure".to_string());
        }
        self.trained = true;
        Ok(())
    }

    fn predict(&self, window: &[f64]) -> Result<f64, String> {
        if !self.trained {
            return Err("mock forecaster not trained".to_string());
        }
        Ok(window.iter().sum::<f64>() / window.len() as f64)
    }

    fn state_json(&self) -> Result<serde_json::Value, String> {
        Ok(serde_json::json!({ "mock": true }))
    }
}

pub struct MockForecasterFactory {
    pub fit_counter: Arc<AtomicUsize>,
    pub fit_delay: Duration,
    pub fail_fit: bool,
}

impl MockForecasterFactory {
    pub fn new() -> Self {
        Self {
            fit_counter: Arc::new(AtomicUsize::new(0)),
            fit_delay: Duration::from_millis(0),
            fail_fit: false,
        }
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            fit_delay: delay,
            ..Self::new()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail_fit: true,
            ..Self::new()
        }
    }

    pub fn fit_count(&self) -> usize {
        self.fit_counter.load(Ordering::SeqCst)
    }
}

impl Default for MockForecasterFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl ForecasterFactory for MockForecasterFactory {
    fn build(&self, _lookback: usize) -> Box<dyn Forecaster> {
        Box::new(MockForecaster {
            fit_counter: self.fit_counter.clone(),
            fit_delay: self.fit_delay,
            fail_fit: self.fail_fit,
            trained: false,
        })
    }

    fn restore(&self, _lookback: usize, _state: &serde_json::Value) -> Option<Box<dyn Forecaster>> {
        None
    }
}

/// In-memory artifact repository for tests that do not touch the disk.
#[derive(Default)]
pub struct InMemoryArtifactRepository {
    artifacts: RwLock<HashMap<String, crate::domain::repositories::ModelArtifact>>,
}

impl InMemoryArtifactRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl crate::domain::repositories::ModelArtifactRepository for InMemoryArtifactRepository {
    async fn save(
        &self,
        name: &str,
        artifact: &crate::domain::repositories::ModelArtifact,
    ) -> Result<(), ForecastError> {
        self.artifacts
            .write()
            .await
            .insert(name.to_string(), artifact.clone());
        Ok(())
    }

    async fn load(
        &self,
        name: &str,
    ) -> Result<Option<crate::domain::repositories::ModelArtifact>, ForecastError> {
        Ok(self.artifacts.read().await.get(name).cloned())
    }
}

/// Daily close series starting at `base`, one point per day ending today.
/// Dates end at today so period-based queries include the whole series.
pub fn synthetic_series(symbol: &str, asset_class: AssetClass, count: usize, base: f64) -> Vec<PricePoint> {
    let today = chrono::Utc::now().date_naive();
    (0..count)
        .map(|i| {
            let close = base + (i as f64) * 0.5 + ((i as f64) / 7.0).sin() * 2.0;
            PricePoint {
                symbol: symbol.to_string(),
                date: today - chrono::Duration::days((count - 1 - i) as i64),
                open: close - 0.5,
                high: close + 1.0,
                low: close - 1.0,
                close,
                volume: 1_000 + i as i64,
                asset_class,
            }
        })
        .collect()
}

/// Fixed-date variant of `synthetic_series`, for deterministic assertions.
pub fn synthetic_series_from(
    symbol: &str,
    asset_class: AssetClass,
    start: NaiveDate,
    count: usize,
    base: f64,
) -> Vec<PricePoint> {
    (0..count)
        .map(|i| {
            let close = base + (i as f64) * 0.5;
            PricePoint {
                symbol: symbol.to_string(),
                date: start + chrono::Duration::days(i as i64),
                open: close - 0.5,
                high: close + 1.0,
                low: close - 1.0,
                close,
                volume: 1_000 + i as i64,
                asset_class,
            }
        })
        .collect()
}
