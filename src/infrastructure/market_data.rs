//! HTTP market data source speaking the Yahoo chart JSON format
//! (`/v8/finance/chart/{symbol}?range={period}&interval=1d`).

use crate::domain::errors::ForecastError;
use crate::domain::ports::MarketDataSource;
use crate::domain::types::{AssetClass, PricePoint};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde::Deserialize;
use tracing::{debug, info};

pub struct ChartHttpSource {
    client: reqwest::Client,
    base_url: String,
}

impl ChartHttpSource {
    pub fn new(base_url: &str) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .user_agent(concat!("pricecast/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: ChartPayload,
}

#[derive(Debug, Deserialize)]
struct ChartPayload {
    result: Option<Vec<ChartResult>>,
    error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    timestamp: Option<Vec<i64>>,
    indicators: Indicators,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    quote: Vec<QuoteBlock>,
}

#[derive(Debug, Deserialize)]
struct QuoteBlock {
    open: Vec<Option<f64>>,
    high: Vec<Option<f64>>,
    low: Vec<Option<f64>>,
    close: Vec<Option<f64>>,
    volume: Vec<Option<i64>>,
}

#[async_trait]
impl MarketDataSource for ChartHttpSource {
    async fn fetch(
        &self,
        symbol: &str,
        asset_class: AssetClass,
        period: &str,
    ) -> Result<Vec<PricePoint>, ForecastError> {
        let url = format!(
            "{}/v8/finance/chart/{}?range={}&interval=1d",
            self.base_url, symbol, period
        );
        debug!("Fetching {} ({}) from {}", symbol, period, url);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ForecastError::DataFetch {
                symbol: symbol.to_string(),
                reason: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(ForecastError::DataFetch {
                symbol: symbol.to_string(),
                reason: format!("HTTP {}", response.status()),
            });
        }

        let body: ChartResponse =
            response
                .json()
                .await
                .map_err(|e| ForecastError::DataFetch {
                    symbol: symbol.to_string(),
                    reason: format!("invalid chart payload: {}", e),
                })?;

        if let Some(err) = body.chart.error {
            if !err.is_null() {
                return Err(ForecastError::DataFetch {
                    symbol: symbol.to_string(),
                    reason: err.to_string(),
                });
            }
        }

        let result = body
            .chart
            .result
            .and_then(|mut r| if r.is_empty() { None } else { Some(r.remove(0)) })
            .ok_or_else(|| ForecastError::NoData {
                symbol: symbol.to_string(),
            })?;

        let timestamps = result.timestamp.unwrap_or_default();
        let quote = result
            .indicators
            .quote
            .into_iter()
            .next()
            .ok_or_else(|| ForecastError::NoData {
                symbol: symbol.to_string(),
            })?;

        let mut points = Vec::with_capacity(timestamps.len());
        for (i, ts) in timestamps.iter().enumerate() {
            // Rows with missing fields (halted days, partial bars) are skipped.
            let (open, high, low, close, volume) = match (
                quote.open.get(i).copied().flatten(),
                quote.high.get(i).copied().flatten(),
                quote.low.get(i).copied().flatten(),
                quote.close.get(i).copied().flatten(),
                quote.volume.get(i).copied().flatten(),
            ) {
                (Some(o), Some(h), Some(l), Some(c), Some(v)) => (o, h, l, c, v),
                _ => continue,
            };

            let date = Utc
                .timestamp_opt(*ts, 0)
                .single()
                .ok_or_else(|| ForecastError::DataFetch {
                    symbol: symbol.to_string(),
                    reason: format!("invalid timestamp {}", ts),
                })?
                .date_naive();

            points.push(PricePoint {
                symbol: symbol.to_string(),
                date,
                open,
                high,
                low,
                close,
                volume,
                asset_class,
            });
        }

        if points.is_empty() {
            return Err(ForecastError::NoData {
                symbol: symbol.to_string(),
            });
        }

        points.sort_by_key(|p| p.date);
        // One row per date; the source occasionally repeats the live bar.
        points.dedup_by_key(|p| p.date);

        info!("Fetched {} rows for {} ({})", points.len(), symbol, period);
        Ok(points)
    }
}
