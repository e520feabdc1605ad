use crate::domain::errors::ForecastError;
use crate::domain::repositories::PriceRepository;
use crate::domain::types::{AssetClass, PricePoint};
use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::debug;

pub struct SqlitePriceRepository {
    pool: SqlitePool,
}

impl SqlitePriceRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn validate(record: &PricePoint) -> Result<(), ForecastError> {
        let prices = [record.open, record.high, record.low, record.close];
        if prices.iter().any(|p| !p.is_finite()) {
            return Err(ForecastError::Validation {
                reason: format!("non-finite price for {} on {}", record.symbol, record.date),
            });
        }
        if record.volume < 0 {
            return Err(ForecastError::Validation {
                reason: format!(
                    "negative volume {} for {} on {}",
                    record.volume, record.symbol, record.date
                ),
            });
        }
        if record.symbol.trim().is_empty() {
            return Err(ForecastError::Validation {
                reason: "empty symbol".to_string(),
            });
        }
        Ok(())
    }

    fn map_rows(&self, rows: Vec<sqlx::sqlite::SqliteRow>) -> Result<Vec<PricePoint>, ForecastError> {
        let mut points = Vec::with_capacity(rows.len());
        for row in rows {
            let class_str: String = row.try_get("asset_class")?;
            let asset_class = AssetClass::from_str(&class_str).map_err(|_| {
                ForecastError::Validation {
                    reason: format!("unknown asset class '{}' in storage", class_str),
                }
            })?;

            points.push(PricePoint {
                symbol: row.try_get("symbol")?,
                date: row.try_get("date")?,
                open: row.try_get("open")?,
                high: row.try_get("high")?,
                low: row.try_get("low")?,
                close: row.try_get("close")?,
                volume: row.try_get("volume")?,
                asset_class,
            });
        }
        Ok(points)
    }
}

#[async_trait]
impl PriceRepository for SqlitePriceRepository {
    async fn upsert(&self, records: &[PricePoint]) -> Result<u64, ForecastError> {
        // Validate the whole batch up front so a bad row never leaves a
        // half-written transaction behind.
        for record in records {
            Self::validate(record)?;
        }

        let mut tx = self.pool.begin().await?;
        for record in records {
            sqlx::query(
                r#"
                INSERT INTO price_points (symbol, date, asset_class, open, high, low, close, volume)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(symbol, date, asset_class) DO UPDATE SET
                    open = excluded.open,
                    high = excluded.high,
                    low = excluded.low,
                    close = excluded.close,
                    volume = excluded.volume
                "#,
            )
            .bind(&record.symbol)
            .bind(record.date)
            .bind(record.asset_class.to_string())
            .bind(record.open)
            .bind(record.high)
            .bind(record.low)
            .bind(record.close)
            .bind(record.volume)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        debug!("Upserted {} price rows", records.len());
        Ok(records.len() as u64)
    }

    async fn query(
        &self,
        symbol: &str,
        asset_class: AssetClass,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<Vec<PricePoint>, ForecastError> {
        let mut sql = String::from(
            "SELECT symbol, date, asset_class, open, high, low, close, volume \
             FROM price_points WHERE symbol = ? AND asset_class = ?",
        );
        if start.is_some() {
            sql.push_str(" AND date >= ?");
        }
        if end.is_some() {
            sql.push_str(" AND date <= ?");
        }
        sql.push_str(" ORDER BY date ASC");

        let mut query = sqlx::query(&sql)
            .bind(symbol)
            .bind(asset_class.to_string());
        if let Some(start) = start {
            query = query.bind(start);
        }
        if let Some(end) = end {
            query = query.bind(end);
        }

        let rows = query.fetch_all(&self.pool).await?;
        self.map_rows(rows)
    }

    async fn latest_date(
        &self,
        symbol: &str,
        asset_class: AssetClass,
    ) -> Result<Option<NaiveDate>, ForecastError> {
        let row = sqlx::query(
            "SELECT MAX(date) as latest FROM price_points WHERE symbol = ? AND asset_class = ?",
        )
        .bind(symbol)
        .bind(asset_class.to_string())
        .fetch_one(&self.pool)
        .await?;

        let latest: Option<NaiveDate> = row.try_get("latest")?;
        Ok(latest)
    }
}
