use crate::domain::types::AssetClass;
use anyhow::{Context, Result};
use std::env;
use std::time::Duration;

/// Service configuration, loaded from the environment (with `.env` support
/// via dotenvy in main). Fails fast on invalid values; an empty tracked
/// symbol set is a startup error, not something discovered at job time.
#[derive(Debug, Clone)]
pub struct Config {
    pub db_url: String,
    pub model_dir: String,
    pub market_data_base_url: String,
    pub stock_symbols: Vec<String>,
    pub crypto_symbols: Vec<String>,
    /// Period used by request-path training (original default "1y").
    pub default_period: String,
    /// Shorter window fetched by the hourly refresh job.
    pub refresh_period: String,
    /// Period used by the daily retrain job.
    pub retrain_period: String,
    pub lookback_days: usize,
    pub default_epochs: usize,
    pub retrain_epochs: usize,
    pub default_batch_size: usize,
    pub refresh_interval: Duration,
    pub retrain_hour: u32,
    pub retrain_minute: u32,
    /// Optional cap on how long a caller waits for a shared training run.
    /// None (the default) means wait until it finishes or fails.
    pub training_timeout: Option<Duration>,
}

fn get_env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_env_or<T: std::str::FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("Invalid {}: {}", key, e)),
        Err(_) => Ok(default),
    }
}

fn parse_symbols(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let stock_symbols = parse_symbols(&get_env_or("STOCK_SYMBOLS", "TSLA,AAPL,GOOGL,MSFT"));
        let crypto_symbols = parse_symbols(&get_env_or("CRYPTO_SYMBOLS", "BTC-USD,ETH-USD"));

        if stock_symbols.is_empty() && crypto_symbols.is_empty() {
            anyhow::bail!("Tracked symbol set is empty: set STOCK_SYMBOLS and/or CRYPTO_SYMBOLS");
        }

        let retrain_hour: u32 = parse_env_or("RETRAIN_HOUR", 2)?;
        let retrain_minute: u32 = parse_env_or("RETRAIN_MINUTE", 0)?;
        if retrain_hour > 23 || retrain_minute > 59 {
            anyhow::bail!(
                "Invalid retrain time {:02}:{:02}",
                retrain_hour,
                retrain_minute
            );
        }

        let refresh_interval_minutes: u64 = parse_env_or("REFRESH_INTERVAL_MINUTES", 60)?;
        let training_timeout = match env::var("TRAINING_TIMEOUT_SECS") {
            Ok(raw) => {
                let secs: u64 = raw
                    .parse()
                    .context("Invalid TRAINING_TIMEOUT_SECS")?;
                Some(Duration::from_secs(secs))
            }
            Err(_) => None,
        };

        Ok(Self {
            db_url: get_env_or("DB_URL", "sqlite://data/market_data.db"),
            model_dir: get_env_or("MODEL_DIR", "models"),
            market_data_base_url: get_env_or(
                "MARKET_DATA_BASE_URL",
                "https://query1.finance.yahoo.com",
            ),
            stock_symbols,
            crypto_symbols,
            default_period: get_env_or("DEFAULT_PERIOD", "1y"),
            refresh_period: get_env_or("REFRESH_PERIOD", "1mo"),
            retrain_period: get_env_or("RETRAIN_PERIOD", "6mo"),
            lookback_days: parse_env_or("DEFAULT_LOOKBACK_DAYS", 60)?,
            default_epochs: parse_env_or("DEFAULT_EPOCHS", 30)?,
            retrain_epochs: parse_env_or("RETRAIN_EPOCHS", 20)?,
            default_batch_size: parse_env_or("DEFAULT_BATCH_SIZE", 32)?,
            refresh_interval: Duration::from_secs(refresh_interval_minutes * 60),
            retrain_hour,
            retrain_minute,
            training_timeout,
        })
    }

    /// Tracked symbols with their asset class, stocks first.
    pub fn tracked_symbols(&self) -> Vec<(String, AssetClass)> {
        self.stock_symbols
            .iter()
            .map(|s| (s.clone(), AssetClass::Stock))
            .chain(
                self.crypto_symbols
                    .iter()
                    .map(|s| (s.clone(), AssetClass::Crypto)),
            )
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_symbols_trims_and_skips_empty() {
        let symbols = parse_symbols(" TSLA, AAPL ,,BTC-USD ");
        assert_eq!(symbols, vec!["TSLA", "AAPL", "BTC-USD"]);
    }

    #[test]
    fn test_tracked_symbols_partitioned_by_class() {
        let config = Config {
            db_url: "sqlite::memory:".into(),
            model_dir: "models".into(),
            market_data_base_url: "http://localhost".into(),
            stock_symbols: vec!["TSLA".into()],
            crypto_symbols: vec!["BTC-USD".into()],
            default_period: "1y".into(),
            refresh_period: "1mo".into(),
            retrain_period: "6mo".into(),
            lookback_days: 60,
            default_epochs: 30,
            retrain_epochs: 20,
            default_batch_size: 32,
            refresh_interval: Duration::from_secs(3600),
            retrain_hour: 2,
            retrain_minute: 0,
            training_timeout: None,
        };

        let tracked = config.tracked_symbols();
        assert_eq!(tracked.len(), 2);
        assert_eq!(tracked[0], ("TSLA".to_string(), AssetClass::Stock));
        assert_eq!(tracked[1], ("BTC-USD".to_string(), AssetClass::Crypto));
    }
}
