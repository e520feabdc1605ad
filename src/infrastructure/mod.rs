pub mod forecaster;
pub mod market_data;
pub mod mock;
pub mod persistence;
