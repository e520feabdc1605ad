//! Supervised-window feature pipeline: min/max scaling, windowing and
//! in-sample evaluation over a close-price series.

use crate::domain::errors::ForecastError;
use crate::domain::ports::Forecaster;
use crate::domain::types::{Metrics, ScaleParams};

impl ScaleParams {
    /// Fit min/max over the entire supplied series.
    ///
    /// Deliberately in-sample: the fit covers the same rows later windowed
    /// for training and evaluation, matching the upstream behavior this
    /// service reproduces.
    pub fn fit(series: &[f64]) -> Self {
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        for &v in series {
            min = min.min(v);
            max = max.max(v);
        }
        Self { min, max }
    }

    pub fn scale(&self, value: f64) -> f64 {
        let range = self.max - self.min;
        if range == 0.0 {
            // Flat series: everything maps to the lower bound.
            return 0.0;
        }
        (value - self.min) / range
    }

    /// Exact inverse of `scale`. A flat fit inverts to the fitted value.
    pub fn inverse(&self, scaled: f64) -> f64 {
        scaled * (self.max - self.min) + self.min
    }

    pub fn scale_series(&self, series: &[f64]) -> Vec<f64> {
        series.iter().map(|&v| self.scale(v)).collect()
    }
}

/// Build supervised windows from a scaled series: for each index `i` in
/// `[lookback, n)`, the window is `scaled[i - lookback..i]` and the target
/// `scaled[i]`. Yields exactly `n - lookback` pairs in temporal order.
pub fn window(
    scaled: &[f64],
    lookback: usize,
) -> Result<(Vec<Vec<f64>>, Vec<f64>), ForecastError> {
    if scaled.len() <= lookback {
        return Err(ForecastError::InsufficientData {
            required: lookback,
            available: scaled.len(),
        });
    }

    let count = scaled.len() - lookback;
    let mut features = Vec::with_capacity(count);
    let mut targets = Vec::with_capacity(count);
    for i in lookback..scaled.len() {
        features.push(scaled[i - lookback..i].to_vec());
        targets.push(scaled[i]);
    }
    Ok((features, targets))
}

/// Predict every window, inverse-scale predictions and targets back to price
/// space, and compute RMSE and MAE. Evaluation runs over the training
/// windows themselves (no held-out split), as the source system does.
pub fn evaluate(
    forecaster: &dyn Forecaster,
    features: &[Vec<f64>],
    targets: &[f64],
    params: ScaleParams,
) -> Result<Metrics, String> {
    if features.is_empty() {
        return Err("no windows to evaluate".to_string());
    }

    let mut sq_sum = 0.0;
    let mut abs_sum = 0.0;
    for (x, &y) in features.iter().zip(targets.iter()) {
        let predicted = params.inverse(forecaster.predict(x)?);
        let actual = params.inverse(y);
        let diff = predicted - actual;
        sq_sum += diff * diff;
        abs_sum += diff.abs();
    }

    let n = features.len() as f64;
    Ok(Metrics {
        rmse: (sq_sum / n).sqrt(),
        mae: abs_sum / n,
    })
}

/// Feed the last `lookback` scaled values through the forecaster and
/// inverse-scale the single output.
pub fn predict_next(
    forecaster: &dyn Forecaster,
    scaled: &[f64],
    lookback: usize,
    params: ScaleParams,
) -> Result<f64, String> {
    if scaled.len() < lookback {
        return Err(format!(
            "need at least {} scaled values, have {}",
            lookback,
            scaled.len()
        ));
    }
    let last = &scaled[scaled.len() - lookback..];
    let predicted = forecaster.predict(last)?;
    Ok(params.inverse(predicted))
}
