//! Default forecaster: a linear autoregressor over the lookback window,
//! trained by mini-batch gradient descent. Small on purpose; anything
//! heavier plugs in behind the same `Forecaster` trait.

use crate::domain::ports::{Forecaster, ForecasterFactory};
use crate::domain::types::TrainConfig;
use ndarray::{Array1, Array2};
use rand::Rng;
use serde::{Deserialize, Serialize};

const DEFAULT_LEARNING_RATE: f64 = 0.001;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradientForecaster {
    lookback: usize,
    learning_rate: f64,
    weights: Vec<f64>,
    bias: f64,
    trained: bool,
}

impl GradientForecaster {
    pub fn new(lookback: usize, learning_rate: f64) -> Self {
        let limit = 1.0 / (lookback.max(1) as f64).sqrt();
        let mut rng = rand::rng();
        let weights = (0..lookback)
            .map(|_| rng.random_range(-limit..limit))
            .collect();
        Self {
            lookback,
            learning_rate,
            weights,
            bias: 0.0,
            trained: false,
        }
    }

    fn forward(&self, window: &[f64]) -> f64 {
        self.weights
            .iter()
            .zip(window.iter())
            .map(|(w, x)| w * x)
            .sum::<f64>()
            + self.bias
    }
}

impl Forecaster for GradientForecaster {
    fn fit(
        &mut self,
        features: &[Vec<f64>],
        targets: &[f64],
        config: &TrainConfig,
    ) -> Result<(), String> {
        if features.is_empty() || features.len() != targets.len() {
            return Err(format!(
                "feature/target mismatch: {} windows, {} targets",
                features.len(),
                targets.len()
            ));
        }
        if features[0].len() != self.lookback {
            return Err(format!(
                "window length {} does not match lookback {}",
                features[0].len(),
                self.lookback
            ));
        }

        let n = features.len();
        let flat: Vec<f64> = features.iter().flatten().copied().collect();
        let x = Array2::from_shape_vec((n, self.lookback), flat)
            .map_err(|e| format!("bad feature shape: {}", e))?;
        let y = Array1::from_vec(targets.to_vec());
        let mut w = Array1::from_vec(self.weights.clone());
        let mut b = self.bias;
        let batch_size = config.batch_size.max(1);

        for epoch in 0..config.epochs {
            let mut start = 0;
            while start < n {
                let end = (start + batch_size).min(n);
                let xb = x.slice(ndarray::s![start..end, ..]);
                let yb = y.slice(ndarray::s![start..end]);
                let m = (end - start) as f64;

                let err = xb.dot(&w) + b - &yb;
                let grad_w = xb.t().dot(&err) / m;
                let grad_b = err.sum() / m;

                w = w - &grad_w * self.learning_rate;
                b -= self.learning_rate * grad_b;
                start = end;
            }

            if !b.is_finite() || w.iter().any(|v| !v.is_finite()) {
                return Err(format!("loss diverged at epoch {}", epoch));
            }
        }

        self.weights = w.to_vec();
        self.bias = b;
        self.trained = true;
        Ok(())
    }

    fn predict(&self, window: &[f64]) -> Result<f64, String> {
        if !self.trained {
            return Err("forecaster has not been trained".to_string());
        }
        if window.len() != self.lookback {
            return Err(format!(
                "window length {} does not match lookback {}",
                window.len(),
                self.lookback
            ));
        }
        let out = self.forward(window);
        if !out.is_finite() {
            return Err("prediction is not finite".to_string());
        }
        Ok(out)
    }

    fn state_json(&self) -> Result<serde_json::Value, String> {
        serde_json::to_value(self).map_err(|e| e.to_string())
    }
}

pub struct GradientForecasterFactory {
    learning_rate: f64,
}

impl GradientForecasterFactory {
    pub fn new(learning_rate: f64) -> Self {
        Self { learning_rate }
    }
}

impl Default for GradientForecasterFactory {
    fn default() -> Self {
        Self::new(DEFAULT_LEARNING_RATE)
    }
}

impl ForecasterFactory for GradientForecasterFactory {
    fn build(&self, lookback: usize) -> Box<dyn Forecaster> {
        Box::new(GradientForecaster::new(lookback, self.learning_rate))
    }

    fn restore(&self, lookback: usize, state: &serde_json::Value) -> Option<Box<dyn Forecaster>> {
        let restored: GradientForecaster = serde_json::from_value(state.clone()).ok()?;
        if restored.lookback != lookback || !restored.trained {
            return None;
        }
        Some(Box::new(restored))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn windows(series: &[f64], lookback: usize) -> (Vec<Vec<f64>>, Vec<f64>) {
        let mut x = Vec::new();
        let mut y = Vec::new();
        for i in lookback..series.len() {
            x.push(series[i - lookback..i].to_vec());
            y.push(series[i]);
        }
        (x, y)
    }

    #[test]
    fn test_fit_then_predict_finite() {
        let series: Vec<f64> = (0..80).map(|i| 0.5 + 0.3 * ((i as f64) / 9.0).sin()).collect();
        let (x, y) = windows(&series, 10);

        let mut model = GradientForecaster::new(10, DEFAULT_LEARNING_RATE);
        model
            .fit(&x, &y, &TrainConfig { epochs: 30, batch_size: 32 })
            .unwrap();

        let prediction = model.predict(&series[series.len() - 10..]).unwrap();
        assert!(prediction.is_finite());
    }

    #[test]
    fn test_predict_before_fit_is_error() {
        let model = GradientForecaster::new(5, DEFAULT_LEARNING_RATE);
        assert!(model.predict(&[0.1, 0.2, 0.3, 0.4, 0.5]).is_err());
    }

    #[test]
    fn test_predict_rejects_wrong_window_length() {
        let series: Vec<f64> = (0..20).map(|i| (i as f64) / 20.0).collect();
        let (x, y) = windows(&series, 4);
        let mut model = GradientForecaster::new(4, DEFAULT_LEARNING_RATE);
        model
            .fit(&x, &y, &TrainConfig { epochs: 5, batch_size: 8 })
            .unwrap();
        assert!(model.predict(&[0.1, 0.2]).is_err());
    }

    #[test]
    fn test_state_round_trip_through_factory() {
        let series: Vec<f64> = (0..30).map(|i| (i as f64) / 30.0).collect();
        let (x, y) = windows(&series, 6);
        let mut model = GradientForecaster::new(6, DEFAULT_LEARNING_RATE);
        model
            .fit(&x, &y, &TrainConfig { epochs: 10, batch_size: 16 })
            .unwrap();

        let state = model.state_json().unwrap();
        let factory = GradientForecasterFactory::default();
        let restored = factory.restore(6, &state).expect("restorable state");

        let window = &series[series.len() - 6..];
        let a = model.predict(window).unwrap();
        let b = restored.predict(window).unwrap();
        assert!((a - b).abs() < 1e-12);
    }

    #[test]
    fn test_restore_rejects_lookback_mismatch() {
        let model = GradientForecaster::new(6, DEFAULT_LEARNING_RATE);
        let state = model.state_json().unwrap();
        let factory = GradientForecasterFactory::default();
        assert!(factory.restore(8, &state).is_none());
    }
}
