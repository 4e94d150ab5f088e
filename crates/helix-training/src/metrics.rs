//! Regression metrics.
//!
//! Everything here is a pure function or a plain accumulator: MSE and MAE are
//! built up batch by batch while an epoch runs, R² needs the whole partition
//! and is computed once the last batch has been seen.

use serde::{Deserialize, Serialize};

/// Number of decimal digits kept when metrics are published.
pub const METRIC_PRECISION: i32 = 6;

/// Round a metric to [`METRIC_PRECISION`] decimal digits.
#[must_use]
pub fn round_metric(value: f64) -> f64 {
    let scale = 10f64.powi(METRIC_PRECISION);
    (value * scale).round() / scale
}

/// Accumulates per-batch errors across one pass over a partition.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RunningErrors {
    squared_sum: f64,
    absolute_sum: f64,
    samples: usize,
}

impl RunningErrors {
    /// Record one batch.
    ///
    /// `batch_loss` is the batch's mean squared error, so it is weighted by
    /// `batch_size` before being summed. `absolute_error_sum` is the
    /// un-averaged `Σ|pred - target|` of the batch.
    pub fn record_batch(&mut self, batch_loss: f64, batch_size: usize, absolute_error_sum: f64) {
        self.squared_sum += batch_loss * batch_size as f64;
        self.absolute_sum += absolute_error_sum;
        self.samples += batch_size;
    }

    #[must_use]
    pub fn samples(&self) -> usize {
        self.samples
    }

    /// Mean squared error, `0.0` when nothing was recorded.
    #[must_use]
    pub fn mse(&self) -> f64 {
        if self.samples == 0 { 0.0 } else { self.squared_sum / self.samples as f64 }
    }

    /// Mean absolute error, `0.0` when nothing was recorded.
    #[must_use]
    pub fn mae(&self) -> f64 {
        if self.samples == 0 { 0.0 } else { self.absolute_sum / self.samples as f64 }
    }
}

/// `Σ|pred - target|` over paired slices.
#[must_use]
pub fn absolute_error_sum(predictions: &[f32], targets: &[f32]) -> f64 {
    predictions.iter().zip(targets).map(|(p, t)| f64::from(p - t).abs()).sum()
}

#[must_use]
pub fn mean_squared_error(predictions: &[f32], targets: &[f32]) -> f64 {
    let n = predictions.len().min(targets.len());
    if n == 0 {
        return 0.0;
    }
    let sse: f64 = predictions.iter().zip(targets).map(|(p, t)| f64::from(p - t).powi(2)).sum();
    sse / n as f64
}

#[must_use]
pub fn mean_absolute_error(predictions: &[f32], targets: &[f32]) -> f64 {
    let n = predictions.len().min(targets.len());
    if n == 0 {
        return 0.0;
    }
    absolute_error_sum(predictions, targets) / n as f64
}

/// Coefficient of determination, `1 - SSE/SST`.
///
/// Returns `None` for an empty partition or a constant target (`SST == 0`),
/// where R² is undefined.
#[must_use]
pub fn r_squared(predictions: &[f32], targets: &[f32]) -> Option<f64> {
    let n = predictions.len().min(targets.len());
    if n == 0 {
        return None;
    }
    let targets = &targets[..n];
    let mean = targets.iter().map(|t| f64::from(*t)).sum::<f64>() / n as f64;
    let sst: f64 = targets.iter().map(|t| (f64::from(*t) - mean).powi(2)).sum();
    if sst == 0.0 {
        return None;
    }
    let sse: f64 = predictions.iter().zip(targets).map(|(p, t)| f64::from(t - p).powi(2)).sum();
    Some(1.0 - sse / sst)
}

/// Metrics published for one epoch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct EpochMetrics {
    pub train_mse: f64,
    pub train_mae: f64,
    pub val_mse: Option<f64>,
    pub val_mae: Option<f64>,
    pub val_r2: Option<f64>,
}

impl EpochMetrics {
    /// Copy with every present value rounded for publication.
    #[must_use]
    pub fn rounded(&self) -> Self {
        Self {
            train_mse: round_metric(self.train_mse),
            train_mae: round_metric(self.train_mae),
            val_mse: self.val_mse.map(round_metric),
            val_mae: self.val_mae.map(round_metric),
            val_r2: self.val_r2.map(round_metric),
        }
    }
}
