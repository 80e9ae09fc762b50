//! Pure indicator transforms over close-price series.
//!
//! Every function returns a vector aligned with its input, `None` during the
//! warmup window.

use serde::{Deserialize, Serialize};

/// Wilder's RSI: exponential smoothing with `alpha = 1 / period`, seeded with
/// the first price change. Valid from index `period`.
pub fn rsi(prices: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut values = vec![None; prices.len()];
    if period == 0 || prices.len() < 2 {
        return values;
    }

    let alpha = 1.0 / period as f64;
    let mut avg_gain = 0.0;
    let mut avg_loss = 0.0;

    for i in 1..prices.len() {
        let delta = prices[i] - prices[i - 1];
        let gain = delta.max(0.0);
        let loss = (-delta).max(0.0);

        if i == 1 {
            avg_gain = gain;
            avg_loss = loss;
        } else {
            avg_gain = (1.0 - alpha) * avg_gain + alpha * gain;
            avg_loss = (1.0 - alpha) * avg_loss + alpha * loss;
        }

        if i >= period {
            let rs = avg_gain / if avg_loss == 0.0 { 1e-9 } else { avg_loss };
            values[i] = Some(100.0 - 100.0 / (1.0 + rs));
        }
    }

    values
}

/// Linearly weighted moving average, weights `1..=period` (newest heaviest).
/// Valid from index `period - 1`.
pub fn wma(prices: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut values = vec![None; prices.len()];
    if period == 0 {
        return values;
    }

    let divisor = (period * (period + 1)) as f64 / 2.0;
    let mut weighted_sum = 0.0;
    let mut window_sum = 0.0;

    for (i, &price) in prices.iter().enumerate() {
        if i < period {
            weighted_sum += (i + 1) as f64 * price;
            window_sum += price;
        } else {
            weighted_sum += period as f64 * price - window_sum;
            window_sum += price - prices[i - period];
        }

        if i + 1 >= period {
            values[i] = Some(weighted_sum / divisor);
        }
    }

    values
}

/// Exponential moving average with `alpha = 2 / (period + 1)`, seeded with the
/// first price. Reported from index `period - 1`.
pub fn ema(prices: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut values = vec![None; prices.len()];
    if period == 0 {
        return values;
    }

    let alpha = 2.0 / (period as f64 + 1.0);
    let mut current = 0.0;

    for (i, &price) in prices.iter().enumerate() {
        current = if i == 0 {
            price
        } else {
            alpha * price + (1.0 - alpha) * current
        };

        if i + 1 >= period {
            values[i] = Some(current);
        }
    }

    values
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IndicatorParams {
    pub rsi_period: usize,
    pub wma_period: usize,
    pub ema_period: usize,
}

impl IndicatorParams {
    /// Bars needed before every snapshot field is valid.
    pub fn warmup(&self) -> usize {
        self.wma_period.max(self.ema_period).max(self.rsi_period + 1)
    }
}

/// Indicator values at the newest bar of one timeframe.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IndicatorSnapshot {
    pub close: f64,
    pub rsi: f64,
    /// RSI one bar earlier, when available.
    pub prev_rsi: Option<f64>,
    pub wma: f64,
    pub ema: f64,
    /// WMA `slope_lookback` bars earlier, when available.
    pub wma_lagged: Option<f64>,
}

impl IndicatorSnapshot {
    /// Build the snapshot for the last bar of `prices`. `None` while any of
    /// the current values is still warming up.
    pub fn compute(prices: &[f64], params: &IndicatorParams, slope_lookback: usize) -> Option<Self> {
        let last = prices.len().checked_sub(1)?;

        let rsi_series = rsi(prices, params.rsi_period);
        let wma_series = wma(prices, params.wma_period);
        let ema_series = ema(prices, params.ema_period);

        let prev_rsi = last.checked_sub(1).and_then(|i| rsi_series[i]);
        let wma_lagged = last
            .checked_sub(slope_lookback)
            .and_then(|i| wma_series[i]);

        Some(Self {
            close: prices[last],
            rsi: rsi_series[last]?,
            prev_rsi,
            wma: wma_series[last]?,
            ema: ema_series[last]?,
            wma_lagged,
        })
    }

    /// WMA change over the slope window.
    pub fn wma_slope(&self) -> Option<f64> {
        self.wma_lagged.map(|lagged| self.wma - lagged)
    }
}
