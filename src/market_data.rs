use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Bar aggregation period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimeFrame {
    M1,
    M5,
    M15,
    M30,
    H1,
    H4,
    D1,
}

impl TimeFrame {
    pub fn duration(&self) -> Duration {
        match self {
            TimeFrame::M1 => Duration::minutes(1),
            TimeFrame::M5 => Duration::minutes(5),
            TimeFrame::M15 => Duration::minutes(15),
            TimeFrame::M30 => Duration::minutes(30),
            TimeFrame::H1 => Duration::hours(1),
            TimeFrame::H4 => Duration::hours(4),
            TimeFrame::D1 => Duration::days(1),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TimeFrame::M1 => "M1",
            TimeFrame::M5 => "M5",
            TimeFrame::M15 => "M15",
            TimeFrame::M30 => "M30",
            TimeFrame::H1 => "H1",
            TimeFrame::H4 => "H4",
            TimeFrame::D1 => "D1",
        }
    }
}

impl fmt::Display for TimeFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One OHLCV bar. `timestamp` is the bar open time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceBar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl PriceBar {
    pub fn new(timestamp: DateTime<Utc>, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Self {
        Self {
            timestamp,
            open,
            high,
            low,
            close,
            volume,
        }
    }
}

/// Close prices of a bar sequence, oldest first.
pub fn closes(bars: &[PriceBar]) -> Vec<f64> {
    bars.iter().map(|bar| bar.close).collect()
}

/// Drop the still-forming bar at the end of a freshly fetched sequence.
pub fn closed_bars(bars: &[PriceBar]) -> &[PriceBar] {
    match bars.split_last() {
        Some((_, closed)) => closed,
        None => bars,
    }
}

/// Lowest low over the last `lookback` bars.
pub fn swing_low(bars: &[PriceBar], lookback: usize) -> Option<f64> {
    let start = bars.len().saturating_sub(lookback);
    bars[start..].iter().map(|b| b.low).reduce(f64::min)
}

/// Highest high over the last `lookback` bars.
pub fn swing_high(bars: &[PriceBar], lookback: usize) -> Option<f64> {
    let start = bars.len().saturating_sub(lookback);
    bars[start..].iter().map(|b| b.high).reduce(f64::max)
}
