//! Timeframe analyzers: reduce one timeframe's indicators to a discrete state.
//!
//! Trend and confirmation are pure functions of the current snapshot. The entry
//! zone is debounced, so its previous state travels in an explicit
//! [`ZoneMemory`] that the caller passes in and stores back.

use crate::config::StrategyConfig;
use crate::error::SignalError;
use crate::indicators::{IndicatorParams, IndicatorSnapshot};
use crate::market_data::{PriceBar, closes};
use crate::signals::core::{AnalyzerRole, Confirmation, TimeframeState, TrendBias, ZoneState};
use log::debug;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyzerConfig {
    pub params: IndicatorParams,
    pub slope_lookback: usize,
    /// Max relative distance from the EMA to enter the zone.
    pub zone_band_pct: f64,
    /// Relative distance from the EMA that leaves the zone once inside.
    pub zone_exit_pct: f64,
    pub zone_rsi_low: f64,
    pub zone_rsi_high: f64,
    pub rsi_lower: f64,
    pub rsi_upper: f64,
}

impl From<&StrategyConfig> for AnalyzerConfig {
    fn from(config: &StrategyConfig) -> Self {
        Self {
            params: IndicatorParams {
                rsi_period: config.rsi_period,
                wma_period: config.wma_period,
                ema_period: config.ema_period,
            },
            slope_lookback: config.slope_lookback,
            zone_band_pct: config.zone_band_pct,
            zone_exit_pct: config.zone_exit_pct,
            zone_rsi_low: config.zone_rsi_low,
            zone_rsi_high: config.zone_rsi_high,
            rsi_lower: config.rsi_lower,
            rsi_upper: config.rsi_upper,
        }
    }
}

/// Entry-zone debounce state carried between cycles.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneMemory {
    pub in_zone: bool,
}

#[derive(Debug, Clone)]
pub struct TimeframeAnalyzer {
    config: AnalyzerConfig,
}

impl TimeframeAnalyzer {
    pub fn new(config: AnalyzerConfig) -> Self {
        Self { config }
    }

    /// Minimum number of bars the role needs.
    pub fn required_history(&self, role: AnalyzerRole) -> usize {
        let warmup = self.config.params.warmup();
        match role {
            AnalyzerRole::Trend => warmup + self.config.slope_lookback,
            AnalyzerRole::EntryZone => warmup,
            AnalyzerRole::Confirmation => warmup + 1,
        }
    }

    pub fn snapshot(&self, bars: &[PriceBar], role: AnalyzerRole) -> Result<IndicatorSnapshot, SignalError> {
        let need = self.required_history(role);
        let insufficient = SignalError::InsufficientHistory {
            role,
            have: bars.len(),
            need,
        };
        if bars.len() < need {
            return Err(insufficient);
        }

        IndicatorSnapshot::compute(&closes(bars), &self.config.params, self.config.slope_lookback)
            .ok_or(insufficient)
    }

    /// Analyze `bars` in the given role. `memory` only matters for the entry
    /// zone; other roles hand it back unchanged.
    pub fn analyze(
        &self,
        bars: &[PriceBar],
        role: AnalyzerRole,
        memory: ZoneMemory,
    ) -> Result<(TimeframeState, ZoneMemory), SignalError> {
        match role {
            AnalyzerRole::Trend => Ok((TimeframeState::Trend(self.trend_bias(bars)?), memory)),
            AnalyzerRole::EntryZone => {
                let (zone, memory) = self.entry_zone(bars, memory)?;
                Ok((TimeframeState::Zone(zone), memory))
            }
            AnalyzerRole::Confirmation => {
                Ok((TimeframeState::Confirm(self.confirmation(bars)?), memory))
            }
        }
    }

    pub fn trend_bias(&self, bars: &[PriceBar]) -> Result<TrendBias, SignalError> {
        let snapshot = self.snapshot(bars, AnalyzerRole::Trend)?;
        Ok(self.classify_trend(&snapshot))
    }

    pub fn entry_zone(
        &self,
        bars: &[PriceBar],
        memory: ZoneMemory,
    ) -> Result<(ZoneState, ZoneMemory), SignalError> {
        let snapshot = self.snapshot(bars, AnalyzerRole::EntryZone)?;
        Ok(self.classify_zone(&snapshot, memory))
    }

    pub fn confirmation(&self, bars: &[PriceBar]) -> Result<Confirmation, SignalError> {
        let snapshot = self.snapshot(bars, AnalyzerRole::Confirmation)?;
        Ok(self.classify_confirmation(&snapshot))
    }

    pub fn classify_trend(&self, snapshot: &IndicatorSnapshot) -> TrendBias {
        let Some(slope) = snapshot.wma_slope() else {
            return TrendBias::Neutral;
        };

        if snapshot.close > snapshot.wma && slope >= 0.0 {
            TrendBias::Bullish
        } else if snapshot.close < snapshot.wma && slope <= 0.0 {
            TrendBias::Bearish
        } else {
            TrendBias::Neutral
        }
    }

    pub fn classify_zone(&self, snapshot: &IndicatorSnapshot, memory: ZoneMemory) -> (ZoneState, ZoneMemory) {
        let distance = if snapshot.ema > 0.0 {
            (snapshot.close - snapshot.ema).abs() / snapshot.ema
        } else {
            f64::INFINITY
        };

        let in_zone = if memory.in_zone {
            distance <= self.config.zone_exit_pct
        } else {
            let rsi_neutral =
                snapshot.rsi >= self.config.zone_rsi_low && snapshot.rsi <= self.config.zone_rsi_high;
            rsi_neutral && distance <= self.config.zone_band_pct
        };

        if in_zone != memory.in_zone {
            debug!(
                "Entry zone {} (distance {:.4}%, rsi {:.1})",
                if in_zone { "entered" } else { "left" },
                distance * 100.0,
                snapshot.rsi
            );
        }

        let state = if in_zone {
            ZoneState::InZone
        } else {
            ZoneState::OutOfZone
        };
        (state, ZoneMemory { in_zone })
    }

    /// Fires only on the bar where RSI crosses the threshold.
    pub fn classify_confirmation(&self, snapshot: &IndicatorSnapshot) -> Confirmation {
        let Some(prev_rsi) = snapshot.prev_rsi else {
            return Confirmation::None;
        };
        let rsi = snapshot.rsi;
        let lower = self.config.rsi_lower;
        let upper = self.config.rsi_upper;

        if prev_rsi < lower && rsi >= lower && snapshot.ema > snapshot.wma {
            Confirmation::ConfirmLong
        } else if prev_rsi > upper && rsi <= upper && snapshot.ema < snapshot.wma {
            Confirmation::ConfirmShort
        } else {
            Confirmation::None
        }
    }
}
