use crate::market_data::TimeFrame;
use anyhow::{Result, bail};
use log::warn;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingConfig {
    pub instrument: InstrumentConfig,
    pub strategy: StrategyConfig,
    pub risk: RiskConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub filters: FilterConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub paper: PaperConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstrumentConfig {
    pub symbol: String,
    /// Smallest price increment.
    pub point: f64,
    #[serde(default = "default_lot_step")]
    pub lot_step: f64,
    #[serde(default = "default_min_lot")]
    pub min_lot: f64,
    #[serde(default = "default_max_lot")]
    pub max_lot: f64,
    /// Account currency gained or lost per 1.0 price move on one lot.
    #[serde(default = "default_value_per_price_unit")]
    pub value_per_price_unit: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopMethod {
    Swing,
    FixedPoints,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    pub trend_timeframe: TimeFrame,
    pub zone_timeframe: TimeFrame,
    pub confirm_timeframe: TimeFrame,
    #[serde(default = "default_rsi_period")]
    pub rsi_period: usize,
    #[serde(default = "default_wma_period")]
    pub wma_period: usize,
    #[serde(default = "default_ema_period")]
    pub ema_period: usize,
    #[serde(default = "default_slope_lookback")]
    pub slope_lookback: usize,
    #[serde(default = "default_zone_band_pct")]
    pub zone_band_pct: f64,
    #[serde(default = "default_zone_exit_pct")]
    pub zone_exit_pct: f64,
    #[serde(default = "default_zone_rsi_low")]
    pub zone_rsi_low: f64,
    #[serde(default = "default_zone_rsi_high")]
    pub zone_rsi_high: f64,
    #[serde(default = "default_rsi_lower")]
    pub rsi_lower: f64,
    #[serde(default = "default_rsi_upper")]
    pub rsi_upper: f64,
    #[serde(default = "default_bar_count")]
    pub bar_count: usize,
    #[serde(default = "default_exclude_forming_bar")]
    pub exclude_forming_bar: bool,
    #[serde(default = "default_stop_method")]
    pub stop_method: StopMethod,
    #[serde(default = "default_swing_lookback")]
    pub swing_lookback: usize,
    #[serde(default = "default_sl_points")]
    pub sl_points: f64,
    #[serde(default = "default_tp_rr")]
    pub tp_rr: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Fraction of equity risked per trade (0.01 = 1%).
    pub risk_pct: f64,
    /// Maximum realized loss per trading day, in account currency.
    pub daily_loss_limit: f64,
    #[serde(default = "default_max_consecutive_losses")]
    pub max_consecutive_losses: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Session start hour (UTC, inclusive).
    #[serde(default)]
    pub start_hour: u32,
    /// Session end hour (UTC, exclusive).
    #[serde(default = "default_end_hour")]
    pub end_hour: u32,
    #[serde(default = "default_max_spread_points")]
    pub max_spread_points: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    #[serde(default = "default_summary_interval_hours")]
    pub summary_interval_hours: u64,
    #[serde(default = "default_heartbeat_interval_minutes")]
    pub heartbeat_interval_minutes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaperConfig {
    /// Directory holding `<symbol>_<TF>.csv` bar files.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_starting_balance")]
    pub starting_balance: f64,
    /// Simulated spread in points.
    #[serde(default = "default_spread_points")]
    pub spread_points: f64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            poll_interval_secs: default_poll_interval_secs(),
        }
    }
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            start_hour: 0,
            end_hour: default_end_hour(),
            max_spread_points: default_max_spread_points(),
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            summary_interval_hours: default_summary_interval_hours(),
            heartbeat_interval_minutes: default_heartbeat_interval_minutes(),
        }
    }
}

impl Default for PaperConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            starting_balance: default_starting_balance(),
            spread_points: default_spread_points(),
        }
    }
}

fn default_lot_step() -> f64 {
    0.01
}
fn default_min_lot() -> f64 {
    0.01
}
fn default_max_lot() -> f64 {
    100.0
}
fn default_value_per_price_unit() -> f64 {
    1.0
}

fn default_rsi_period() -> usize {
    14
}
fn default_wma_period() -> usize {
    45
}
fn default_ema_period() -> usize {
    9
}
fn default_slope_lookback() -> usize {
    3
}
fn default_zone_band_pct() -> f64 {
    0.002 // within 0.2% of the EMA
}
fn default_zone_exit_pct() -> f64 {
    0.005
}
fn default_zone_rsi_low() -> f64 {
    40.0
}
fn default_zone_rsi_high() -> f64 {
    60.0
}
fn default_rsi_lower() -> f64 {
    30.0
}
fn default_rsi_upper() -> f64 {
    70.0
}
fn default_bar_count() -> usize {
    200 // enough for WMA45 plus slope and a buffer
}
fn default_exclude_forming_bar() -> bool {
    true
}
fn default_stop_method() -> StopMethod {
    StopMethod::Swing
}
fn default_swing_lookback() -> usize {
    5
}
fn default_sl_points() -> f64 {
    500.0
}
fn default_tp_rr() -> f64 {
    1.5
}

fn default_max_consecutive_losses() -> u32 {
    3
}

fn default_max_retries() -> u32 {
    3
}
fn default_retry_delay_ms() -> u64 {
    1000
}
fn default_poll_interval_secs() -> u64 {
    10
}

fn default_end_hour() -> u32 {
    24
}
fn default_max_spread_points() -> f64 {
    1000.0
}

fn default_summary_interval_hours() -> u64 {
    4
}
fn default_heartbeat_interval_minutes() -> u64 {
    60
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}
fn default_starting_balance() -> f64 {
    10000.0
}
fn default_spread_points() -> f64 {
    20.0
}

impl TradingConfig {
    pub fn load() -> Result<Self> {
        Self::load_from_file("config.json")
    }

    pub fn load_from_file(path: &str) -> Result<Self> {
        let config = match fs::read_to_string(path) {
            Ok(config_str) => serde_json::from_str::<TradingConfig>(&config_str)?,
            Err(e) => {
                warn!("Could not read {}: {}. Using default configuration.", path, e);
                Self::default()
            }
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the decision engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        let s = &self.strategy;
        if s.rsi_period == 0 || s.wma_period == 0 || s.ema_period == 0 {
            bail!("Indicator periods must be positive");
        }
        if s.slope_lookback == 0 {
            bail!("slope_lookback must be positive");
        }
        if s.zone_band_pct <= 0.0 || s.zone_exit_pct < s.zone_band_pct {
            bail!(
                "Zone band must be positive and not wider than the exit distance: band {} exit {}",
                s.zone_band_pct,
                s.zone_exit_pct
            );
        }
        if s.zone_rsi_low > s.zone_rsi_high {
            bail!("zone_rsi_low {} exceeds zone_rsi_high {}", s.zone_rsi_low, s.zone_rsi_high);
        }
        if s.rsi_lower >= s.rsi_upper {
            bail!("rsi_lower {} must be below rsi_upper {}", s.rsi_lower, s.rsi_upper);
        }
        let warmup = s.wma_period.max(s.ema_period).max(s.rsi_period + 1) + s.slope_lookback + 1;
        if s.bar_count < warmup + usize::from(s.exclude_forming_bar) {
            bail!("bar_count {} is below the {} bars the analyzers need", s.bar_count, warmup);
        }
        if s.swing_lookback == 0 || s.sl_points <= 0.0 || s.tp_rr <= 0.0 {
            bail!("Stop parameters must be positive");
        }

        let r = &self.risk;
        if !(r.risk_pct > 0.0 && r.risk_pct <= 1.0) {
            bail!("risk_pct must be in (0, 1], got {}", r.risk_pct);
        }
        if r.daily_loss_limit <= 0.0 {
            bail!("daily_loss_limit must be positive, got {}", r.daily_loss_limit);
        }
        if r.max_consecutive_losses == 0 {
            bail!("max_consecutive_losses must be at least 1");
        }

        let i = &self.instrument;
        if i.point <= 0.0 || i.lot_step <= 0.0 || i.value_per_price_unit <= 0.0 {
            bail!("Instrument point, lot_step and value_per_price_unit must be positive");
        }
        if i.min_lot <= 0.0 || i.min_lot > i.max_lot {
            bail!("Invalid lot bounds: min {} max {}", i.min_lot, i.max_lot);
        }

        let f = &self.filters;
        if f.start_hour > 24 || f.end_hour > 24 || f.start_hour >= f.end_hour {
            bail!("Invalid session window {}..{}", f.start_hour, f.end_hour);
        }

        if self.execution.poll_interval_secs == 0 {
            bail!("poll_interval_secs must be positive");
        }
        if self.monitor.summary_interval_hours == 0 || self.monitor.heartbeat_interval_minutes == 0 {
            bail!("Monitor intervals must be positive");
        }

        Ok(())
    }
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            instrument: InstrumentConfig {
                symbol: "XAUUSD".to_string(),
                point: 0.01,
                lot_step: default_lot_step(),
                min_lot: default_min_lot(),
                max_lot: default_max_lot(),
                value_per_price_unit: 100.0, // 100 oz contract
            },
            strategy: StrategyConfig {
                trend_timeframe: TimeFrame::H4,
                zone_timeframe: TimeFrame::H1,
                confirm_timeframe: TimeFrame::M15,
                rsi_period: default_rsi_period(),
                wma_period: default_wma_period(),
                ema_period: default_ema_period(),
                slope_lookback: default_slope_lookback(),
                zone_band_pct: default_zone_band_pct(),
                zone_exit_pct: default_zone_exit_pct(),
                zone_rsi_low: default_zone_rsi_low(),
                zone_rsi_high: default_zone_rsi_high(),
                rsi_lower: default_rsi_lower(),
                rsi_upper: default_rsi_upper(),
                bar_count: default_bar_count(),
                exclude_forming_bar: default_exclude_forming_bar(),
                stop_method: default_stop_method(),
                swing_lookback: default_swing_lookback(),
                sl_points: default_sl_points(),
                tp_rr: default_tp_rr(),
            },
            risk: RiskConfig {
                risk_pct: 0.01,
                daily_loss_limit: 500.0,
                max_consecutive_losses: default_max_consecutive_losses(),
            },
            execution: ExecutionConfig::default(),
            filters: FilterConfig::default(),
            monitor: MonitorConfig::default(),
            paper: PaperConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(TradingConfig::default().validate().is_ok());
    }

    #[test]
    fn test_minimal_json_fills_defaults() -> Result<()> {
        let json = r#"{
            "instrument": { "symbol": "EURUSD", "point": 0.00001, "value_per_price_unit": 100000.0 },
            "strategy": { "trend_timeframe": "H4", "zone_timeframe": "H1", "confirm_timeframe": "M15" },
            "risk": { "risk_pct": 0.01, "daily_loss_limit": 200.0 }
        }"#;
        let config: TradingConfig = serde_json::from_str(json)?;
        config.validate()?;

        assert_eq!(config.strategy.wma_period, 45);
        assert_eq!(config.strategy.stop_method, StopMethod::Swing);
        assert_eq!(config.risk.max_consecutive_losses, 3);
        assert_eq!(config.execution.max_retries, 3);
        assert_eq!(config.filters.end_hour, 24);
        assert_eq!(config.instrument.lot_step, 0.01);
        Ok(())
    }

    #[test]
    fn test_rejects_inverted_zone_band() {
        let mut config = TradingConfig::default();
        config.strategy.zone_exit_pct = config.strategy.zone_band_pct / 2.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_bad_risk_values() {
        let mut config = TradingConfig::default();
        config.risk.risk_pct = 1.5;
        assert!(config.validate().is_err());

        let mut config = TradingConfig::default();
        config.risk.daily_loss_limit = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_short_bar_count() {
        let mut config = TradingConfig::default();
        config.strategy.bar_count = 40;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() -> Result<()> {
        let config = TradingConfig::load_from_file("definitely/not/here.json")?;
        assert_eq!(config.instrument.symbol, "XAUUSD");
        Ok(())
    }
}
