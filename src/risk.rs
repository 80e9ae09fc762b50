//! Risk manager: day-scoped loss tracking, circuit breaker and position sizing.
//!
//! [`RiskState`] changes only through [`RiskManager::report_outcome`] (P&L and
//! loss streak), [`RiskManager::roll_day`] (replacement) and
//! [`RiskManager::restore_day`] (rebuild from broker history). The halt flag
//! is sticky until the trading date changes.

use crate::config::{InstrumentConfig, RiskConfig};
use crate::error::RiskError;
use crate::orders::{ClosedTrade, SizedOrder};
use crate::signals::core::{Direction, TradeAction, TradeDecision};
use chrono::{DateTime, NaiveDate, Utc};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskState {
    pub trading_date: NaiveDate,
    pub realized_pnl_today: f64,
    pub consecutive_losses: u32,
    pub is_halted: bool,
}

impl RiskState {
    pub fn new(trading_date: NaiveDate) -> Self {
        Self {
            trading_date,
            realized_pnl_today: 0.0,
            consecutive_losses: 0,
            is_halted: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VetoReason {
    CircuitBreakerTripped,
    DailyLossLimitExceeded,
    ConsecutiveLossLimitExceeded,
}

impl fmt::Display for VetoReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            VetoReason::CircuitBreakerTripped => "circuit breaker tripped",
            VetoReason::DailyLossLimitExceeded => "daily loss limit exceeded",
            VetoReason::ConsecutiveLossLimitExceeded => "consecutive loss limit exceeded",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Authorization {
    Approved(TradeDecision),
    Vetoed {
        decision: TradeDecision,
        reason: VetoReason,
    },
}

impl Authorization {
    pub fn is_approved(&self) -> bool {
        matches!(self, Authorization::Approved(_))
    }

    pub fn veto_reason(&self) -> Option<VetoReason> {
        match self {
            Authorization::Approved(_) => None,
            Authorization::Vetoed { reason, .. } => Some(*reason),
        }
    }
}

/// Stop loss and take profit for a prospective entry.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProtectiveLevels {
    pub entry_price: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
}

impl ProtectiveLevels {
    /// Take profit placed `reward_ratio` stop distances beyond the entry.
    pub fn from_stop(direction: Direction, entry_price: f64, stop_loss: f64, reward_ratio: f64) -> Self {
        let distance = (entry_price - stop_loss).abs();
        Self {
            entry_price,
            stop_loss,
            take_profit: entry_price + direction.sign() * distance * reward_ratio,
        }
    }

    pub fn stop_distance(&self) -> f64 {
        (self.entry_price - self.stop_loss).abs()
    }
}

pub struct RiskManager {
    pub config: RiskConfig,
    instrument: InstrumentConfig,
    state: RiskState,
    reported_trades: HashSet<String>,
}

impl RiskManager {
    pub fn new(config: RiskConfig, instrument: InstrumentConfig, trading_date: NaiveDate) -> Self {
        Self {
            config,
            instrument,
            state: RiskState::new(trading_date),
            reported_trades: HashSet::new(),
        }
    }

    pub fn state(&self) -> &RiskState {
        &self.state
    }

    /// Replace the state with a fresh one when `today` is a new trading date.
    /// Returns true when a rollover happened.
    pub fn roll_day(&mut self, today: NaiveDate) -> bool {
        if today == self.state.trading_date {
            return false;
        }

        info!(
            "Trading day rollover {} -> {} (closing P&L {:.2}, {} consecutive losses, halted: {})",
            self.state.trading_date,
            today,
            self.state.realized_pnl_today,
            self.state.consecutive_losses,
            self.state.is_halted
        );
        self.state = RiskState::new(today);
        // Earlier-day trades are filtered by close date, so their ids need not be kept.
        self.reported_trades.clear();
        true
    }

    /// Rebuild today's state from the broker's record of trades closed today.
    /// Used at startup so a restart keeps the day's P&L, loss streak and halt.
    pub fn restore_day(&mut self, today: NaiveDate, history: &[ClosedTrade]) -> &RiskState {
        let mut todays: Vec<&ClosedTrade> = history
            .iter()
            .filter(|t| trading_date(t.closed_at) == today)
            .collect();
        todays.sort_by_key(|t| t.closed_at);

        self.state = RiskState::new(today);
        self.reported_trades.clear();
        for trade in todays {
            self.reported_trades.insert(trade.trade_id.clone());
            self.apply(trade);
        }

        info!(
            "Restored {} from {} trade(s): day P&L {:.2}, consecutive losses {}, halted: {}",
            today,
            self.reported_trades.len(),
            self.state.realized_pnl_today,
            self.state.consecutive_losses,
            self.state.is_halted
        );
        &self.state
    }

    /// Volume risking `risk_pct` of equity over `stop_distance`, rounded down
    /// to the lot step and capped at the maximum lot.
    pub fn size(
        &self,
        decision: &TradeDecision,
        account_equity: f64,
        risk_pct: f64,
        stop_distance: f64,
    ) -> Result<f64, RiskError> {
        if !decision.action.is_entry() {
            return Err(RiskError::InvalidSizing {
                reason: format!("{:?} decisions are not sized", decision.action),
            });
        }
        if !stop_distance.is_finite() || stop_distance <= 0.0 {
            return Err(RiskError::InvalidSizing {
                reason: format!("stop distance must be positive, got {}", stop_distance),
            });
        }
        if !account_equity.is_finite() || account_equity <= 0.0 || !risk_pct.is_finite() || risk_pct <= 0.0 {
            return Err(RiskError::InvalidSizing {
                reason: format!("equity {} and risk {} must be positive", account_equity, risk_pct),
            });
        }

        let risk_amount = account_equity * risk_pct;
        let raw_volume = risk_amount / (stop_distance * self.instrument.value_per_price_unit);
        let volume = round_down_to_step(raw_volume, self.instrument.lot_step);

        if volume < self.instrument.min_lot {
            return Err(RiskError::InvalidSizing {
                reason: format!(
                    "volume {} below minimum lot {} (risk {:.2} over stop distance {})",
                    volume, self.instrument.min_lot, risk_amount, stop_distance
                ),
            });
        }

        if volume > self.instrument.max_lot {
            warn!("Volume {} capped at maximum lot {}", volume, self.instrument.max_lot);
            return Ok(self.instrument.max_lot);
        }

        Ok(volume)
    }

    /// Permit or veto a decision. Exits and holds always pass. Detecting a
    /// breached limit trips the breaker for the rest of the day.
    pub fn authorize(&mut self, decision: TradeDecision) -> Authorization {
        if !decision.action.is_entry() {
            return Authorization::Approved(decision);
        }

        let reason = if self.daily_loss_breached() {
            Some(VetoReason::DailyLossLimitExceeded)
        } else if self.consecutive_losses_breached() {
            Some(VetoReason::ConsecutiveLossLimitExceeded)
        } else if self.state.is_halted {
            Some(VetoReason::CircuitBreakerTripped)
        } else {
            None
        };

        match reason {
            None => Authorization::Approved(decision),
            Some(reason) => {
                self.trip(reason);
                warn!("Vetoed {:?}: {}", decision.action, reason);
                Authorization::Vetoed { decision, reason }
            }
        }
    }

    /// Build the order for an approved entry.
    pub fn build_order(
        &self,
        client_order_id: String,
        symbol: &str,
        decision: &TradeDecision,
        account_equity: f64,
        levels: ProtectiveLevels,
    ) -> Result<SizedOrder, RiskError> {
        if self.state.is_halted {
            return Err(RiskError::InvalidSizing {
                reason: "trading halted for the day".to_string(),
            });
        }
        let direction = decision
            .action
            .entry_direction()
            .ok_or_else(|| RiskError::InvalidSizing {
                reason: format!("{:?} is not an entry", decision.action),
            })?;

        let volume = self.size(decision, account_equity, self.config.risk_pct, levels.stop_distance())?;

        Ok(SizedOrder {
            client_order_id,
            symbol: symbol.to_string(),
            direction,
            volume,
            entry_price: levels.entry_price,
            stop_loss: levels.stop_loss,
            take_profit: levels.take_profit,
            created_at: decision.timestamp,
        })
    }

    /// Apply one closed trade. A trade id is accepted once; trades closed
    /// before the current trading date are acknowledged but not counted.
    pub fn report_outcome(&mut self, trade: &ClosedTrade) -> Result<&RiskState, RiskError> {
        if !self.reported_trades.insert(trade.trade_id.clone()) {
            warn!("Ignoring duplicate outcome for trade {}", trade.trade_id);
            return Err(RiskError::DuplicateOutcome {
                trade_id: trade.trade_id.clone(),
            });
        }

        let closed_on = trading_date(trade.closed_at);
        if closed_on < self.state.trading_date {
            info!(
                "Trade {} closed on {}, not counted against {}",
                trade.trade_id, closed_on, self.state.trading_date
            );
            return Ok(&self.state);
        }

        self.apply(trade);
        Ok(&self.state)
    }

    fn apply(&mut self, trade: &ClosedTrade) {
        self.state.realized_pnl_today += trade.pnl;
        if trade.is_loss() {
            self.state.consecutive_losses += 1;
        } else if trade.pnl > 0.0 {
            self.state.consecutive_losses = 0;
        }

        info!(
            "Outcome {}: P&L {:.2}, day P&L {:.2}, consecutive losses {}",
            trade.trade_id, trade.pnl, self.state.realized_pnl_today, self.state.consecutive_losses
        );

        if self.daily_loss_breached() {
            self.trip(VetoReason::DailyLossLimitExceeded);
        } else if self.consecutive_losses_breached() {
            self.trip(VetoReason::ConsecutiveLossLimitExceeded);
        }
    }

    fn daily_loss_breached(&self) -> bool {
        self.state.realized_pnl_today <= -self.config.daily_loss_limit
    }

    fn consecutive_losses_breached(&self) -> bool {
        self.state.consecutive_losses >= self.config.max_consecutive_losses
    }

    fn trip(&mut self, reason: VetoReason) {
        if self.state.is_halted {
            return;
        }
        self.state.is_halted = true;
        error!(
            "Circuit breaker tripped for {}: {} (day P&L {:.2}, consecutive losses {})",
            self.state.trading_date, reason, self.state.realized_pnl_today, self.state.consecutive_losses
        );
    }
}

fn round_down_to_step(value: f64, step: f64) -> f64 {
    let steps = (value / step + 1e-9).floor();
    // Strip float noise from steps * step (e.g. 0.07 * 3).
    (steps * step * 1e8).round() / 1e8
}

/// Trading date for a wall-clock instant.
pub fn trading_date(now: DateTime<Utc>) -> NaiveDate {
    now.date_naive()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orders::CloseReason;
    use chrono::TimeZone;
    use crate::signals::core::{Confirmation, TimeframeStates, TrendBias, ZoneState};

    fn instrument(lot_step: f64, min_lot: f64) -> InstrumentConfig {
        InstrumentConfig {
            symbol: "TEST".to_string(),
            point: 0.01,
            lot_step,
            min_lot,
            max_lot: 1000.0,
            value_per_price_unit: 1.0,
        }
    }

    fn manager() -> RiskManager {
        let config = RiskConfig {
            risk_pct: 0.01,
            daily_loss_limit: 300.0,
            max_consecutive_losses: 3,
        };
        RiskManager::new(config, instrument(0.01, 0.01), NaiveDate::from_ymd_opt(2024, 3, 4).unwrap())
    }

    fn decision(action: TradeAction) -> TradeDecision {
        TradeDecision {
            action,
            states: TimeframeStates {
                trend: TrendBias::Bullish,
                zone: ZoneState::InZone,
                confirmation: Confirmation::ConfirmLong,
            },
            rule: "test".to_string(),
            timestamp: Utc::now(),
        }
    }

    fn trade(id: &str, pnl: f64) -> ClosedTrade {
        ClosedTrade {
            trade_id: id.to_string(),
            direction: Direction::Long,
            volume: 1.0,
            entry_price: 100.0,
            exit_price: 100.0 + pnl,
            pnl,
            reason: CloseReason::Signal,
            closed_at: Utc::now(),
        }
    }

    #[test]
    fn test_size_reference_scenario() {
        let rm = manager();
        let volume = rm.size(&decision(TradeAction::EnterLong), 10000.0, 0.01, 5.0).unwrap();
        assert!((volume - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_size_rounds_down_to_lot_step() {
        let rm = manager();
        // 100 / 7 = 14.2857...
        let volume = rm.size(&decision(TradeAction::EnterShort), 10000.0, 0.01, 7.0).unwrap();
        assert!((volume - 14.28).abs() < 1e-9);
    }

    #[test]
    fn test_size_rejects_bad_inputs() {
        let rm = manager();
        let enter = decision(TradeAction::EnterLong);
        assert!(matches!(rm.size(&enter, 10000.0, 0.01, 0.0), Err(RiskError::InvalidSizing { .. })));
        assert!(matches!(rm.size(&enter, 10000.0, 0.01, -1.0), Err(RiskError::InvalidSizing { .. })));
        // 0.1 / 50 = 0.002 < min lot 0.01
        assert!(matches!(rm.size(&enter, 10.0, 0.01, 50.0), Err(RiskError::InvalidSizing { .. })));
        assert!(rm.size(&decision(TradeAction::Hold), 10000.0, 0.01, 5.0).is_err());
    }

    #[test]
    fn test_fourth_authorize_after_three_losses_is_vetoed() {
        let mut rm = manager();
        for i in 0..3 {
            assert!(rm.authorize(decision(TradeAction::EnterLong)).is_approved());
            rm.report_outcome(&trade(&format!("T{i}"), -10.0)).unwrap();
        }

        let auth = rm.authorize(decision(TradeAction::EnterLong));
        assert_eq!(auth.veto_reason(), Some(VetoReason::ConsecutiveLossLimitExceeded));
        assert!(rm.state().is_halted);
    }

    #[test]
    fn test_daily_loss_limit_vetoes_and_halts() {
        let mut rm = manager();
        rm.report_outcome(&trade("A", -150.0)).unwrap();
        assert!(!rm.state().is_halted);
        rm.report_outcome(&trade("B", -150.0)).unwrap();
        assert!(rm.state().is_halted);

        let auth = rm.authorize(decision(TradeAction::EnterShort));
        assert_eq!(auth.veto_reason(), Some(VetoReason::DailyLossLimitExceeded));
    }

    #[test]
    fn test_breaker_is_sticky_after_a_win() {
        let mut rm = manager();
        for i in 0..3 {
            rm.report_outcome(&trade(&format!("L{i}"), -10.0)).unwrap();
        }
        rm.report_outcome(&trade("W", 50.0)).unwrap();
        assert_eq!(rm.state().consecutive_losses, 0);
        assert!(rm.state().is_halted);

        let auth = rm.authorize(decision(TradeAction::EnterLong));
        assert_eq!(auth.veto_reason(), Some(VetoReason::CircuitBreakerTripped));
    }

    #[test]
    fn test_exit_and_hold_never_vetoed() {
        let mut rm = manager();
        for i in 0..5 {
            rm.report_outcome(&trade(&format!("L{i}"), -100.0)).unwrap();
        }
        assert!(rm.authorize(decision(TradeAction::Exit)).is_approved());
        assert!(rm.authorize(decision(TradeAction::Hold)).is_approved());
    }

    #[test]
    fn test_duplicate_outcome_rejected() {
        let mut rm = manager();
        rm.report_outcome(&trade("T1", -10.0)).unwrap();
        let err = rm.report_outcome(&trade("T1", -10.0)).unwrap_err();
        assert_eq!(err, RiskError::DuplicateOutcome { trade_id: "T1".to_string() });
        assert_eq!(rm.state().consecutive_losses, 1);
        assert_eq!(rm.state().realized_pnl_today, -10.0);
    }

    #[test]
    fn test_scratch_trade_keeps_streak() {
        let mut rm = manager();
        rm.report_outcome(&trade("L", -10.0)).unwrap();
        rm.report_outcome(&trade("S", 0.0)).unwrap();
        assert_eq!(rm.state().consecutive_losses, 1);
    }

    #[test]
    fn test_roll_day_resets_state() {
        let mut rm = manager();
        for i in 0..3 {
            rm.report_outcome(&trade(&format!("L{i}"), -10.0)).unwrap();
        }
        assert!(rm.state().is_halted);

        let today = rm.state().trading_date;
        assert!(!rm.roll_day(today));
        assert!(rm.state().is_halted);

        let tomorrow = today.succ_opt().unwrap();
        assert!(rm.roll_day(tomorrow));
        assert_eq!(rm.state(), &RiskState::new(tomorrow));
        assert!(rm.authorize(decision(TradeAction::EnterLong)).is_approved());
    }

    fn trade_at(id: &str, pnl: f64, closed_at: DateTime<Utc>) -> ClosedTrade {
        ClosedTrade {
            closed_at,
            ..trade(id, pnl)
        }
    }

    #[test]
    fn test_earlier_day_trade_not_counted_after_rollover() {
        let mut rm = manager();
        let late = Utc.with_ymd_and_hms(2024, 3, 4, 23, 50, 0).unwrap();
        rm.roll_day(NaiveDate::from_ymd_opt(2024, 3, 5).unwrap());

        for i in 0..3 {
            rm.report_outcome(&trade_at(&format!("L{i}"), -120.0, late)).unwrap();
        }
        assert_eq!(rm.state().realized_pnl_today, 0.0);
        assert_eq!(rm.state().consecutive_losses, 0);
        assert!(!rm.state().is_halted);

        // Still acknowledged once.
        assert!(matches!(
            rm.report_outcome(&trade_at("L0", -120.0, late)),
            Err(RiskError::DuplicateOutcome { .. })
        ));
    }

    #[test]
    fn test_restore_day_replays_todays_trades_in_close_order() {
        let mut rm = manager();
        let at = |h, m| Utc.with_ymd_and_hms(2024, 3, 4, h, m, 0).unwrap();
        let history = vec![
            trade_at("L3", -10.0, at(11, 0)),
            trade_at("W1", 30.0, at(9, 0)),
            trade_at("L1", -10.0, at(9, 30)),
            trade_at("L2", -10.0, at(10, 0)),
            trade_at("Y1", -500.0, Utc.with_ymd_and_hms(2024, 3, 3, 22, 0, 0).unwrap()),
        ];

        let state = rm.restore_day(NaiveDate::from_ymd_opt(2024, 3, 4).unwrap(), &history).clone();
        assert_eq!(state.realized_pnl_today, 0.0);
        assert_eq!(state.consecutive_losses, 3);
        assert!(state.is_halted);

        assert!(matches!(
            rm.report_outcome(&trade_at("L2", -10.0, at(10, 0))),
            Err(RiskError::DuplicateOutcome { .. })
        ));
        assert_eq!(rm.state(), &state);
    }

    #[test]
    fn test_build_order_uses_levels() {
        let rm = manager();
        let levels = ProtectiveLevels::from_stop(Direction::Long, 100.0, 95.0, 1.5);
        assert_eq!(levels.take_profit, 107.5);

        let order = rm
            .build_order("TEST-1".into(), "TEST", &decision(TradeAction::EnterLong), 10000.0, levels)
            .unwrap();
        assert_eq!(order.direction, Direction::Long);
        assert!((order.volume - 20.0).abs() < 1e-9);
        assert_eq!(order.stop_loss, 95.0);
        assert_eq!(order.take_profit, 107.5);
    }

    #[test]
    fn test_short_levels_mirror() {
        let levels = ProtectiveLevels::from_stop(Direction::Short, 100.0, 104.0, 2.0);
        assert_eq!(levels.take_profit, 92.0);
        assert_eq!(levels.stop_distance(), 4.0);
    }
}
