//! Core signal types shared by the analyzers and the decision engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Position / trade direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    pub fn opposite(&self) -> Direction {
        match self {
            Direction::Long => Direction::Short,
            Direction::Short => Direction::Long,
        }
    }

    /// +1 for long, -1 for short.
    pub fn sign(&self) -> f64 {
        match self {
            Direction::Long => 1.0,
            Direction::Short => -1.0,
        }
    }
}

/// Which question a timeframe answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AnalyzerRole {
    /// Which direction is permitted.
    Trend,
    /// Whether price is in a pullback worth entering.
    EntryZone,
    /// When to act.
    Confirmation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrendBias {
    Bullish,
    Bearish,
    Neutral,
}

impl TrendBias {
    pub fn direction(&self) -> Option<Direction> {
        match self {
            TrendBias::Bullish => Some(Direction::Long),
            TrendBias::Bearish => Some(Direction::Short),
            TrendBias::Neutral => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ZoneState {
    InZone,
    OutOfZone,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Confirmation {
    ConfirmLong,
    ConfirmShort,
    None,
}

impl Confirmation {
    pub fn direction(&self) -> Option<Direction> {
        match self {
            Confirmation::ConfirmLong => Some(Direction::Long),
            Confirmation::ConfirmShort => Some(Direction::Short),
            Confirmation::None => None,
        }
    }
}

/// Output of one analyzer, tagged by role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeframeState {
    Trend(TrendBias),
    Zone(ZoneState),
    Confirm(Confirmation),
}

/// The three per-cycle timeframe states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeframeStates {
    pub trend: TrendBias,
    pub zone: ZoneState,
    pub confirmation: Confirmation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TradeAction {
    EnterLong,
    EnterShort,
    Exit,
    Hold,
}

impl TradeAction {
    pub fn enter(direction: Direction) -> Self {
        match direction {
            Direction::Long => TradeAction::EnterLong,
            Direction::Short => TradeAction::EnterShort,
        }
    }

    /// Direction of an entry, `None` for exit and hold.
    pub fn entry_direction(&self) -> Option<Direction> {
        match self {
            TradeAction::EnterLong => Some(Direction::Long),
            TradeAction::EnterShort => Some(Direction::Short),
            TradeAction::Exit | TradeAction::Hold => None,
        }
    }

    pub fn is_entry(&self) -> bool {
        self.entry_direction().is_some()
    }
}

/// One cycle's decision together with the inputs that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeDecision {
    pub action: TradeAction,
    pub states: TimeframeStates,
    /// Name of the rule that matched.
    pub rule: String,
    pub timestamp: DateTime<Utc>,
}

impl TradeDecision {
    /// Same inputs, action replaced by `Hold`.
    pub fn demoted(&self, rule: &str) -> Self {
        Self {
            action: TradeAction::Hold,
            states: self.states,
            rule: rule.to_string(),
            timestamp: self.timestamp,
        }
    }
}
