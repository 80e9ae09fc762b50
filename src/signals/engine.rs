//! Multi-timeframe decision engine.
//!
//! The trend timeframe decides which direction is permitted, the entry zone
//! decides whether an entry is considered at all, and the confirmation
//! timeframe picks the instant. Exits only need an opposing confirmation.
//!
//! Rules are evaluated in order and the first one that matches wins.

use crate::signals::core::{
    Confirmation, Direction, TimeframeStates, TradeAction, TradeDecision, TrendBias, ZoneState,
};
use chrono::{DateTime, Utc};
use log::debug;

/// Inputs a rule looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecisionInputs {
    pub states: TimeframeStates,
    pub position: Option<Direction>,
}

/// A named decision rule. Returns `Some(action)` when it applies.
pub struct Rule {
    pub name: &'static str,
    pub evaluate: fn(&DecisionInputs) -> Option<TradeAction>,
}

fn exit_on_opposing_confirmation(inputs: &DecisionInputs) -> Option<TradeAction> {
    let position = inputs.position?;
    let confirmed = inputs.states.confirmation.direction()?;
    (confirmed == position.opposite()).then_some(TradeAction::Exit)
}

fn enter_with_trend(inputs: &DecisionInputs) -> Option<TradeAction> {
    if inputs.position.is_some() || inputs.states.zone != ZoneState::InZone {
        return None;
    }
    let confirmed = inputs.states.confirmation.direction()?;
    let permitted = inputs.states.trend.direction()?;
    (confirmed == permitted).then_some(TradeAction::enter(confirmed))
}

fn hold(_inputs: &DecisionInputs) -> Option<TradeAction> {
    Some(TradeAction::Hold)
}

/// Decision table in priority order.
pub const RULES: [Rule; 3] = [
    Rule {
        name: "exit_on_opposing_confirmation",
        evaluate: exit_on_opposing_confirmation,
    },
    Rule {
        name: "enter_with_trend",
        evaluate: enter_with_trend,
    },
    Rule {
        name: "hold",
        evaluate: hold,
    },
];

#[derive(Debug, Clone, Default)]
pub struct SignalEngine;

impl SignalEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn decide(
        &self,
        trend: TrendBias,
        zone: ZoneState,
        confirmation: Confirmation,
        position: Option<Direction>,
        timestamp: DateTime<Utc>,
    ) -> TradeDecision {
        let inputs = DecisionInputs {
            states: TimeframeStates {
                trend,
                zone,
                confirmation,
            },
            position,
        };

        let (rule, action) = RULES
            .iter()
            .find_map(|rule| (rule.evaluate)(&inputs).map(|action| (rule.name, action)))
            .unwrap_or(("hold", TradeAction::Hold));

        debug!(
            "Decision {:?} via {} (trend={:?} zone={:?} confirm={:?} position={:?})",
            action, rule, trend, zone, confirmation, position
        );

        TradeDecision {
            action,
            states: inputs.states,
            rule: rule.to_string(),
            timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TRENDS: [TrendBias; 3] = [TrendBias::Bullish, TrendBias::Bearish, TrendBias::Neutral];
    const ZONES: [ZoneState; 2] = [ZoneState::InZone, ZoneState::OutOfZone];
    const CONFIRMS: [Confirmation; 3] = [
        Confirmation::ConfirmLong,
        Confirmation::ConfirmShort,
        Confirmation::None,
    ];
    const POSITIONS: [Option<Direction>; 3] = [None, Some(Direction::Long), Some(Direction::Short)];

    fn decide(
        trend: TrendBias,
        zone: ZoneState,
        confirmation: Confirmation,
        position: Option<Direction>,
    ) -> TradeAction {
        SignalEngine::new()
            .decide(trend, zone, confirmation, position, Utc::now())
            .action
    }

    #[test]
    fn test_bullish_in_zone_confirm_long_enters_long() {
        assert_eq!(
            decide(TrendBias::Bullish, ZoneState::InZone, Confirmation::ConfirmLong, None),
            TradeAction::EnterLong
        );
        assert_eq!(
            decide(TrendBias::Bearish, ZoneState::InZone, Confirmation::ConfirmShort, None),
            TradeAction::EnterShort
        );
    }

    #[test]
    fn test_open_long_exits_on_confirm_short_regardless_of_trend_and_zone() {
        for trend in TRENDS {
            for zone in ZONES {
                assert_eq!(
                    decide(trend, zone, Confirmation::ConfirmShort, Some(Direction::Long)),
                    TradeAction::Exit
                );
                assert_eq!(
                    decide(trend, zone, Confirmation::ConfirmLong, Some(Direction::Short)),
                    TradeAction::Exit
                );
            }
        }
    }

    #[test]
    fn test_never_enters_out_of_zone() {
        for trend in TRENDS {
            for confirmation in CONFIRMS {
                for position in POSITIONS {
                    let action = decide(trend, ZoneState::OutOfZone, confirmation, position);
                    assert!(
                        !action.is_entry(),
                        "entered with trend={trend:?} confirm={confirmation:?} position={position:?}"
                    );
                }
            }
        }
    }

    #[test]
    fn test_entries_agree_with_trend_and_confirmation() {
        for trend in TRENDS {
            for zone in ZONES {
                for confirmation in CONFIRMS {
                    for position in POSITIONS {
                        let action = decide(trend, zone, confirmation, position);
                        if let Some(direction) = action.entry_direction() {
                            assert_eq!(trend.direction(), Some(direction));
                            assert_eq!(confirmation.direction(), Some(direction));
                            assert_eq!(position, None);
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn test_holds_otherwise() {
        assert_eq!(
            decide(TrendBias::Bearish, ZoneState::InZone, Confirmation::ConfirmLong, None),
            TradeAction::Hold
        );
        assert_eq!(
            decide(TrendBias::Neutral, ZoneState::InZone, Confirmation::ConfirmLong, None),
            TradeAction::Hold
        );
        assert_eq!(
            decide(TrendBias::Bullish, ZoneState::InZone, Confirmation::ConfirmLong, Some(Direction::Long)),
            TradeAction::Hold
        );
        assert_eq!(
            decide(TrendBias::Bullish, ZoneState::InZone, Confirmation::None, None),
            TradeAction::Hold
        );
    }

    #[test]
    fn test_rule_order_and_names() {
        let names: Vec<&str> = RULES.iter().map(|r| r.name).collect();
        assert_eq!(names, ["exit_on_opposing_confirmation", "enter_with_trend", "hold"]);

        let decision = SignalEngine::new().decide(
            TrendBias::Bullish,
            ZoneState::InZone,
            Confirmation::ConfirmShort,
            Some(Direction::Long),
            Utc::now(),
        );
        assert_eq!(decision.rule, "exit_on_opposing_confirmation");
    }

    #[test]
    fn test_rules_individually() {
        let inputs = DecisionInputs {
            states: TimeframeStates {
                trend: TrendBias::Bullish,
                zone: ZoneState::InZone,
                confirmation: Confirmation::ConfirmLong,
            },
            position: None,
        };
        assert_eq!((RULES[0].evaluate)(&inputs), None);
        assert_eq!((RULES[1].evaluate)(&inputs), Some(TradeAction::EnterLong));
        assert_eq!((RULES[2].evaluate)(&inputs), Some(TradeAction::Hold));
    }
}
