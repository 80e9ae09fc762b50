//! Signal generation
//!
//! Three analyzers reduce the trend, entry-zone and confirmation timeframes to
//! categorical states; the engine combines them into one trade decision.

pub mod analyzer;
pub mod core;
pub mod engine;

// Re-export core types for easy access
pub use analyzer::{AnalyzerConfig, TimeframeAnalyzer, ZoneMemory};
pub use core::{
    AnalyzerRole, Confirmation, Direction, TimeframeState, TimeframeStates, TradeAction, TradeDecision,
    TrendBias, ZoneState,
};
pub use engine::SignalEngine;
