use crate::config::FilterConfig;
use crate::orders::Quote;
use chrono::{DateTime, Timelike, Utc};
use log::{info, warn};

/// Why an entry was held back before reaching the risk manager.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FilterBlock {
    OutsideSession { hour: u32 },
    SpreadTooWide { spread_points: f64 },
}

impl FilterBlock {
    pub fn rule_name(&self) -> &'static str {
        match self {
            FilterBlock::OutsideSession { .. } => "session_filter",
            FilterBlock::SpreadTooWide { .. } => "spread_filter",
        }
    }
}

/// Pre-trade market condition checks. Only entries are filtered.
#[derive(Debug, Clone)]
pub struct EntryFilters {
    config: FilterConfig,
    point: f64,
}

impl EntryFilters {
    pub fn new(config: FilterConfig, point: f64) -> Self {
        Self { config, point }
    }

    pub fn in_session(&self, now: DateTime<Utc>) -> bool {
        let hour = now.hour();
        self.config.start_hour <= hour && hour < self.config.end_hour
    }

    pub fn spread_points(&self, quote: &Quote) -> f64 {
        quote.spread() / self.point
    }

    pub fn check(&self, now: DateTime<Utc>, quote: &Quote) -> Result<(), FilterBlock> {
        if !self.in_session(now) {
            let hour = now.hour();
            info!(
                "Outside trading hours ({}:00). Allowed: {}-{}",
                hour, self.config.start_hour, self.config.end_hour
            );
            return Err(FilterBlock::OutsideSession { hour });
        }

        let spread_points = self.spread_points(quote);
        if spread_points > self.config.max_spread_points {
            warn!(
                "Spread too high ({:.1} > {})",
                spread_points, self.config.max_spread_points
            );
            return Err(FilterBlock::SpreadTooWide { spread_points });
        }

        Ok(())
    }
}
