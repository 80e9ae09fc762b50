//! Paper broker replaying `<symbol>_<TF>.csv` bar files.
//!
//! The replay clock advances one clock-timeframe bar at a time. At clock time
//! `t` every bar that opened at or before `t` is visible; the bar opening at
//! `t` is the forming bar and is exposed flat at its open price. Fills happen
//! at that price plus or minus half the configured spread.

use crate::broker::Broker;
use crate::config::{InstrumentConfig, PaperConfig};
use crate::error::BrokerError;
use crate::market_data::{PriceBar, TimeFrame};
use crate::orders::{CloseReason, ClosedTrade, Fill, OpenPosition, Quote, SizedOrder};
use crate::signals::core::Direction;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use log::{debug, info, warn};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

/// Days of closed-trade history the broker keeps.
const HISTORY_DAYS: i64 = 2;

#[derive(Debug, Deserialize)]
struct CsvBar {
    timestamp: i64,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    #[serde(default)]
    volume: f64,
}

/// Read one bar file. Columns: `timestamp,open,high,low,close,volume`, with
/// `timestamp` in unix seconds of the bar open.
pub fn load_bars(path: &Path) -> Result<Vec<PriceBar>, BrokerError> {
    let mut rdr = csv::Reader::from_path(path).map_err(|e| BrokerError::DataUnavailable {
        reason: format!("failed to open {}: {}", path.display(), e),
    })?;

    let mut bars = Vec::new();
    for row in rdr.deserialize::<CsvBar>() {
        let row = row.map_err(|e| BrokerError::DataUnavailable {
            reason: format!("CSV parse error in {}: {}", path.display(), e),
        })?;
        let timestamp = DateTime::from_timestamp(row.timestamp, 0).ok_or_else(|| BrokerError::DataUnavailable {
            reason: format!("invalid timestamp {} in {}", row.timestamp, path.display()),
        })?;
        bars.push(PriceBar::new(timestamp, row.open, row.high, row.low, row.close, row.volume));
    }

    bars.sort_by_key(|b| b.timestamp);
    Ok(bars)
}

struct PaperPosition {
    position: OpenPosition,
    fill: Fill,
    /// Clock bars strictly before this time were already checked for exits.
    checked_until: DateTime<Utc>,
}

pub struct PaperBroker {
    instrument: InstrumentConfig,
    bars: HashMap<TimeFrame, Vec<PriceBar>>,
    clock_timeframe: TimeFrame,
    clock_index: usize,
    half_spread: f64,
    balance: f64,
    position: Option<PaperPosition>,
    pending_closed: Vec<ClosedTrade>,
    /// Recently closed trades, kept for [`Broker::closed_trades_on`].
    history: Vec<ClosedTrade>,
    next_trade_id: u64,
}

impl PaperBroker {
    pub fn new(
        instrument: InstrumentConfig,
        paper: &PaperConfig,
        bars: HashMap<TimeFrame, Vec<PriceBar>>,
        clock_timeframe: TimeFrame,
    ) -> Result<Self, BrokerError> {
        match bars.get(&clock_timeframe) {
            Some(clock) if !clock.is_empty() => {}
            _ => {
                return Err(BrokerError::DataUnavailable {
                    reason: format!("no {} bars to drive the replay clock", clock_timeframe),
                });
            }
        }

        let half_spread = paper.spread_points * instrument.point / 2.0;
        Ok(Self {
            instrument,
            bars,
            clock_timeframe,
            clock_index: 0,
            half_spread,
            balance: paper.starting_balance,
            position: None,
            pending_closed: Vec::new(),
            history: Vec::new(),
            next_trade_id: 1,
        })
    }

    /// Load `<symbol>_<TF>.csv` for each timeframe from the configured directory.
    pub fn from_dir(
        instrument: InstrumentConfig,
        paper: &PaperConfig,
        timeframes: &[TimeFrame],
        clock_timeframe: TimeFrame,
    ) -> Result<Self, BrokerError> {
        let mut bars = HashMap::new();
        for &timeframe in timeframes {
            let path = paper
                .data_dir
                .join(format!("{}_{}.csv", instrument.symbol, timeframe));
            let loaded = load_bars(&path)?;
            info!("Loaded {} {} bars from {}", loaded.len(), timeframe, path.display());
            bars.insert(timeframe, loaded);
        }
        Self::new(instrument, paper, bars, clock_timeframe)
    }

    /// Current replay time: open time of the forming clock bar.
    pub fn now(&self) -> DateTime<Utc> {
        self.bars[&self.clock_timeframe][self.clock_index].timestamp
    }

    /// Move the clock to the next bar. Returns `None` once data runs out.
    pub fn advance(&mut self) -> Option<DateTime<Utc>> {
        let clock = &self.bars[&self.clock_timeframe];
        if self.clock_index + 1 >= clock.len() {
            return None;
        }
        self.clock_index += 1;
        Some(self.now())
    }

    pub fn balance(&self) -> f64 {
        self.balance
    }

    fn current_price(&self) -> f64 {
        self.bars[&self.clock_timeframe][self.clock_index].open
    }

    fn current_quote(&self) -> Quote {
        let mid = self.current_price();
        Quote {
            bid: mid - self.half_spread,
            ask: mid + self.half_spread,
        }
    }

    fn pnl(&self, direction: Direction, entry: f64, exit: f64, volume: f64) -> f64 {
        (exit - entry) * direction.sign() * volume * self.instrument.value_per_price_unit
    }

    fn settle(&mut self, position: OpenPosition, exit_price: f64, reason: CloseReason, closed_at: DateTime<Utc>) -> ClosedTrade {
        let pnl = self.pnl(position.direction, position.entry_price, exit_price, position.volume);
        self.balance += pnl;
        info!(
            "Paper trade {} closed by {:?} @ {:.5}: P&L {:.2}, balance {:.2}",
            position.trade_id, reason, exit_price, pnl, self.balance
        );
        let trade = ClosedTrade {
            trade_id: position.trade_id,
            direction: position.direction,
            volume: position.volume,
            entry_price: position.entry_price,
            exit_price,
            pnl,
            reason,
            closed_at,
        };

        let horizon = closed_at - Duration::days(HISTORY_DAYS);
        self.history.retain(|t| t.closed_at >= horizon);
        self.history.push(trade.clone());
        trade
    }

    /// Close the open position if a completed clock bar touched its stop loss
    /// or take profit. The stop wins when one bar touched both. A bar that
    /// opens beyond a level fills at its open.
    fn check_protective_exits(&mut self) {
        let now = self.now();
        let Some(open) = self.position.as_mut() else {
            return;
        };

        let clock = &self.bars[&self.clock_timeframe];
        let p = &open.position;
        let hit = clock
            .iter()
            .filter(|bar| bar.timestamp >= open.checked_until && bar.timestamp < now)
            .find_map(|bar| {
                // Signed so that "beyond the level" is always `>=`.
                let s = p.direction.sign();
                let (stop_hit, target_hit) = match p.direction {
                    Direction::Long => (bar.low <= p.stop_loss, bar.high >= p.take_profit),
                    Direction::Short => (bar.high >= p.stop_loss, bar.low <= p.take_profit),
                };
                let closed_at = bar.timestamp + self.clock_timeframe.duration();
                if stop_hit {
                    let price = if -s * bar.open >= -s * p.stop_loss { bar.open } else { p.stop_loss };
                    Some((price, CloseReason::StopLoss, closed_at))
                } else if target_hit {
                    let price = if s * bar.open >= s * p.take_profit { bar.open } else { p.take_profit };
                    Some((price, CloseReason::TakeProfit, closed_at))
                } else {
                    None
                }
            });
        open.checked_until = now;

        if let Some((price, reason, closed_at)) = hit {
            if let Some(open) = self.position.take() {
                let trade = self.settle(open.position, price, reason, closed_at);
                self.pending_closed.push(trade);
            }
        }
    }
}

impl Broker for PaperBroker {
    fn get_bars(&mut self, timeframe: TimeFrame, count: usize) -> Result<Vec<PriceBar>, BrokerError> {
        let now = self.now();
        let bars = self.bars.get(&timeframe).ok_or_else(|| BrokerError::DataUnavailable {
            reason: format!("no {} data loaded for {}", timeframe, self.instrument.symbol),
        })?;

        let visible = bars.partition_point(|b| b.timestamp <= now);
        if visible == 0 {
            return Err(BrokerError::DataUnavailable {
                reason: format!("no {} bars before {}", timeframe, now),
            });
        }

        let start = visible.saturating_sub(count);
        let mut out = bars[start..visible].to_vec();
        // The last visible bar is still forming at `now` unless it closed exactly at `now`.
        if let Some(last) = out.last_mut() {
            if last.timestamp + timeframe.duration() > now {
                let price = self.current_price();
                *last = PriceBar::new(last.timestamp, last.open, last.open.max(price), last.open.min(price), price, 0.0);
            }
        }
        debug!("Served {} {} bars at {}", out.len(), timeframe, now);
        Ok(out)
    }

    fn account_equity(&mut self) -> Result<f64, BrokerError> {
        let quote = self.current_quote();
        let unrealized = match &self.position {
            Some(open) => {
                let p = &open.position;
                let exit = match p.direction {
                    Direction::Long => quote.bid,
                    Direction::Short => quote.ask,
                };
                self.pnl(p.direction, p.entry_price, exit, p.volume)
            }
            None => 0.0,
        };
        Ok(self.balance + unrealized)
    }

    fn open_position(&mut self) -> Result<Option<OpenPosition>, BrokerError> {
        self.check_protective_exits();
        Ok(self.position.as_ref().map(|open| open.position.clone()))
    }

    fn quote(&mut self) -> Result<Quote, BrokerError> {
        Ok(self.current_quote())
    }

    fn submit(&mut self, order: &SizedOrder) -> Result<Fill, BrokerError> {
        if let Some(open) = &self.position {
            if open.fill.client_order_id == order.client_order_id {
                warn!("Order {} already filled, returning original fill", order.client_order_id);
                return Ok(open.fill.clone());
            }
            return Err(BrokerError::OrderRejected {
                reason: format!("position {} already open", open.position.trade_id),
            });
        }
        if order.symbol != self.instrument.symbol {
            return Err(BrokerError::OrderRejected {
                reason: format!("unknown symbol {}", order.symbol),
            });
        }

        let quote = self.current_quote();
        let price = match order.direction {
            Direction::Long => quote.ask,
            Direction::Short => quote.bid,
        };
        let now = self.now();
        let trade_id = format!("P{}", self.next_trade_id);
        self.next_trade_id += 1;

        let fill = Fill {
            trade_id: trade_id.clone(),
            client_order_id: order.client_order_id.clone(),
            direction: order.direction,
            volume: order.volume,
            price,
            timestamp: now,
        };
        let position = OpenPosition {
            trade_id,
            symbol: order.symbol.clone(),
            direction: order.direction,
            volume: order.volume,
            entry_price: price,
            stop_loss: order.stop_loss,
            take_profit: order.take_profit,
            opened_at: now,
        };
        self.position = Some(PaperPosition {
            position,
            fill: fill.clone(),
            checked_until: now,
        });
        Ok(fill)
    }

    fn close_position(&mut self, position: &OpenPosition) -> Result<ClosedTrade, BrokerError> {
        match &self.position {
            Some(open) if open.position.trade_id == position.trade_id => {}
            _ => {
                return Err(BrokerError::OrderRejected {
                    reason: format!("no open position {}", position.trade_id),
                });
            }
        }

        let quote = self.current_quote();
        let exit = match position.direction {
            Direction::Long => quote.bid,
            Direction::Short => quote.ask,
        };
        let now = self.now();
        match self.position.take() {
            Some(open) => Ok(self.settle(open.position, exit, CloseReason::Signal, now)),
            None => Err(BrokerError::OrderRejected {
                reason: format!("no open position {}", position.trade_id),
            }),
        }
    }

    fn closed_trades(&mut self) -> Result<Vec<ClosedTrade>, BrokerError> {
        self.check_protective_exits();
        Ok(std::mem::take(&mut self.pending_closed))
    }

    fn closed_trades_on(&mut self, date: NaiveDate) -> Result<Vec<ClosedTrade>, BrokerError> {
        self.check_protective_exits();
        Ok(self
            .history
            .iter()
            .filter(|t| t.closed_at.date_naive() == date)
            .cloned()
            .collect())
    }

    fn reconnect(&mut self) -> Result<(), BrokerError> {
        Ok(())
    }
}
