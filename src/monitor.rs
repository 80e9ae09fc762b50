//! Decision and outcome reporting.
//!
//! The trader pushes [`MonitorEvent`]s over an mpsc channel; the monitor task
//! turns them into log lines, alerts and periodic summaries.

use crate::orders::{ClosedTrade, Fill};
use crate::risk::Authorization;
use crate::signals::core::{TimeframeStates, TradeAction, TradeDecision};
use crate::stats::TradeStats;
use chrono::{DateTime, Duration, Utc};
use log::{debug, info, warn};
use tokio::sync::mpsc;

/// Everything one cycle produced.
#[derive(Debug, Clone)]
pub struct CycleEvent {
    pub states: TimeframeStates,
    pub decision: TradeDecision,
    pub authorization: Option<Authorization>,
}

#[derive(Debug, Clone)]
pub enum MonitorEvent {
    Cycle(CycleEvent),
    Alert(String),
    TradeOpened { fill: Fill, stop_loss: f64, take_profit: f64 },
    TradeClosed(ClosedTrade),
    Heartbeat { equity: f64 },
    Summary { now: DateTime<Utc>, hours: u64 },
}

pub struct Monitor {
    symbol: String,
    /// Closed trades younger than `retention`, oldest first.
    closed: Vec<ClosedTrade>,
    retention: Duration,
    alert_count: usize,
    last_alert: Option<String>,
}

impl Monitor {
    /// `retention_hours` bounds how far back a summary can look.
    pub fn new(symbol: &str, retention_hours: u64) -> Self {
        Self {
            symbol: symbol.to_string(),
            closed: Vec::new(),
            retention: Duration::hours(retention_hours as i64),
            alert_count: 0,
            last_alert: None,
        }
    }

    pub async fn run(mut self, mut rx: mpsc::Receiver<MonitorEvent>) {
        info!("Monitor started for {}", self.symbol);
        while let Some(event) = rx.recv().await {
            self.handle(event);
        }
        info!(
            "Monitor channel closed, {} alerts raised, {} trades retained",
            self.alert_count,
            self.closed.len()
        );
    }

    pub fn handle(&mut self, event: MonitorEvent) {
        match event {
            MonitorEvent::Cycle(cycle) => self.on_cycle(&cycle),
            MonitorEvent::Alert(message) => self.alert(message),
            MonitorEvent::TradeOpened {
                fill,
                stop_loss,
                take_profit,
            } => {
                info!(
                    "TRADE EXECUTED {} {:?} {} @ {:.5} SL {:.5} TP {:.5} (trade {})",
                    self.symbol, fill.direction, fill.volume, fill.price, stop_loss, take_profit, fill.trade_id
                );
            }
            MonitorEvent::TradeClosed(trade) => {
                info!(
                    "TRADE CLOSED {} {:?} by {:?} @ {:.5}: P&L {:.2} (trade {})",
                    self.symbol, trade.direction, trade.reason, trade.exit_price, trade.pnl, trade.trade_id
                );
                let horizon = trade.closed_at - self.retention;
                self.closed.retain(|t| t.closed_at > horizon);
                self.closed.push(trade);
            }
            MonitorEvent::Heartbeat { equity } => {
                info!("Heartbeat: alive, equity {:.2}", equity);
            }
            MonitorEvent::Summary { now, hours } => {
                self.summary(now, hours);
            }
        }
    }

    fn on_cycle(&mut self, cycle: &CycleEvent) {
        debug!(
            "Cycle states: trend={:?} zone={:?} confirm={:?}",
            cycle.states.trend, cycle.states.zone, cycle.states.confirmation
        );

        match &cycle.authorization {
            Some(Authorization::Vetoed { decision, reason }) => {
                self.alert(format!("{:?} vetoed on {}: {}", decision.action, self.symbol, reason));
            }
            _ if cycle.decision.action != TradeAction::Hold => {
                info!("Decision {:?} via {}", cycle.decision.action, cycle.decision.rule);
            }
            _ => {}
        }
    }

    fn alert(&mut self, message: String) {
        warn!("ALERT: {}", message);
        self.alert_count += 1;
        self.last_alert = Some(message);
    }

    /// Stats over trades closed in the last `hours`, capped at the retention window.
    pub fn summary(&self, now: DateTime<Utc>, hours: u64) -> Option<TradeStats> {
        let since = now - Duration::hours(hours as i64);
        let pnls: Vec<f64> = self
            .closed
            .iter()
            .filter(|t| t.closed_at > since && t.closed_at <= now)
            .map(|t| t.pnl)
            .collect();

        match TradeStats::calculate(&pnls) {
            Ok(stats) => {
                info!(
                    "SUMMARY ({}h) {}: trades {}, win/loss {}/{}, win rate {:.1}%, profit factor {:.2}, P&L {:.2}, max drawdown {:.2}",
                    hours,
                    self.symbol,
                    stats.trades,
                    stats.wins,
                    stats.losses,
                    stats.win_rate * 100.0,
                    stats.profit_factor,
                    stats.total_pnl,
                    stats.max_drawdown
                );
                Some(stats)
            }
            Err(_) => {
                info!("SUMMARY ({}h) {}: no closed trades", hours, self.symbol);
                None
            }
        }
    }

    pub fn alert_count(&self) -> usize {
        self.alert_count
    }

    pub fn last_alert(&self) -> Option<&str> {
        self.last_alert.as_deref()
    }

    pub fn closed_trades(&self) -> &[ClosedTrade] {
        &self.closed
    }
}
