//! One decision cycle: fetch bars for the three timeframes, analyze, decide,
//! authorize, size, execute and report.

use crate::broker::Broker;
use crate::config::{StopMethod, TradingConfig};
use crate::error::{BrokerError, RiskError};
use crate::executor::OrderExecutor;
use crate::filters::EntryFilters;
use crate::market_data::{PriceBar, TimeFrame, closed_bars, swing_high, swing_low};
use crate::monitor::{CycleEvent, MonitorEvent};
use crate::orders::{ClosedTrade, Fill, OpenPosition, OrderManager, Quote};
use crate::risk::{Authorization, ProtectiveLevels, RiskManager, VetoReason, trading_date};
use crate::signals::analyzer::{AnalyzerConfig, TimeframeAnalyzer, ZoneMemory};
use crate::signals::core::{
    AnalyzerRole, Confirmation, Direction, TimeframeState, TimeframeStates, TradeAction, TradeDecision,
    TrendBias, ZoneState,
};
use crate::signals::engine::SignalEngine;
use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};

/// What a cycle ended with.
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// No confirmation bar closed since the previous cycle.
    NoNewBar,
    /// Data problem; nothing was decided or mutated.
    Skipped { reason: String },
    Held(TradeDecision),
    Vetoed {
        decision: TradeDecision,
        reason: VetoReason,
    },
    Entered {
        decision: TradeDecision,
        fill: Fill,
    },
    Exited {
        decision: TradeDecision,
        trade: ClosedTrade,
    },
    /// The broker never confirmed the order or close.
    ExecutionFailed {
        decision: TradeDecision,
        error: BrokerError,
    },
}

impl CycleOutcome {
    pub fn decision(&self) -> Option<&TradeDecision> {
        match self {
            CycleOutcome::NoNewBar | CycleOutcome::Skipped { .. } => None,
            CycleOutcome::Held(decision)
            | CycleOutcome::Vetoed { decision, .. }
            | CycleOutcome::Entered { decision, .. }
            | CycleOutcome::Exited { decision, .. }
            | CycleOutcome::ExecutionFailed { decision, .. } => Some(decision),
        }
    }
}

pub struct Trader<B: Broker> {
    config: TradingConfig,
    broker: B,
    analyzer: TimeframeAnalyzer,
    engine: SignalEngine,
    risk: Arc<Mutex<RiskManager>>,
    executor: OrderExecutor,
    filters: EntryFilters,
    orders: OrderManager,
    zone_memory: HashMap<AnalyzerRole, ZoneMemory>,
    last_confirm_bar: Option<DateTime<Utc>>,
    /// Set once today's risk state has been rebuilt from broker history.
    restored: bool,
    monitor: Option<mpsc::Sender<MonitorEvent>>,
}

impl<B: Broker> Trader<B> {
    pub fn new(config: TradingConfig, broker: B, today: NaiveDate) -> Self {
        let risk = RiskManager::new(config.risk.clone(), config.instrument.clone(), today);
        Self {
            analyzer: TimeframeAnalyzer::new(AnalyzerConfig::from(&config.strategy)),
            engine: SignalEngine::new(),
            risk: Arc::new(Mutex::new(risk)),
            executor: OrderExecutor::new(&config.execution),
            filters: EntryFilters::new(config.filters.clone(), config.instrument.point),
            orders: OrderManager::new(),
            zone_memory: HashMap::new(),
            last_confirm_bar: None,
            restored: false,
            monitor: None,
            config,
            broker,
        }
    }

    pub fn with_monitor(mut self, tx: mpsc::Sender<MonitorEvent>) -> Self {
        self.monitor = Some(tx);
        self
    }

    pub fn broker(&self) -> &B {
        &self.broker
    }

    pub fn broker_mut(&mut self) -> &mut B {
        &mut self.broker
    }

    pub fn risk(&self) -> Arc<Mutex<RiskManager>> {
        Arc::clone(&self.risk)
    }

    pub fn orders(&self) -> &OrderManager {
        &self.orders
    }

    pub fn zone_memory(&self, role: AnalyzerRole) -> ZoneMemory {
        self.zone_memory.get(&role).copied().unwrap_or_default()
    }

    pub async fn run_cycle(&mut self, now: DateTime<Utc>) -> Result<CycleOutcome> {
        let today = trading_date(now);
        if self.risk.lock().await.roll_day(today) {
            self.orders.prune_settled();
        }
        if !self.restored {
            self.restore_day(today).await;
        }
        self.sync_closed_trades().await?;

        let confirm_timeframe = self.config.strategy.confirm_timeframe;
        let timeframes = [
            (AnalyzerRole::Trend, self.config.strategy.trend_timeframe),
            (AnalyzerRole::EntryZone, self.config.strategy.zone_timeframe),
            (AnalyzerRole::Confirmation, confirm_timeframe),
        ];

        let mut bars: HashMap<AnalyzerRole, Vec<PriceBar>> = HashMap::new();
        for (role, timeframe) in timeframes {
            match self.fetch_bars(timeframe) {
                Ok(fetched) => {
                    bars.insert(role, fetched);
                }
                Err(e @ BrokerError::DataUnavailable { .. }) => {
                    warn!("Skipping cycle, {} data unavailable: {}", timeframe, e);
                    return Ok(CycleOutcome::Skipped { reason: e.to_string() });
                }
                Err(e) => return Err(e.into()),
            }
        }

        let confirm_bars = bars.remove(&AnalyzerRole::Confirmation).unwrap_or_default();
        let latest = confirm_bars.last().map(|b| b.timestamp);
        if latest.is_some() && latest == self.last_confirm_bar {
            debug!("No new {} bar since {:?}", confirm_timeframe, latest);
            return Ok(CycleOutcome::NoNewBar);
        }

        let trend_bars = bars.remove(&AnalyzerRole::Trend).unwrap_or_default();
        let zone_bars = bars.remove(&AnalyzerRole::EntryZone).unwrap_or_default();
        let states = match self.analyze(&trend_bars, &zone_bars, &confirm_bars) {
            Ok(states) => states,
            Err(e) => {
                warn!("Skipping cycle: {}", e);
                return Ok(CycleOutcome::Skipped { reason: e.to_string() });
            }
        };
        self.last_confirm_bar = latest;

        let position = self.broker.open_position()?;
        let decision = self.engine.decide(
            states.trend,
            states.zone,
            states.confirmation,
            position.as_ref().map(|p| p.direction),
            now,
        );
        info!(
            "{} cycle @ {}: trend={:?} zone={:?} confirm={:?} -> {:?}",
            self.config.instrument.symbol, now, states.trend, states.zone, states.confirmation, decision.action
        );

        let (outcome, authorization) = match (decision.action, position) {
            (TradeAction::Exit, Some(position)) => self.exit(decision, position).await,
            (TradeAction::EnterLong | TradeAction::EnterShort, None) => {
                self.enter(decision, &confirm_bars, now).await?
            }
            _ => (CycleOutcome::Held(decision), None),
        };

        if let Some(final_decision) = outcome.decision() {
            self.notify(MonitorEvent::Cycle(CycleEvent {
                states,
                decision: final_decision.clone(),
                authorization,
            }))
            .await;
        }
        Ok(outcome)
    }

    fn fetch_bars(&mut self, timeframe: TimeFrame) -> Result<Vec<PriceBar>, BrokerError> {
        let bars = self.broker.get_bars(timeframe, self.config.strategy.bar_count)?;
        if self.config.strategy.exclude_forming_bar {
            Ok(closed_bars(&bars).to_vec())
        } else {
            Ok(bars)
        }
    }

    fn analyze(
        &mut self,
        trend_bars: &[PriceBar],
        zone_bars: &[PriceBar],
        confirm_bars: &[PriceBar],
    ) -> Result<TimeframeStates, crate::error::SignalError> {
        let mut trend = TrendBias::Neutral;
        let mut zone = ZoneState::OutOfZone;
        let mut confirmation = Confirmation::None;
        let mut updated = Vec::with_capacity(3);

        for (role, role_bars) in [
            (AnalyzerRole::Trend, trend_bars),
            (AnalyzerRole::EntryZone, zone_bars),
            (AnalyzerRole::Confirmation, confirm_bars),
        ] {
            let (state, memory) = self.analyzer.analyze(role_bars, role, self.zone_memory(role))?;
            match state {
                TimeframeState::Trend(t) => trend = t,
                TimeframeState::Zone(z) => zone = z,
                TimeframeState::Confirm(c) => confirmation = c,
            }
            updated.push((role, memory));
        }

        // Memory is only committed once every role produced a state.
        self.zone_memory.extend(updated);
        Ok(TimeframeStates {
            trend,
            zone,
            confirmation,
        })
    }

    async fn enter(
        &mut self,
        decision: TradeDecision,
        confirm_bars: &[PriceBar],
        now: DateTime<Utc>,
    ) -> Result<(CycleOutcome, Option<Authorization>)> {
        let Some(direction) = decision.action.entry_direction() else {
            return Ok((CycleOutcome::Held(decision), None));
        };

        let quote = self.broker.quote()?;
        if let Err(block) = self.filters.check(now, &quote) {
            info!("Entry {:?} blocked by {:?}", decision.action, block);
            return Ok((CycleOutcome::Held(decision.demoted(block.rule_name())), None));
        }

        let Some(levels) = self.protective_levels(direction, confirm_bars, &quote) else {
            warn!("No valid stop loss for {:?} entry, holding", direction);
            return Ok((CycleOutcome::Held(decision.demoted("no_valid_stop")), None));
        };

        let mut risk = self.risk.lock().await;
        let authorization = risk.authorize(decision.clone());
        if let Authorization::Vetoed { decision, reason } = &authorization {
            let outcome = CycleOutcome::Vetoed {
                decision: decision.demoted("risk_veto"),
                reason: *reason,
            };
            return Ok((outcome, Some(authorization)));
        }

        let equity = self.broker.account_equity()?;
        let client_order_id = self.orders.next_client_order_id(&self.config.instrument.symbol);
        let order = match risk.build_order(client_order_id, &self.config.instrument.symbol, &decision, equity, levels) {
            Ok(order) => order,
            Err(RiskError::InvalidSizing { reason }) => {
                warn!("Sizing failed, check risk and instrument configuration: {}", reason);
                return Ok((CycleOutcome::Held(decision.demoted("invalid_sizing")), Some(authorization)));
            }
            Err(e) => return Err(e.into()),
        };
        drop(risk);

        self.orders.record(&order);
        match self.executor.submit(&mut self.broker, &order).await {
            Ok(fill) => {
                self.orders.mark_filled(&order.client_order_id, &fill.trade_id)?;
                self.notify(MonitorEvent::TradeOpened {
                    fill: fill.clone(),
                    stop_loss: order.stop_loss,
                    take_profit: order.take_profit,
                })
                .await;
                Ok((CycleOutcome::Entered { decision, fill }, Some(authorization)))
            }
            Err(error) => {
                self.orders.mark_rejected(&order.client_order_id)?;
                Ok((CycleOutcome::ExecutionFailed { decision, error }, Some(authorization)))
            }
        }
    }

    async fn exit(&mut self, decision: TradeDecision, position: OpenPosition) -> (CycleOutcome, Option<Authorization>) {
        let authorization = self.risk.lock().await.authorize(decision.clone());

        match self.executor.close(&mut self.broker, &position).await {
            Ok(trade) => {
                self.record_outcome(&trade).await;
                (CycleOutcome::Exited { decision, trade }, Some(authorization))
            }
            Err(error) => {
                error!("Could not close trade {}: {}", position.trade_id, error);
                (CycleOutcome::ExecutionFailed { decision, error }, Some(authorization))
            }
        }
    }

    /// Stop from the configured method, take profit at `tp_rr` stop distances.
    fn protective_levels(&self, direction: Direction, confirm_bars: &[PriceBar], quote: &Quote) -> Option<ProtectiveLevels> {
        let strategy = &self.config.strategy;
        let entry = match direction {
            Direction::Long => quote.ask,
            Direction::Short => quote.bid,
        };

        let stop = match strategy.stop_method {
            StopMethod::Swing => match direction {
                Direction::Long => swing_low(confirm_bars, strategy.swing_lookback)?,
                Direction::Short => swing_high(confirm_bars, strategy.swing_lookback)?,
            },
            StopMethod::FixedPoints => {
                entry - direction.sign() * strategy.sl_points * self.config.instrument.point
            }
        };

        let on_loss_side = match direction {
            Direction::Long => stop < entry,
            Direction::Short => stop > entry,
        };
        on_loss_side.then(|| ProtectiveLevels::from_stop(direction, entry, stop, strategy.tp_rr))
    }

    /// Seed the risk state from trades the broker already closed today, so a
    /// restart mid-day keeps the day's P&L, loss streak and halt. A failed
    /// lookup is retried on the next cycle.
    async fn restore_day(&mut self, today: NaiveDate) {
        let history = match self.broker.closed_trades_on(today) {
            Ok(history) => history,
            Err(e) => {
                warn!("Could not load closed trades for {}: {}", today, e);
                return;
            }
        };
        self.restored = true;

        let halted = self.risk.lock().await.restore_day(today, &history).is_halted;
        if halted {
            self.notify(MonitorEvent::Alert(format!(
                "Trading halted for {} after restoring {} closed trade(s)",
                today,
                history.len()
            )))
            .await;
        }
    }

    async fn sync_closed_trades(&mut self) -> Result<()> {
        for trade in self.broker.closed_trades()? {
            self.record_outcome(&trade).await;
        }
        Ok(())
    }

    async fn record_outcome(&mut self, trade: &ClosedTrade) {
        let result = {
            let mut risk = self.risk.lock().await;
            let was_halted = risk.state().is_halted;
            risk.report_outcome(trade).map(|state| state.is_halted && !was_halted)
        };
        match result {
            Ok(newly_halted) => {
                self.notify(MonitorEvent::TradeClosed(trade.clone())).await;
                if newly_halted {
                    self.notify(MonitorEvent::Alert(format!(
                        "Trading halted for the day after trade {}",
                        trade.trade_id
                    )))
                    .await;
                }
            }
            Err(e) => debug!("{}", e),
        }
    }

    async fn notify(&self, event: MonitorEvent) {
        if let Some(tx) = &self.monitor {
            if tx.send(event).await.is_err() {
                warn!("Monitor channel closed, dropping event");
            }
        }
    }
}
