use mtftrader::broker::Broker;
use mtftrader::config::TradingConfig;
use mtftrader::monitor::{Monitor, MonitorEvent};
use mtftrader::paper::PaperBroker;
use mtftrader::risk::trading_date;
use mtftrader::trader::{CycleOutcome, Trader};

use anyhow::Result;
use log::{debug, error, info, warn};
use std::env;
use tokio::sync::mpsc;
use tokio::time::{Duration, interval};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logger with default info level if RUST_LOG not set
    if std::env::var("RUST_LOG").is_err() {
        unsafe {
            std::env::set_var("RUST_LOG", "info");
        }
    }
    env_logger::init();
    info!("Starting multi-timeframe trader");

    // Get config file from command line argument or use default
    let args: Vec<String> = env::args().collect();
    let config_file = if args.len() > 1 { &args[1] } else { "config.json" };

    info!("Loading configuration from: {}", config_file);
    let config = TradingConfig::load_from_file(config_file)?;
    let strategy = &config.strategy;
    info!(
        "{}: trend {} / zone {} / confirm {}, risk {:.2}% per trade, daily loss limit {:.2}",
        config.instrument.symbol,
        strategy.trend_timeframe,
        strategy.zone_timeframe,
        strategy.confirm_timeframe,
        config.risk.risk_pct * 100.0,
        config.risk.daily_loss_limit
    );

    let broker = PaperBroker::from_dir(
        config.instrument.clone(),
        &config.paper,
        &[strategy.trend_timeframe, strategy.zone_timeframe, strategy.confirm_timeframe],
        strategy.confirm_timeframe,
    )?;

    let (tx, rx) = mpsc::channel::<MonitorEvent>(1000);
    let retention_hours = config.monitor.summary_interval_hours.max(24);
    let monitor_task = tokio::spawn(Monitor::new(&config.instrument.symbol, retention_hours).run(rx));

    let today = trading_date(broker.now());
    let mut trader = Trader::new(config.clone(), broker, today).with_monitor(tx.clone());

    info!("Starting trading loop...");

    let mut trading_interval = interval(Duration::from_secs(config.execution.poll_interval_secs));
    // Summaries follow the replay clock so their window matches trade close times.
    let summary_every = chrono::Duration::hours(config.monitor.summary_interval_hours as i64);
    let mut last_summary = trader.broker().now();
    let mut heartbeat_interval = interval(Duration::from_secs(config.monitor.heartbeat_interval_minutes * 60));

    loop {
        tokio::select! {
            _ = trading_interval.tick() => {
                let now = trader.broker().now();
                match trader.run_cycle(now).await {
                    Ok(CycleOutcome::NoNewBar) => debug!("No new bar at {}", now),
                    Ok(outcome) => debug!("Cycle outcome: {:?}", outcome),
                    Err(e) => error!("Cycle at {} failed: {}", now, e),
                }

                if now - last_summary >= summary_every {
                    let event = MonitorEvent::Summary {
                        now,
                        hours: config.monitor.summary_interval_hours,
                    };
                    if tx.send(event).await.is_err() {
                        warn!("Monitor channel closed");
                    }
                    last_summary = now;
                }

                if trader.broker_mut().advance().is_none() {
                    info!("Replay data exhausted");
                    break;
                }
            }
            _ = heartbeat_interval.tick() => {
                match trader.broker_mut().account_equity() {
                    Ok(equity) => {
                        if tx.send(MonitorEvent::Heartbeat { equity }).await.is_err() {
                            warn!("Monitor channel closed");
                        }
                    }
                    Err(e) => warn!("Could not read account equity for heartbeat: {}", e),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down...");
                break;
            }
        }
    }

    let state = trader.risk().lock().await.state().clone();
    info!(
        "Final state for {}: day P&L {:.2}, consecutive losses {}, halted {}, balance {:.2}",
        state.trading_date,
        state.realized_pnl_today,
        state.consecutive_losses,
        state.is_halted,
        trader.broker().balance()
    );

    let closing = MonitorEvent::Summary {
        now: trader.broker().now(),
        hours: retention_hours,
    };
    if tx.send(closing).await.is_err() {
        warn!("Monitor channel closed before the closing summary");
    }
    drop(tx);
    drop(trader);
    if let Err(e) = monitor_task.await {
        error!("Monitor task failed: {}", e);
    }

    Ok(())
}
