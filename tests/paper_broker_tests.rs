use anyhow::Result;
use chrono::{DateTime, Utc};
use mtftrader::broker::Broker;
use mtftrader::config::{PaperConfig, StopMethod, TradingConfig};
use mtftrader::error::BrokerError;
use mtftrader::market_data::TimeFrame;
use mtftrader::paper::{PaperBroker, load_bars};
use mtftrader::trader::{CycleOutcome, Trader};
use std::fs;
use std::path::Path;

const START: i64 = 1_709_510_400; // 2024-03-04 00:00:00 UTC

/// Write `<symbol>_<TF>.csv` with a wave-shaped close series.
fn write_bars(dir: &Path, symbol: &str, timeframe: TimeFrame, count: usize) -> Result<()> {
    let step = timeframe.duration().num_seconds();
    let mut csv = String::from("timestamp,open,high,low,close,volume\n");
    let mut prev: f64 = 2000.0;
    for i in 0..count {
        let close = 2000.0 + 15.0 * ((i as f64) / 6.0).sin() + 0.2 * i as f64;
        let high = prev.max(close) + 1.0;
        let low = prev.min(close) - 1.0;
        csv.push_str(&format!("{},{:.2},{:.2},{:.2},{:.2},100\n", START + i as i64 * step, prev, high, low, close));
        prev = close;
    }
    fs::write(dir.join(format!("{}_{}.csv", symbol, timeframe)), csv)?;
    Ok(())
}

fn config(dir: &Path) -> TradingConfig {
    let mut config = TradingConfig::default();
    config.instrument.symbol = "XAUUSD".to_string();
    config.strategy.rsi_period = 5;
    config.strategy.wma_period = 10;
    config.strategy.ema_period = 4;
    config.strategy.bar_count = 60;
    config.strategy.zone_band_pct = 0.01;
    config.strategy.zone_exit_pct = 0.02;
    config.strategy.stop_method = StopMethod::FixedPoints;
    config.execution.retry_delay_ms = 0;
    config.paper = PaperConfig {
        data_dir: dir.to_path_buf(),
        starting_balance: 10_000.0,
        spread_points: 20.0,
    };
    config
}

#[cfg(test)]
mod paper_broker_tests {
    use super::*;

    #[test]
    fn test_load_bars_parses_and_sorts() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("XAUUSD_M15.csv");
        fs::write(
            &path,
            "timestamp,open,high,low,close,volume\n\
             1709511300,2001,2003,2000,2002,5\n\
             1709510400,2000,2002,1999,2001,7\n",
        )?;

        let bars = load_bars(&path)?;
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].timestamp, DateTime::<Utc>::from_timestamp(1_709_510_400, 0).unwrap());
        assert_eq!(bars[0].close, 2001.0);
        assert_eq!(bars[1].volume, 5.0);
        Ok(())
    }

    #[test]
    fn test_missing_file_is_data_unavailable() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let config = config(dir.path());
        let result = PaperBroker::from_dir(config.instrument, &config.paper, &[TimeFrame::M15], TimeFrame::M15);
        assert!(matches!(result, Err(BrokerError::DataUnavailable { .. })));
        Ok(())
    }

    #[test]
    fn test_bars_never_leak_the_future() -> Result<()> {
        let dir = tempfile::tempdir()?;
        write_bars(dir.path(), "XAUUSD", TimeFrame::M15, 40)?;
        write_bars(dir.path(), "XAUUSD", TimeFrame::H1, 10)?;
        let config = config(dir.path());
        let mut broker = PaperBroker::from_dir(
            config.instrument,
            &config.paper,
            &[TimeFrame::M15, TimeFrame::H1],
            TimeFrame::M15,
        )?;

        for _ in 0..9 {
            broker.advance();
        }
        let now = broker.now();
        for timeframe in [TimeFrame::M15, TimeFrame::H1] {
            let bars = broker.get_bars(timeframe, 100)?;
            assert!(bars.iter().all(|b| b.timestamp <= now));
        }

        let quote = broker.quote()?;
        assert!((quote.spread() - 0.2).abs() < 1e-9);
        Ok(())
    }

    #[tokio::test]
    async fn test_trader_replays_csv_history() -> Result<()> {
        let dir = tempfile::tempdir()?;
        write_bars(dir.path(), "XAUUSD", TimeFrame::M15, 400)?;
        write_bars(dir.path(), "XAUUSD", TimeFrame::H1, 100)?;
        write_bars(dir.path(), "XAUUSD", TimeFrame::H4, 25)?;
        let config = config(dir.path());
        config.validate()?;

        let s = &config.strategy;
        let broker = PaperBroker::from_dir(
            config.instrument.clone(),
            &config.paper,
            &[s.trend_timeframe, s.zone_timeframe, s.confirm_timeframe],
            s.confirm_timeframe,
        )?;
        let today = broker.now().date_naive();
        let mut trader = Trader::new(config.clone(), broker, today);

        let mut decided = 0;
        loop {
            let now = trader.broker().now();
            let outcome = trader.run_cycle(now).await?;
            assert!(!matches!(outcome, CycleOutcome::ExecutionFailed { .. }));
            if outcome.decision().is_some() {
                decided += 1;
            }
            if trader.broker_mut().advance().is_none() {
                break;
            }
        }

        assert!(decided > 0);
        assert!(trader.broker().balance().is_finite());
        let risk = trader.risk();
        let state = risk.lock().await.state().clone();
        assert!(state.realized_pnl_today.is_finite());
        Ok(())
    }
}
