use anyhow::{Result, anyhow};
use statrs::statistics::Statistics;

/// Largest peak-to-trough fall of an equity curve, in the curve's units.
pub fn max_drawdown(equity: &[f64]) -> Result<f64> {
    if equity.is_empty() {
        return Err(anyhow!("Cannot calculate max drawdown for empty series"));
    }

    let mut peak = equity[0];
    let mut max_dd = 0.0;

    for &value in equity.iter().skip(1) {
        if value > peak {
            peak = value;
        }
        let drawdown = peak - value;
        if drawdown > max_dd {
            max_dd = drawdown;
        }
    }

    Ok(max_dd)
}

/// Share of trades with a positive P&L.
pub fn win_rate(pnls: &[f64]) -> Result<f64> {
    if pnls.is_empty() {
        return Err(anyhow!("Cannot calculate win rate without trades"));
    }

    let wins = pnls.iter().filter(|&&p| p > 0.0).count();
    Ok(wins as f64 / pnls.len() as f64)
}

/// Gross profits over gross losses.
pub fn profit_factor(pnls: &[f64]) -> Result<f64> {
    let gross_profits: f64 = pnls.iter().filter(|&&p| p > 0.0).sum();
    let gross_losses: f64 = pnls.iter().filter(|&&p| p < 0.0).map(|p| p.abs()).sum();

    if gross_losses == 0.0 {
        return Ok(f64::INFINITY);
    }

    Ok(gross_profits / gross_losses)
}

/// Summary of a batch of closed trades.
#[derive(Debug, Clone, PartialEq)]
pub struct TradeStats {
    pub trades: usize,
    pub wins: usize,
    pub losses: usize,
    pub total_pnl: f64,
    pub average_pnl: f64,
    pub pnl_std_dev: f64,
    pub win_rate: f64,
    pub profit_factor: f64,
    pub max_drawdown: f64,
}

impl TradeStats {
    pub fn calculate(pnls: &[f64]) -> Result<Self> {
        if pnls.is_empty() {
            return Err(anyhow!("Cannot calculate trade stats without trades"));
        }

        let mut equity = Vec::with_capacity(pnls.len() + 1);
        equity.push(0.0);
        let mut running = 0.0;
        for &p in pnls {
            running += p;
            equity.push(running);
        }

        let pnl_std_dev = if pnls.len() > 1 { pnls.std_dev() } else { 0.0 };

        Ok(TradeStats {
            trades: pnls.len(),
            wins: pnls.iter().filter(|&&p| p > 0.0).count(),
            losses: pnls.iter().filter(|&&p| p < 0.0).count(),
            total_pnl: running,
            average_pnl: pnls.mean(),
            pnl_std_dev,
            win_rate: win_rate(pnls)?,
            profit_factor: profit_factor(pnls)?,
            max_drawdown: max_drawdown(&equity)?,
        })
    }
}
