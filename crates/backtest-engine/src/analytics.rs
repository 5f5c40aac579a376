use std::collections::BTreeMap;

use chrono::{Local, TimeZone};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use backtest_core::money;

use crate::models::CompletedTrade;

/// Winning trades as a percentage of all trades. 0 when there are none.
pub fn win_rate(trades: &[CompletedTrade]) -> f64 {
    if trades.is_empty() {
        return 0.0;
    }
    let wins = trades.iter().filter(|t| t.pnl > Decimal::ZERO).count();
    wins as f64 / trades.len() as f64 * 100.0
}

/// Gross profit over gross loss. All-win runs are infinitely profitable;
/// a run with neither wins nor losses is flat (1.0).
pub fn profit_factor(trades: &[CompletedTrade]) -> f64 {
    let gross_profit: Decimal = trades.iter().filter(|t| t.pnl > Decimal::ZERO).map(|t| t.pnl).sum();
    let gross_loss: Decimal = trades
        .iter()
        .filter(|t| t.pnl < Decimal::ZERO)
        .map(|t| -t.pnl)
        .sum();

    if gross_loss > Decimal::ZERO {
        (gross_profit / gross_loss).to_f64().unwrap_or(0.0)
    } else if gross_profit > Decimal::ZERO {
        f64::INFINITY
    } else {
        1.0
    }
}

/// Means and extremes over the winning/losing subsets. `average_loss` is
/// reported as a positive magnitude.
#[derive(Debug, Clone, Copy, Default)]
pub struct TradeStats {
    pub average_profit: Decimal,
    pub average_loss: Decimal,
    pub best_trade: Decimal,
    pub worst_trade: Decimal,
}

pub fn trade_stats(trades: &[CompletedTrade]) -> TradeStats {
    let wins: Vec<Decimal> = trades.iter().filter(|t| t.pnl > Decimal::ZERO).map(|t| t.pnl).collect();
    let losses: Vec<Decimal> = trades.iter().filter(|t| t.pnl < Decimal::ZERO).map(|t| -t.pnl).collect();

    let average_profit = if wins.is_empty() {
        Decimal::ZERO
    } else {
        money::safe_div(wins.iter().sum(), Decimal::from(wins.len() as u64))
    };
    let average_loss = if losses.is_empty() {
        Decimal::ZERO
    } else {
        money::safe_div(losses.iter().sum(), Decimal::from(losses.len() as u64))
    };
    let best_trade = trades.iter().map(|t| t.pnl).max().unwrap_or(Decimal::ZERO);
    let worst_trade = trades.iter().map(|t| t.pnl).min().unwrap_or(Decimal::ZERO);

    TradeStats {
        average_profit,
        average_loss,
        best_trade,
        worst_trade,
    }
}

/// Maximum peak-to-trough equity decline, as a percentage of the peak.
pub fn max_drawdown_percent(equity_curve: &[Decimal]) -> f64 {
    let mut peak = f64::MIN;
    let mut max_dd = 0.0;
    for point in equity_curve {
        let equity = point.to_f64().unwrap_or(0.0);
        if equity > peak {
            peak = equity;
        }
        if peak > 0.0 {
            let dd = (peak - equity) / peak * 100.0;
            if dd > max_dd {
                max_dd = dd;
            }
        }
    }
    max_dd
}

/// Annualized Sharpe ratio over per-bar equity returns, using the sample
/// standard deviation. Zero-variance series score 0.
pub fn sharpe_ratio(equity_curve: &[Decimal], periods_per_year: f64) -> f64 {
    let returns: Vec<f64> = equity_curve
        .windows(2)
        .filter(|w| !w[0].is_zero())
        .map(|w| ((w[1] - w[0]) / w[0]).to_f64().unwrap_or(0.0))
        .collect();
    if returns.len() < 2 {
        return 0.0;
    }

    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (n - 1.0);
    let std_dev = variance.sqrt();

    if std_dev > 0.0 {
        (mean / std_dev) * periods_per_year.sqrt()
    } else {
        0.0
    }
}

/// Realized pnl of closed trades grouped by `YYYY-MM` of their exit time
/// in the system zone. BTreeMap keeps the keys sorted.
pub fn monthly_returns(trades: &[CompletedTrade]) -> BTreeMap<String, Decimal> {
    let mut months: BTreeMap<String, Decimal> = BTreeMap::new();
    for trade in trades {
        if let Some(exit) = Local.timestamp_millis_opt(trade.timestamp).single() {
            let key = exit.format("%Y-%m").to_string();
            *months.entry(key).or_insert(Decimal::ZERO) += trade.pnl;
        }
    }
    months
}

/// Observed execution cost in basis points of the traded notional.
pub fn observed_cost_bps(total_costs: Decimal, traded_notional: Decimal) -> f64 {
    money::safe_div(total_costs * Decimal::from(10_000u32), traded_notional)
        .to_f64()
        .unwrap_or(0.0)
}
