use std::collections::{HashMap, VecDeque};

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use backtest_core::{money, TradeFill, TradeSide};

/// A synthesized round trip: one BUY lot (or part of one) matched with a
/// later SELL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundTrip {
    pub pair: String,
    pub entry_price: Decimal,
    pub exit_price: Decimal,
    pub volume: Decimal,
    pub pnl: Decimal,
    pub entry_time: i64,
    pub exit_time: i64,
}

/// Pair SELL fills against open BUY lots first-in-first-out, splitting
/// partial lots. SELL volume with no matching lot is ignored.
pub fn fifo_pair(fills: &[TradeFill]) -> Vec<RoundTrip> {
    let mut open_lots: HashMap<&str, VecDeque<(Decimal, Decimal, i64)>> = HashMap::new();
    let mut trips = Vec::new();

    for fill in fills {
        match fill.side {
            TradeSide::Buy => {
                open_lots
                    .entry(fill.pair.as_str())
                    .or_default()
                    .push_back((fill.price, fill.volume, fill.timestamp));
            }
            TradeSide::Sell => {
                let Some(lots) = open_lots.get_mut(fill.pair.as_str()) else {
                    continue;
                };
                let mut remaining = fill.volume;
                while remaining > Decimal::ZERO {
                    let Some(lot) = lots.front_mut() else {
                        break;
                    };
                    let matched = remaining.min(lot.1);
                    trips.push(RoundTrip {
                        pair: fill.pair.clone(),
                        entry_price: lot.0,
                        exit_price: fill.price,
                        volume: matched,
                        pnl: money::round((fill.price - lot.0) * matched),
                        entry_time: lot.2,
                        exit_time: fill.timestamp,
                    });
                    lot.1 -= matched;
                    remaining -= matched;
                    if lot.1.is_zero() {
                        lots.pop_front();
                    }
                }
            }
        }
    }
    trips
}

/// Per-strategy realized performance synthesized from raw fills.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyPerformance {
    pub strategy_id: String,
    pub round_trips: i32,
    pub winning_trips: i32,
    pub win_rate: f64,
    pub realized_pnl: Decimal,
    pub profit_factor: f64,
}

pub fn strategy_performance(strategy_id: &str, fills: &[TradeFill]) -> StrategyPerformance {
    let trips = fifo_pair(fills);
    let winning = trips.iter().filter(|t| t.pnl > Decimal::ZERO).count();
    let gross_profit: Decimal = trips.iter().filter(|t| t.pnl > Decimal::ZERO).map(|t| t.pnl).sum();
    let gross_loss: Decimal = trips.iter().filter(|t| t.pnl < Decimal::ZERO).map(|t| -t.pnl).sum();

    let win_rate = if trips.is_empty() {
        0.0
    } else {
        winning as f64 / trips.len() as f64 * 100.0
    };
    let profit_factor = if gross_loss > Decimal::ZERO {
        (gross_profit / gross_loss).to_f64().unwrap_or(0.0)
    } else if gross_profit > Decimal::ZERO {
        f64::INFINITY
    } else {
        1.0
    };

    StrategyPerformance {
        strategy_id: strategy_id.to_string(),
        round_trips: trips.len() as i32,
        winning_trips: winning as i32,
        win_rate,
        realized_pnl: trips.iter().map(|t| t.pnl).sum(),
        profit_factor,
    }
}
