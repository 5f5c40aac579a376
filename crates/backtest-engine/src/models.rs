use std::collections::BTreeMap;

use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use backtest_core::{BacktestError, DataTier, Strategy, Timeframe};

/// How an order crosses the book. Maker rests, taker crosses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ExecutionType {
    Maker,
    Taker,
}

/// Trading cost configuration. All rate fields are percent units
/// (0.26 means 0.26%, not a fraction). Defaults model Kraken spot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostModelConfig {
    pub maker_fee: Decimal,
    pub taker_fee: Decimal,
    pub slippage_percent: Decimal,
    /// Full round-trip spread; a single fill crosses half of it.
    pub spread_percent: Decimal,
    pub use_realistic_slippage: bool,
    pub use_tiered_fees: bool,
}

impl Default for CostModelConfig {
    fn default() -> Self {
        Self {
            maker_fee: dec!(0.16),
            taker_fee: dec!(0.26),
            slippage_percent: dec!(0.05),
            spread_percent: dec!(0.02),
            use_realistic_slippage: true,
            use_tiered_fees: false,
        }
    }
}

impl CostModelConfig {
    /// Baseline cost assumption attached to every result: flat taker fee
    /// plus half-spread, in basis points. The tiered and size-scaled
    /// machinery never feeds this number.
    pub fn assumed_cost_bps(&self) -> f64 {
        use rust_decimal::prelude::ToPrimitive;
        let percent = self.taker_fee + self.spread_percent / dec!(2);
        (percent * dec!(100)).to_f64().unwrap_or(0.0)
    }
}

/// Cost breakdown for one prospective fill. Percent fields are percent
/// units; `spread_percent` is the half-spread actually crossed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeCost {
    pub fee: Decimal,
    pub slippage_amount: Decimal,
    pub slippage_percent: Decimal,
    pub spread_cost: Decimal,
    pub spread_percent: Decimal,
    pub total: Decimal,
    pub total_percent: Decimal,
}

/// An open long position tracked by the simulation engine.
#[derive(Debug, Clone)]
pub struct Position {
    pub pair: String,
    pub entry_price: Decimal,
    pub volume: Decimal,
    pub stop_loss_price: Option<Decimal>,
    pub take_profit_price: Option<Decimal>,
    pub entry_costs: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExitReason {
    StopLoss,
    TakeProfit,
    StrategySignal,
    BacktestEnd,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::StopLoss => "STOP_LOSS",
            ExitReason::TakeProfit => "TAKE_PROFIT",
            ExitReason::StrategySignal => "STRATEGY_SIGNAL",
            ExitReason::BacktestEnd => "BACKTEST_END",
        }
    }
}

/// A closed round trip. `timestamp` is the exit time in ms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletedTrade {
    pub timestamp: i64,
    pub pair: String,
    pub entry_price: Decimal,
    pub exit_price: Decimal,
    pub volume: Decimal,
    pub pnl: Decimal,
    pub entry_costs: Decimal,
    pub exit_costs: Decimal,
    pub reason: ExitReason,
}

/// Result of a completed (or diagnosed) backtest run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestResult {
    pub strategy_id: String,
    pub strategy_name: String,
    pub pair: String,
    pub starting_balance: Decimal,
    pub ending_balance: Decimal,
    /// Realized P&L over all closed trades.
    pub total_pnl: Decimal,
    pub total_pnl_percent: f64,
    pub total_trades: i32,
    pub winning_trades: i32,
    pub losing_trades: i32,
    /// 0-100.
    pub win_rate: f64,
    pub profit_factor: f64,
    pub sharpe_ratio: f64,
    /// Peak-to-trough equity decline, percent.
    pub max_drawdown: f64,
    pub average_profit: Decimal,
    pub average_loss: Decimal,
    pub best_trade: Decimal,
    pub worst_trade: Decimal,
    /// Realized pnl of closed trades grouped by `YYYY-MM` of exit time.
    pub monthly_returns: BTreeMap<String, Decimal>,
    pub trades: Vec<CompletedTrade>,
    /// One point per bar, seeded with the starting balance.
    pub equity_curve: Vec<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_tier: Option<DataTier>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_quality_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeframe: Option<Timeframe>,
    pub total_fees: Decimal,
    pub total_slippage: Decimal,
    /// (total costs / total traded notional) x 10_000.
    pub observed_cost_bps: f64,
    pub assumed_cost_bps: f64,
    pub cost_delta_bps: f64,
}

impl BacktestResult {
    /// Zero-trade result seeded from the run inputs. The equity curve
    /// starts (and, for diagnostic results, ends) at the starting balance.
    pub fn empty(strategy: &Strategy, pair: &str, starting_balance: Decimal, assumed_cost_bps: f64) -> Self {
        Self {
            strategy_id: strategy.id.clone(),
            strategy_name: strategy.name.clone(),
            pair: pair.to_string(),
            starting_balance,
            ending_balance: starting_balance,
            total_pnl: Decimal::ZERO,
            total_pnl_percent: 0.0,
            total_trades: 0,
            winning_trades: 0,
            losing_trades: 0,
            win_rate: 0.0,
            profit_factor: 1.0,
            sharpe_ratio: 0.0,
            max_drawdown: 0.0,
            average_profit: Decimal::ZERO,
            average_loss: Decimal::ZERO,
            best_trade: Decimal::ZERO,
            worst_trade: Decimal::ZERO,
            monthly_returns: BTreeMap::new(),
            trades: Vec::new(),
            equity_curve: vec![starting_balance],
            validation_error: None,
            data_tier: None,
            data_quality_score: None,
            timeframe: None,
            total_fees: Decimal::ZERO,
            total_slippage: Decimal::ZERO,
            observed_cost_bps: 0.0,
            assumed_cost_bps,
            cost_delta_bps: -assumed_cost_bps,
        }
    }
}

/// Quality tag derived from the run's headline metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Excellent,
    Good,
    Acceptable,
    Failed,
}

impl RunStatus {
    pub fn from_metrics(win_rate: f64, profit_factor: f64) -> Self {
        if win_rate >= 70.0 && profit_factor >= 2.0 {
            RunStatus::Excellent
        } else if win_rate >= 60.0 && profit_factor >= 1.5 {
            RunStatus::Good
        } else if win_rate >= 50.0 && profit_factor >= 1.0 {
            RunStatus::Acceptable
        } else {
            RunStatus::Failed
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Excellent => "EXCELLENT",
            RunStatus::Good => "GOOD",
            RunStatus::Acceptable => "ACCEPTABLE",
            RunStatus::Failed => "FAILED",
        }
    }
}

/// The persisted row for one backtest run: the result summary plus the
/// provenance triple enabling bit-exact reproduction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestRunRecord {
    /// `bt_<epoch-millis>`.
    pub run_id: String,
    pub strategy_id: String,
    pub strategy_name: String,
    pub asset: String,
    pub timeframe: String,
    pub data_tier: String,
    pub start_time: i64,
    pub end_time: i64,
    pub starting_balance: Decimal,
    pub ending_balance: Decimal,
    pub total_pnl: Decimal,
    pub total_trades: i32,
    pub win_rate: f64,
    pub profit_factor: f64,
    pub sharpe_ratio: f64,
    pub max_drawdown: f64,
    pub status: RunStatus,
    /// JSON array of `"sha256:<hex>"` strings. Empty array when not computed.
    #[serde(default = "default_hashes")]
    pub data_file_hashes: String,
    #[serde(default)]
    pub parser_version: String,
    #[serde(default)]
    pub engine_version: String,
}

fn default_hashes() -> String {
    "[]".to_string()
}

/// Sink for completed run records. The core never updates or deletes.
#[async_trait]
pub trait RunStore: Send + Sync {
    async fn insert_run(&self, record: &BacktestRunRecord) -> Result<(), BacktestError>;
}
