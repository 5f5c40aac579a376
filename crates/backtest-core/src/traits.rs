use async_trait::async_trait;

use crate::error::BacktestError;
use crate::types::{
    DataCoverage, DataTier, MarketSnapshot, PortfolioSnapshot, PriceBar, Signal, Strategy,
    TaggedBar, TradeFill, Timeframe,
};

/// Strategy evaluation seam. The engine treats implementations as black
/// boxes; the one contract is the look-ahead rule: when `is_backtesting`
/// is true the evaluator may consult only history that was explicitly fed
/// through [`update_price_history`](Self::update_price_history), never the
/// bar currently being evaluated.
pub trait StrategyEvaluator: Send {
    fn update_price_history(&mut self, pair: &str, bar: &PriceBar);

    fn clear_price_history(&mut self, pair: &str);

    fn evaluate(
        &mut self,
        strategy: &Strategy,
        market: &MarketSnapshot,
        portfolio: &PortfolioSnapshot,
        is_backtesting: bool,
    ) -> Result<Option<Signal>, BacktestError>;
}

/// Read-only source of historical bars.
#[async_trait]
pub trait BarStore: Send + Sync {
    async fn get_bars_in_range(
        &self,
        asset: &str,
        timeframe: Timeframe,
        start_ts: i64,
        end_ts: i64,
    ) -> Result<Vec<TaggedBar>, BacktestError>;

    async fn get_coverage(
        &self,
        asset: &str,
        timeframe: Timeframe,
    ) -> Result<Option<DataCoverage>, BacktestError>;

    async fn get_distinct_data_tiers(
        &self,
        asset: &str,
        timeframe: Timeframe,
    ) -> Result<Vec<DataTier>, BacktestError>;
}

/// Source of raw executed fills, consumed by per-strategy performance
/// reporting.
#[async_trait]
pub trait TradeStore: Send + Sync {
    async fn get_trades_by_strategy(
        &self,
        strategy_id: &str,
    ) -> Result<Vec<TradeFill>, BacktestError>;
}
