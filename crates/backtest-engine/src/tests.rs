use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use backtest_core::*;

use crate::analytics;
use crate::cost::TradingCostModel;
use crate::engine::SimulationEngine;
use crate::evaluator::RuleEvaluator;
use crate::models::*;
use crate::tier;

const HOUR_MS: i64 = 3_600_000;
const PAIR: &str = "BTC/USD";

/// Helper: build a bar at hour `i` with the given OHLC values.
fn bar(i: i64, open: f64, high: f64, low: f64, close: f64) -> PriceBar {
    PriceBar {
        timestamp: i * HOUR_MS,
        open: Decimal::from_f64(open).unwrap(),
        high: Decimal::from_f64(high).unwrap(),
        low: Decimal::from_f64(low).unwrap(),
        close: Decimal::from_f64(close).unwrap(),
        volume: dec!(1000),
    }
}

/// Helper: `count` hourly bars compounding `step_percent` per bar.
fn drift_bars(count: usize, start: Decimal, step_percent: Decimal) -> Vec<PriceBar> {
    let mut bars = Vec::with_capacity(count);
    let mut open = start;
    for i in 0..count {
        let close = money::apply_percent(open, step_percent);
        let (high, low) = if close >= open { (close, open) } else { (open, close) };
        bars.push(PriceBar {
            timestamp: i as i64 * HOUR_MS,
            open,
            high,
            low,
            close,
            volume: dec!(1000),
        });
        open = close;
    }
    bars
}

/// Helper: `count` hourly bars pinned at `price`.
fn flat_bars(count: usize, price: Decimal) -> Vec<PriceBar> {
    (0..count)
        .map(|i| PriceBar {
            timestamp: i as i64 * HOUR_MS,
            open: price,
            high: price,
            low: price,
            close: price,
            volume: dec!(1000),
        })
        .collect()
}

/// Helper: baseline long-only strategy; conditions unused by the
/// scripted evaluators.
fn test_strategy() -> Strategy {
    Strategy {
        id: "strat-1".to_string(),
        name: "Test Strategy".to_string(),
        entry_conditions: Vec::new(),
        exit_conditions: Vec::new(),
        position_size_percent: dec!(95),
        stop_loss_percent: Decimal::ZERO,
        take_profit_percent: Decimal::ZERO,
        trading_pairs: vec![PAIR.to_string()],
        post_only: false,
        risk_level: RiskLevel::Moderate,
        trading_mode: TradingMode::Paper,
    }
}

/// Evaluator that replays a fixed per-bar script and ignores history.
struct ScriptedEvaluator {
    script: VecDeque<Option<SignalAction>>,
}

impl ScriptedEvaluator {
    fn new(script: Vec<Option<SignalAction>>) -> Self {
        Self {
            script: script.into(),
        }
    }
}

impl StrategyEvaluator for ScriptedEvaluator {
    fn update_price_history(&mut self, _pair: &str, _bar: &PriceBar) {}

    fn clear_price_history(&mut self, _pair: &str) {}

    fn evaluate(
        &mut self,
        _strategy: &Strategy,
        market: &MarketSnapshot,
        _portfolio: &PortfolioSnapshot,
        _is_backtesting: bool,
    ) -> Result<Option<Signal>, BacktestError> {
        let action = self.script.pop_front().flatten();
        Ok(action.map(|action| Signal {
            action,
            pair: market.pair.clone(),
            reason: "scripted".to_string(),
        }))
    }
}

/// Evaluator that records, for every evaluate call, how much history it
/// had been fed and the newest fed timestamp.
#[derive(Default)]
struct LookaheadSpy {
    fed: Vec<i64>,
    observations: Arc<Mutex<Vec<(usize, Option<i64>, i64)>>>,
}

impl StrategyEvaluator for LookaheadSpy {
    fn update_price_history(&mut self, _pair: &str, bar: &PriceBar) {
        self.fed.push(bar.timestamp);
    }

    fn clear_price_history(&mut self, _pair: &str) {
        self.fed.clear();
    }

    fn evaluate(
        &mut self,
        _strategy: &Strategy,
        market: &MarketSnapshot,
        _portfolio: &PortfolioSnapshot,
        _is_backtesting: bool,
    ) -> Result<Option<Signal>, BacktestError> {
        self.observations.lock().unwrap().push((
            self.fed.len(),
            self.fed.last().copied(),
            market.timestamp,
        ));
        Ok(None)
    }
}

/// Evaluator that buys on the first bar, then cancels the run token
/// after a fixed number of calls.
struct CancellingEvaluator {
    token: CancelToken,
    cancel_after_calls: usize,
    calls: usize,
}

impl StrategyEvaluator for CancellingEvaluator {
    fn update_price_history(&mut self, _pair: &str, _bar: &PriceBar) {}

    fn clear_price_history(&mut self, _pair: &str) {}

    fn evaluate(
        &mut self,
        _strategy: &Strategy,
        market: &MarketSnapshot,
        _portfolio: &PortfolioSnapshot,
        _is_backtesting: bool,
    ) -> Result<Option<Signal>, BacktestError> {
        self.calls += 1;
        if self.calls >= self.cancel_after_calls {
            self.token.cancel();
        }
        if self.calls == 1 {
            return Ok(Some(Signal {
                action: SignalAction::Buy,
                pair: market.pair.clone(),
                reason: "scripted".to_string(),
            }));
        }
        Ok(None)
    }
}

fn engine_with(
    script: Vec<Option<SignalAction>>,
) -> SimulationEngine<ScriptedEvaluator> {
    SimulationEngine::new(
        TradingCostModel::new(CostModelConfig::default()),
        ScriptedEvaluator::new(script),
    )
}

fn script_buy_at(len: usize, buy_index: usize) -> Vec<Option<SignalAction>> {
    let mut script = vec![None; len];
    script[buy_index] = Some(SignalAction::Buy);
    script
}

// =============================================================================
// E1: empty input yields a clean zero-trade result
// =============================================================================

#[test]
fn test_empty_input_returns_zero_trade_result() {
    let mut engine = engine_with(Vec::new());
    let result = engine.run_backtest(&test_strategy(), &[], dec!(10000), None);

    assert_eq!(result.total_trades, 0);
    assert_eq!(result.ending_balance, dec!(10000));
    assert_eq!(result.equity_curve, vec![dec!(10000)]);
    assert!(result.validation_error.is_none());
}

// =============================================================================
// E2: buy-and-hold through a steady uptrend
// =============================================================================

#[test]
fn test_buy_and_hold_uptrend() {
    let bars = drift_bars(100, dec!(100), dec!(0.2));
    let mut engine = engine_with(script_buy_at(100, 0));
    let result = engine.run_backtest(&test_strategy(), &bars, dec!(10000), None);

    assert_eq!(result.total_trades, 1, "one entry, closed at end of run");
    assert_eq!(result.trades[0].reason, ExitReason::BacktestEnd);
    assert_eq!(result.equity_curve.len(), 101);
    assert_eq!(result.equity_curve[0], dec!(10000));
    assert!(
        result.total_pnl_percent > 10.0,
        "a +0.2%/bar drift over 100 bars should clear 10%, got {:.2}%",
        result.total_pnl_percent
    );
}

// =============================================================================
// E3: stop-loss precedence when one bar touches both brackets
// =============================================================================

#[test]
fn test_stop_loss_precedence_over_take_profit() {
    let mut strategy = test_strategy();
    strategy.stop_loss_percent = dec!(5);
    strategy.take_profit_percent = dec!(10);

    let bars = vec![
        bar(0, 100.0, 100.0, 100.0, 100.0),
        bar(1, 100.0, 111.0, 94.0, 97.0),
        bar(2, 97.0, 97.0, 97.0, 97.0),
    ];
    let mut engine = engine_with(script_buy_at(3, 0));
    let result = engine.run_backtest(&strategy, &bars, dec!(10000), None);

    assert_eq!(result.total_trades, 1);
    let trade = &result.trades[0];
    assert_eq!(trade.reason, ExitReason::StopLoss);

    // Entry pays 3x slippage (95% sizing trips the large-order flag):
    // entry = 100 * 1.0015, stop level = entry * 0.95, and the stop fill
    // gives back the same 3x slippage on the way out.
    let entry = money::apply_percent(dec!(100), dec!(0.15));
    assert_eq!(trade.entry_price, entry);
    let stop_level = money::apply_percent(entry, dec!(-5));
    let expected_exit = money::round(stop_level * (Decimal::ONE - dec!(0.0015)));
    assert_eq!(trade.exit_price, expected_exit);
}

#[test]
fn test_take_profit_triggers_when_stop_untouched() {
    let mut strategy = test_strategy();
    strategy.stop_loss_percent = dec!(5);
    strategy.take_profit_percent = dec!(10);

    let bars = vec![
        bar(0, 100.0, 100.0, 100.0, 100.0),
        bar(1, 100.0, 112.0, 99.0, 108.0),
        bar(2, 108.0, 108.0, 108.0, 108.0),
    ];
    let mut engine = engine_with(script_buy_at(3, 0));
    let result = engine.run_backtest(&strategy, &bars, dec!(10000), None);

    assert_eq!(result.total_trades, 1);
    assert_eq!(result.trades[0].reason, ExitReason::TakeProfit);
    assert!(result.trades[0].pnl > Decimal::ZERO);
}

// =============================================================================
// Monetary conservation across accepted trades
// =============================================================================

#[test]
fn test_trade_pnl_matches_exit_mechanics() {
    let bars = drift_bars(6, dec!(100), dec!(0.5));
    let mut script = vec![None; 6];
    script[0] = Some(SignalAction::Buy);
    script[3] = Some(SignalAction::Sell);
    let mut engine = engine_with(script);
    let result = engine.run_backtest(&test_strategy(), &bars, dec!(10000), None);

    assert_eq!(result.total_trades, 1);
    let trade = &result.trades[0];
    assert_eq!(trade.reason, ExitReason::StrategySignal);

    let net_proceeds = money::round(trade.exit_price * trade.volume) - trade.exit_costs;
    let cost_basis = money::round(trade.entry_price * trade.volume) + trade.entry_costs;
    assert_eq!(trade.pnl, net_proceeds - cost_basis);
}

#[test]
fn test_balance_delta_equals_sum_of_pnl() {
    let bars = drift_bars(10, dec!(100), dec!(0.3));
    let mut script = vec![None; 10];
    script[0] = Some(SignalAction::Buy);
    script[3] = Some(SignalAction::Sell);
    script[5] = Some(SignalAction::Buy);
    script[8] = Some(SignalAction::Sell);
    let mut engine = engine_with(script);
    let result = engine.run_backtest(&test_strategy(), &bars, dec!(10000), None);

    assert_eq!(result.total_trades, 2);
    let pnl_sum: Decimal = result.trades.iter().map(|t| t.pnl).sum();
    assert_eq!(
        result.ending_balance - result.starting_balance,
        pnl_sum,
        "with no open positions the balance delta must equal realized pnl"
    );
    assert_eq!(result.total_pnl, pnl_sum);
}

// =============================================================================
// Look-ahead prevention: evaluator history always trails the current bar
// =============================================================================

#[test]
fn test_evaluator_never_sees_the_current_bar() {
    let observations = Arc::new(Mutex::new(Vec::new()));
    let spy = LookaheadSpy {
        fed: Vec::new(),
        observations: Arc::clone(&observations),
    };
    let mut engine = SimulationEngine::new(
        TradingCostModel::new(CostModelConfig::default()),
        spy,
    );
    let bars = drift_bars(20, dec!(100), dec!(0.1));
    engine.run_backtest(&test_strategy(), &bars, dec!(10000), None);

    let observations = observations.lock().unwrap();
    assert_eq!(observations.len(), 20);
    for (i, (fed_count, newest_fed, market_ts)) in observations.iter().enumerate() {
        assert_eq!(*fed_count, i, "bar {i} must see exactly the {i} prior bars");
        if let Some(newest) = newest_fed {
            assert!(
                newest < market_ts,
                "bar {i}: fed history reaches {newest}, at or past the current bar {market_ts}"
            );
        }
    }
}

// =============================================================================
// Equity curve shape
// =============================================================================

#[test]
fn test_equity_curve_has_one_point_per_bar_plus_seed() {
    let bars = flat_bars(7, dec!(250));
    let mut engine = engine_with(vec![None; 7]);
    let result = engine.run_backtest(&test_strategy(), &bars, dec!(5000), None);

    assert_eq!(result.equity_curve.len(), 8);
    assert_eq!(result.equity_curve[0], dec!(5000));
    assert!(result.equity_curve.iter().all(|e| *e == dec!(5000)));
}

// =============================================================================
// Input diagnostics are non-fatal
// =============================================================================

#[test]
fn test_misordered_bars_yield_diagnostic() {
    let bars = vec![bar(5, 100.0, 100.0, 100.0, 100.0), bar(2, 100.0, 100.0, 100.0, 100.0)];
    let mut engine = engine_with(vec![None; 2]);
    let result = engine.run_backtest(&test_strategy(), &bars, dec!(10000), None);

    assert_eq!(result.total_trades, 0);
    assert!(result.validation_error.as_deref().unwrap_or("").contains("out of order"));
    assert_eq!(result.equity_curve, vec![dec!(10000)]);
}

#[test]
fn test_position_size_out_of_range_yields_diagnostic() {
    let mut strategy = test_strategy();
    strategy.position_size_percent = dec!(120);
    let bars = flat_bars(3, dec!(100));
    let mut engine = engine_with(vec![None; 3]);
    let result = engine.run_backtest(&strategy, &bars, dec!(10000), None);

    assert_eq!(result.total_trades, 0);
    assert!(result
        .validation_error
        .as_deref()
        .unwrap_or("")
        .contains("position size"));
}

#[test]
fn test_overdrawing_entry_is_rejected_and_run_continues() {
    let mut strategy = test_strategy();
    strategy.position_size_percent = dec!(100);
    let bars = flat_bars(5, dec!(100));
    // Try to buy every bar; each attempt costs more than the full balance.
    let script = vec![Some(SignalAction::Buy); 5];
    let mut engine = engine_with(script);
    let result = engine.run_backtest(&strategy, &bars, dec!(10000), None);

    assert_eq!(result.total_trades, 0);
    assert!(result.validation_error.is_none());
    assert_eq!(result.ending_balance, dec!(10000));
    assert_eq!(result.equity_curve.len(), 6);
}

// =============================================================================
// E5: tier validation gates the run
// =============================================================================

fn tagged(bars: &[PriceBar], tier: DataTier) -> Vec<TaggedBar> {
    bars.iter()
        .map(|bar| TaggedBar {
            bar: bar.clone(),
            tier,
        })
        .collect()
}

#[test]
fn test_mixed_tiers_block_the_run() {
    let bars = flat_bars(6, dec!(100));
    let mut entities = tagged(&bars, DataTier::Premium);
    entities[3].tier = DataTier::Basic;

    let mut engine = engine_with(script_buy_at(6, 0));
    let result = engine.run_backtest(&test_strategy(), &bars, dec!(10000), Some(&entities));

    assert_eq!(result.total_trades, 0);
    assert!(result
        .validation_error
        .as_deref()
        .unwrap_or("")
        .contains("tier"));
    assert_eq!(result.equity_curve, vec![dec!(10000)]);
}

#[test]
fn test_consistent_tier_is_reported_with_quality_score() {
    let bars = flat_bars(24, dec!(100));
    let entities = tagged(&bars, DataTier::Professional);

    let mut engine = engine_with(vec![None; 24]);
    let result = engine.run_backtest(&test_strategy(), &bars, dec!(10000), Some(&entities));

    assert!(result.validation_error.is_none());
    assert_eq!(result.data_tier, Some(DataTier::Professional));
    assert!((result.data_quality_score.unwrap() - 1.0).abs() < 1e-9);
}

#[test]
fn test_tier_validator_scores_gaps() {
    // 20 hourly bars with a 5-hour hole after the 10th.
    let mut bars = flat_bars(10, dec!(100));
    for i in 0..10 {
        bars.push(PriceBar {
            timestamp: (15 + i) * HOUR_MS,
            open: dec!(100),
            high: dec!(100),
            low: dec!(100),
            close: dec!(100),
            volume: dec!(1000),
        });
    }
    let entities = tagged(&bars, DataTier::Standard);
    let report = tier::validate_tier(&entities, Timeframe::Hour1).unwrap();

    assert_eq!(report.tier, DataTier::Standard);
    assert!(report.quality_score < 1.0);
    assert!(report.quality_score > 0.5);
}

#[test]
fn test_tier_validator_rejects_sparse_series() {
    // 4 bars spread over 100 hours: count is far off the expected 101.
    let bars: Vec<PriceBar> = [0i64, 30, 70, 100]
        .iter()
        .map(|h| PriceBar {
            timestamp: h * HOUR_MS,
            open: dec!(100),
            high: dec!(100),
            low: dec!(100),
            close: dec!(100),
            volume: dec!(1000),
        })
        .collect();
    let entities = tagged(&bars, DataTier::Standard);
    assert!(tier::validate_tier(&entities, Timeframe::Hour1).is_err());
}

// =============================================================================
// Cooperative cancellation between bars
// =============================================================================

#[test]
fn test_cancellation_truncates_without_force_close() {
    let bars = flat_bars(10, dec!(100));
    // The evaluator shares the engine's token and pulls it mid-run.
    let mut engine = SimulationEngine::new(
        TradingCostModel::new(CostModelConfig::default()),
        CancellingEvaluator {
            token: CancelToken::new(),
            cancel_after_calls: 3,
            calls: 0,
        },
    );
    let shared = engine.cancel_token();
    engine.evaluator_mut().token = shared;

    let result = engine.run_backtest(&test_strategy(), &bars, dec!(10000), None);

    assert_eq!(result.validation_error.as_deref(), Some("cancelled"));
    // The bar-0 entry stays open: no force close, so no completed trades.
    assert_eq!(result.total_trades, 0);
    // Bars 0..=2 were processed before the cancel took effect.
    assert_eq!(result.equity_curve.len(), 4);
}

// =============================================================================
// E4 + cost model properties
// =============================================================================

#[test]
fn test_cost_breakdown_charges_half_spread() {
    let model = TradingCostModel::new(CostModelConfig::default());
    let cost = model.cost(ExecutionType::Taker, dec!(10000), None, false);

    assert_eq!(cost.fee, dec!(26));
    assert_eq!(cost.spread_percent, dec!(0.01));
    assert_eq!(cost.spread_cost, dec!(1));
    assert_eq!(cost.slippage_amount, dec!(5));
    assert_eq!(cost.total, dec!(32));
    assert_eq!(cost.total_percent, dec!(0.32));
}

#[test]
fn test_spread_percent_is_half_the_configured_spread() {
    let config = CostModelConfig {
        spread_percent: dec!(0.08),
        ..CostModelConfig::default()
    };
    let model = TradingCostModel::new(config);
    for order in [dec!(500), dec!(25000), dec!(400000)] {
        let cost = model.cost(ExecutionType::Maker, order, None, false);
        assert_eq!(cost.spread_percent, dec!(0.04));
        assert_eq!(cost.spread_cost, money::percent_of(order, dec!(0.04)));
    }
}

#[test]
fn test_slippage_scales_the_rate_not_the_amount() {
    let model = TradingCostModel::new(CostModelConfig::default());

    // Below the first band boundary the rate is flat...
    let small = model.cost(ExecutionType::Taker, dec!(4000), None, false);
    let doubled = model.cost(ExecutionType::Taker, dec!(8000), None, false);
    assert_eq!(small.slippage_percent, doubled.slippage_percent);
    assert_eq!(doubled.slippage_amount, small.slippage_amount * dec!(2));

    // ...and each boundary multiplies the rate.
    let base = small.slippage_percent;
    assert_eq!(
        model.cost(ExecutionType::Taker, dec!(20000), None, false).slippage_percent,
        base * dec!(1.25)
    );
    assert_eq!(
        model.cost(ExecutionType::Taker, dec!(60000), None, false).slippage_percent,
        base * dec!(1.5)
    );
    assert_eq!(
        model.cost(ExecutionType::Taker, dec!(150000), None, false).slippage_percent,
        base * dec!(2)
    );
    assert_eq!(
        model.cost(ExecutionType::Taker, dec!(500), None, true).slippage_percent,
        base * dec!(3)
    );
}

#[test]
fn test_slippage_scaling_disabled() {
    let config = CostModelConfig {
        use_realistic_slippage: false,
        ..CostModelConfig::default()
    };
    let model = TradingCostModel::new(config);
    let cost = model.cost(ExecutionType::Taker, dec!(150000), None, true);
    assert_eq!(cost.slippage_percent, dec!(0.05));
}

#[test]
fn test_tiered_fees_follow_the_volume_bands() {
    let config = CostModelConfig {
        use_tiered_fees: true,
        ..CostModelConfig::default()
    };
    let model = TradingCostModel::new(config);

    let entry_band = model.cost(ExecutionType::Taker, dec!(10000), None, false);
    assert_eq!(entry_band.fee, dec!(26));

    let second_band = model.cost(ExecutionType::Taker, dec!(10000), Some(dec!(60000)), false);
    assert_eq!(second_band.fee, dec!(24));

    let top_band_taker = model.cost(ExecutionType::Taker, dec!(10000), Some(dec!(12000000)), false);
    assert_eq!(top_band_taker.fee, dec!(10));

    let top_band_maker = model.cost(ExecutionType::Maker, dec!(10000), Some(dec!(12000000)), false);
    assert_eq!(top_band_maker.fee, Decimal::ZERO);
}

#[test]
fn test_flat_fees_when_tiering_disabled() {
    let model = TradingCostModel::new(CostModelConfig::default());
    // Huge 30-day volume is ignored without tiering.
    let cost = model.cost(ExecutionType::Taker, dec!(10000), Some(dec!(12000000)), false);
    assert_eq!(cost.fee, dec!(26));
}

#[test]
fn test_post_only_exits_pay_maker_fees() {
    let bars = drift_bars(6, dec!(100), dec!(0.5));
    let mut script = vec![None; 6];
    script[0] = Some(SignalAction::Buy);
    script[3] = Some(SignalAction::Sell);

    let mut taker_engine = engine_with(script.clone());
    let taker = taker_engine.run_backtest(&test_strategy(), &bars, dec!(10000), None);

    let mut strategy = test_strategy();
    strategy.post_only = true;
    let mut maker_engine = engine_with(script);
    let maker = maker_engine.run_backtest(&strategy, &bars, dec!(10000), None);

    assert!(
        maker.trades[0].exit_costs < taker.trades[0].exit_costs,
        "maker exits should be cheaper than taker exits"
    );
}

// =============================================================================
// Analytics
// =============================================================================

fn trade_with_pnl(ts: i64, pnl: Decimal) -> CompletedTrade {
    CompletedTrade {
        timestamp: ts,
        pair: PAIR.to_string(),
        entry_price: dec!(100),
        exit_price: dec!(100),
        volume: dec!(1),
        pnl,
        entry_costs: Decimal::ZERO,
        exit_costs: Decimal::ZERO,
        reason: ExitReason::StrategySignal,
    }
}

#[test]
fn test_win_rate_and_profit_factor_edges() {
    assert_eq!(analytics::win_rate(&[]), 0.0);
    assert_eq!(analytics::profit_factor(&[]), 1.0);

    let all_wins = vec![trade_with_pnl(0, dec!(10)), trade_with_pnl(1, dec!(5))];
    assert_eq!(analytics::win_rate(&all_wins), 100.0);
    assert!(analytics::profit_factor(&all_wins).is_infinite());

    let mixed = vec![
        trade_with_pnl(0, dec!(30)),
        trade_with_pnl(1, dec!(-10)),
        trade_with_pnl(2, dec!(-5)),
    ];
    assert!((analytics::profit_factor(&mixed) - 2.0).abs() < 1e-12);
    assert!((analytics::win_rate(&mixed) - 100.0 / 3.0).abs() < 1e-9);
}

#[test]
fn test_trade_stats_subsets() {
    let trades = vec![
        trade_with_pnl(0, dec!(30)),
        trade_with_pnl(1, dec!(10)),
        trade_with_pnl(2, dec!(-8)),
    ];
    let stats = analytics::trade_stats(&trades);
    assert_eq!(stats.average_profit, dec!(20));
    assert_eq!(stats.average_loss, dec!(8));
    assert_eq!(stats.best_trade, dec!(30));
    assert_eq!(stats.worst_trade, dec!(-8));
}

#[test]
fn test_max_drawdown_from_peak() {
    let curve = vec![dec!(100), dec!(120), dec!(90), dec!(110)];
    assert!((analytics::max_drawdown_percent(&curve) - 25.0).abs() < 1e-9);
    assert_eq!(analytics::max_drawdown_percent(&[dec!(100), dec!(150)]), 0.0);
}

#[test]
fn test_sharpe_is_zero_for_constant_returns() {
    // Identical per-bar returns (exactly representable +100% steps):
    // zero variance, Sharpe defined as 0.
    let mut curve = vec![dec!(100)];
    for _ in 0..10 {
        let last = *curve.last().unwrap();
        curve.push(last * dec!(2));
    }
    let sharpe = analytics::sharpe_ratio(&curve, Timeframe::Hour1.periods_per_year());
    assert_eq!(sharpe, 0.0);

    let flat = vec![dec!(100); 12];
    assert_eq!(
        analytics::sharpe_ratio(&flat, Timeframe::Day1.periods_per_year()),
        0.0
    );
}

#[test]
fn test_sharpe_positive_for_noisy_uptrend() {
    let curve = vec![
        dec!(100),
        dec!(102),
        dec!(101),
        dec!(104),
        dec!(103),
        dec!(107),
        dec!(106),
        dec!(110),
    ];
    let sharpe = analytics::sharpe_ratio(&curve, Timeframe::Day1.periods_per_year());
    assert!(sharpe > 0.0);
    assert!(sharpe.is_finite());
}

#[test]
fn test_monthly_returns_group_by_exit_month() {
    // Mid-month timestamps keep the grouping stable in any system zone:
    // 2024-01-15 and 2024-02-15, 12:00 UTC.
    let jan_a = 1_705_320_000_000;
    let jan_b = jan_a + 3 * 86_400_000;
    let feb = 1_707_998_400_000;
    let trades = vec![
        trade_with_pnl(jan_a, dec!(50)),
        trade_with_pnl(jan_b, dec!(-20)),
        trade_with_pnl(feb, dec!(10)),
    ];
    let months = analytics::monthly_returns(&trades);
    let keys: Vec<&String> = months.keys().collect();
    assert_eq!(keys, vec!["2024-01", "2024-02"]);
    assert_eq!(months["2024-01"], dec!(30));
    assert_eq!(months["2024-02"], dec!(10));
}

#[test]
fn test_observed_cost_bps() {
    assert_eq!(analytics::observed_cost_bps(dec!(32), dec!(10000)), 32.0);
    assert_eq!(analytics::observed_cost_bps(dec!(10), Decimal::ZERO), 0.0);
}

// =============================================================================
// Status mapping boundaries
// =============================================================================

#[test]
fn test_status_mapping_boundaries() {
    assert_eq!(RunStatus::from_metrics(70.0, 2.0), RunStatus::Excellent);
    assert_eq!(RunStatus::from_metrics(69.9, 2.0), RunStatus::Good);
    assert_eq!(RunStatus::from_metrics(60.0, 1.5), RunStatus::Good);
    assert_eq!(RunStatus::from_metrics(50.0, 1.0), RunStatus::Acceptable);
    assert_eq!(RunStatus::from_metrics(49.9, 1.0), RunStatus::Failed);
    assert_eq!(RunStatus::from_metrics(80.0, f64::INFINITY), RunStatus::Excellent);
}

// =============================================================================
// E6: bit-identical replays
// =============================================================================

#[test]
fn test_identical_inputs_reproduce_identical_results() {
    let mut strategy = test_strategy();
    strategy.entry_conditions = vec!["price > sma(3)".to_string()];
    strategy.exit_conditions = vec!["price < sma(3)".to_string()];

    // A rising leg, a falling leg, then another rise.
    let mut bars = drift_bars(15, dec!(100), dec!(0.4));
    let mut down = drift_bars(10, bars.last().unwrap().close, dec!(-0.6));
    for (i, bar) in down.iter_mut().enumerate() {
        bar.timestamp = (15 + i as i64) * HOUR_MS;
    }
    bars.extend(down);
    let mut up = drift_bars(10, bars.last().unwrap().close, dec!(0.5));
    for (i, bar) in up.iter_mut().enumerate() {
        bar.timestamp = (25 + i as i64) * HOUR_MS;
    }
    bars.extend(up);

    let run = |bars: &[PriceBar]| {
        let mut engine = SimulationEngine::new(
            TradingCostModel::new(CostModelConfig::default()),
            RuleEvaluator::new(),
        );
        engine.run_backtest(&strategy, bars, dec!(10000), None)
    };

    let first = run(&bars);
    let second = run(&bars);

    assert!(first.total_trades > 0, "the crossover should trade at least once");
    assert_eq!(first.trades, second.trades);
    assert_eq!(first.equity_curve, second.equity_curve);
    assert_eq!(first.sharpe_ratio, second.sharpe_ratio);
    assert_eq!(first, second);
}

// =============================================================================
// Assumed-vs-observed cost accounting
// =============================================================================

#[test]
fn test_cost_bps_accounting_is_attached_to_results() {
    let config = CostModelConfig::default();
    // 0.26% taker + 0.01% half-spread = 27 bps assumed.
    assert!((config.assumed_cost_bps() - 27.0).abs() < 1e-9);

    let bars = drift_bars(6, dec!(100), dec!(0.5));
    let mut script = vec![None; 6];
    script[0] = Some(SignalAction::Buy);
    script[3] = Some(SignalAction::Sell);
    let mut engine = engine_with(script);
    let result = engine.run_backtest(&test_strategy(), &bars, dec!(10000), None);

    assert!((result.assumed_cost_bps - 27.0).abs() < 1e-9);
    assert!(result.observed_cost_bps > result.assumed_cost_bps);
    assert!(
        (result.cost_delta_bps - (result.observed_cost_bps - result.assumed_cost_bps)).abs()
            < 1e-9
    );
    assert!(result.total_fees > Decimal::ZERO);
    assert!(result.total_slippage > Decimal::ZERO);
}
