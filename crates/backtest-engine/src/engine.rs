use std::collections::HashMap;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use backtest_core::{
    money, validate_sequence, BacktestError, CancelToken, MarketSnapshot, PortfolioSnapshot,
    PriceBar, SignalAction, Strategy, StrategyEvaluator, TaggedBar, Timeframe,
};

use crate::analytics;
use crate::cost::TradingCostModel;
use crate::models::{BacktestResult, CompletedTrade, ExecutionType, ExitReason, Position};
use crate::risk;
use crate::tier;

/// Running cost aggregates for one backtest.
#[derive(Default)]
struct CostTotals {
    fees: Decimal,
    slippage: Decimal,
    costs: Decimal,
    notional: Decimal,
}

/// Bar-by-bar replay of a strategy against historical data. Owns the
/// evaluator (and its per-pair price history) for the lifetime of the
/// engine; a run never shares mutable state with anything else.
pub struct SimulationEngine<E: StrategyEvaluator> {
    cost_model: TradingCostModel,
    evaluator: E,
    cancel: CancelToken,
}

impl<E: StrategyEvaluator> SimulationEngine<E> {
    pub fn new(cost_model: TradingCostModel, evaluator: E) -> Self {
        Self {
            cost_model,
            evaluator,
            cancel: CancelToken::new(),
        }
    }

    /// Token for cooperative cancellation between bars.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn cost_model(&self) -> &TradingCostModel {
        &self.cost_model
    }

    pub fn evaluator(&self) -> &E {
        &self.evaluator
    }

    pub fn evaluator_mut(&mut self) -> &mut E {
        &mut self.evaluator
    }

    /// Replay `bars` (oldest first) against `strategy`.
    ///
    /// Invalid input and tier-validation failures come back as zero-trade
    /// results carrying `validation_error`; they never panic and never
    /// abort the caller. When `tagged_for_tier` is provided, the run is
    /// gated on tier consistency first.
    pub fn run_backtest(
        &mut self,
        strategy: &Strategy,
        bars: &[PriceBar],
        starting_balance: Decimal,
        tagged_for_tier: Option<&[TaggedBar]>,
    ) -> BacktestResult {
        let pair = strategy.trading_pairs.first().cloned().unwrap_or_default();
        let assumed_bps = self.cost_model.config().assumed_cost_bps();
        let mut result = BacktestResult::empty(strategy, &pair, starting_balance, assumed_bps);

        if bars.is_empty() {
            return result;
        }
        if let Err(err) = validate_sequence(bars) {
            result.validation_error = Some(err.to_string());
            return result;
        }
        if strategy.position_size_percent <= Decimal::ZERO
            || strategy.position_size_percent > Decimal::ONE_HUNDRED
        {
            result.validation_error = Some(
                BacktestError::InvalidInput(format!(
                    "position size percent {} outside (0, 100]",
                    strategy.position_size_percent
                ))
                .to_string(),
            );
            return result;
        }

        let timeframe = Timeframe::detect(bars).unwrap_or(Timeframe::Hour1);
        result.timeframe = Some(timeframe);

        if let Some(tagged) = tagged_for_tier {
            match tier::validate_tier(tagged, timeframe) {
                Ok(report) => {
                    result.data_tier = Some(report.tier);
                    result.data_quality_score = Some(report.quality_score);
                }
                Err(err) => {
                    result.validation_error = Some(err.to_string());
                    return result;
                }
            }
        }

        tracing::debug!(
            strategy = %strategy.name,
            bars = bars.len(),
            timeframe = timeframe.as_str(),
            "starting backtest replay"
        );

        self.evaluator.clear_price_history(&pair);

        let mut balance = starting_balance;
        let mut realized_pnl = Decimal::ZERO;
        let mut positions: HashMap<String, Position> = HashMap::new();
        let mut trades: Vec<CompletedTrade> = Vec::new();
        let mut equity_curve: Vec<Decimal> = vec![starting_balance];
        let mut totals = CostTotals::default();
        let mut cancelled = false;

        for (i, bar) in bars.iter().enumerate() {
            if self.cancel.is_cancelled() {
                cancelled = true;
                break;
            }

            // The evaluator only ever sees bars that precede this one.
            if i > 0 {
                self.evaluator.update_price_history(&pair, &bars[i - 1]);
            }

            // Position maintenance: stop-loss strictly before take-profit,
            // triggered by the bar touching the level and filled at it.
            let triggered = positions.get(&pair).and_then(|position| {
                if let Some(sl) = position.stop_loss_price.filter(|sl| bar.low <= *sl) {
                    Some((sl, ExitReason::StopLoss, ExecutionType::Taker))
                } else {
                    position
                        .take_profit_price
                        .filter(|tp| bar.high >= *tp)
                        .map(|tp| (tp, ExitReason::TakeProfit, self.exit_execution(strategy)))
                }
            });
            if let Some((level, reason, execution)) = triggered {
                if let Some(position) = positions.remove(&pair) {
                    let trade = self.execute_exit(
                        position,
                        level,
                        bar.timestamp,
                        execution,
                        reason,
                        &mut balance,
                        &mut realized_pnl,
                        &mut totals,
                    );
                    trades.push(trade);
                }
            }

            // Signal evaluation against prior history only.
            let open_value: Decimal = positions
                .values()
                .map(|p| money::round(p.volume * bar.close))
                .sum();
            let market = MarketSnapshot {
                pair: pair.clone(),
                price: bar.close,
                timestamp: bar.timestamp,
            };
            let portfolio = PortfolioSnapshot {
                balance,
                open_position_value: open_value,
            };

            match self.evaluator.evaluate(strategy, &market, &portfolio, true) {
                Ok(Some(signal)) => match signal.action {
                    SignalAction::Buy => {
                        if !positions.contains_key(&signal.pair) {
                            if let Some(position) =
                                self.try_open(strategy, bar, &signal.pair, &mut balance, &mut totals)
                            {
                                positions.insert(signal.pair.clone(), position);
                            }
                        }
                    }
                    SignalAction::Sell => {
                        if let Some(position) = positions.remove(&signal.pair) {
                            let trade = self.execute_exit(
                                position,
                                bar.close,
                                bar.timestamp,
                                self.exit_execution(strategy),
                                ExitReason::StrategySignal,
                                &mut balance,
                                &mut realized_pnl,
                                &mut totals,
                            );
                            trades.push(trade);
                        }
                    }
                    SignalAction::Hold => {}
                },
                Ok(None) => {}
                Err(err) => {
                    result.validation_error = Some(err.to_string());
                    break;
                }
            }

            // Mark-to-market.
            let unrealized: Decimal = positions
                .values()
                .map(|p| {
                    money::round(p.volume * bar.close)
                        - (money::round(p.entry_price * p.volume) + p.entry_costs)
                })
                .sum();
            equity_curve.push(money::round(balance + unrealized));
        }

        if cancelled {
            // Truncated result: in-flight positions stay open and
            // unreported; whatever was produced so far stands.
            result.validation_error = Some(BacktestError::Cancelled.to_string());
        } else if result.validation_error.is_none() {
            // Force-close whatever is still open at the final close.
            let last = &bars[bars.len() - 1];
            let remaining: Vec<Position> = positions.drain().map(|(_, p)| p).collect();
            for position in remaining {
                let trade = self.execute_exit(
                    position,
                    last.close,
                    last.timestamp,
                    ExecutionType::Taker,
                    ExitReason::BacktestEnd,
                    &mut balance,
                    &mut realized_pnl,
                    &mut totals,
                );
                trades.push(trade);
            }
        }

        self.finalize(result, trades, equity_curve, balance, realized_pnl, totals, timeframe)
    }

    /// Exits that rest on the book (take-profit, strategy sell) fill as
    /// maker only for post-only strategies.
    fn exit_execution(&self, strategy: &Strategy) -> ExecutionType {
        if strategy.post_only {
            ExecutionType::Maker
        } else {
            ExecutionType::Taker
        }
    }

    /// Attempt a BUY at the bar close. Entries that would overdraw the
    /// balance are rejected and the run continues.
    fn try_open(
        &self,
        strategy: &Strategy,
        bar: &PriceBar,
        pair: &str,
        balance: &mut Decimal,
        totals: &mut CostTotals,
    ) -> Option<Position> {
        let target = money::percent_of(*balance, strategy.position_size_percent);
        if target <= Decimal::ZERO {
            return None;
        }

        let execution = if strategy.post_only {
            ExecutionType::Maker
        } else {
            ExecutionType::Taker
        };
        let is_large = target > money::percent_of(*balance, dec!(10));
        let cost = self.cost_model.cost(execution, target, None, is_large);

        // Positive slippage on the way in: pay up to get filled.
        let entry_price = money::round(
            bar.close * (Decimal::ONE + cost.slippage_percent / Decimal::ONE_HUNDRED),
        );
        let volume = money::safe_div(target, entry_price);
        if volume <= Decimal::ZERO {
            return None;
        }

        let actual_value = money::round(entry_price * volume);
        let total_entry_cost = actual_value + cost.total;
        if total_entry_cost > *balance {
            tracing::debug!(
                pair,
                cost = %total_entry_cost,
                balance = %balance,
                "rejecting entry that would overdraw the balance"
            );
            return None;
        }

        *balance -= total_entry_cost;
        totals.fees += cost.fee;
        totals.slippage += cost.slippage_amount;
        totals.costs += cost.total;
        totals.notional += actual_value;

        let stop_loss_price = (strategy.stop_loss_percent > Decimal::ZERO)
            .then(|| risk::stop_loss_price(entry_price, strategy.stop_loss_percent, true));
        let take_profit_price = (strategy.take_profit_percent > Decimal::ZERO)
            .then(|| risk::take_profit_price(entry_price, strategy.take_profit_percent, true));

        Some(Position {
            pair: pair.to_string(),
            entry_price,
            volume,
            stop_loss_price,
            take_profit_price,
            entry_costs: cost.total,
        })
    }

    /// Shared exit mechanics for stop-loss, take-profit, strategy sells
    /// and end-of-run closes. `reference_price` is the level the exit
    /// fills against: the triggered SL/TP level, or the bar close.
    #[allow(clippy::too_many_arguments)]
    fn execute_exit(
        &self,
        position: Position,
        reference_price: Decimal,
        timestamp: i64,
        execution: ExecutionType,
        reason: ExitReason,
        balance: &mut Decimal,
        realized_pnl: &mut Decimal,
        totals: &mut CostTotals,
    ) -> CompletedTrade {
        let exit_value = money::round(reference_price * position.volume);
        let is_large = exit_value > money::percent_of(*balance, dec!(10));
        let cost = self.cost_model.cost(execution, exit_value, None, is_large);

        // Negative slippage on the way out: receive less.
        let exit_price = money::round(
            reference_price * (Decimal::ONE - cost.slippage_percent / Decimal::ONE_HUNDRED),
        );
        let proceeds = money::round(exit_price * position.volume);
        let net_proceeds = proceeds - cost.total;
        let cost_basis = money::round(position.entry_price * position.volume) + position.entry_costs;
        let pnl = net_proceeds - cost_basis;

        *balance += net_proceeds;
        *realized_pnl += pnl;
        totals.fees += cost.fee;
        totals.slippage += cost.slippage_amount;
        totals.costs += cost.total;
        totals.notional += exit_value;

        CompletedTrade {
            timestamp,
            pair: position.pair,
            entry_price: position.entry_price,
            exit_price,
            volume: position.volume,
            pnl,
            entry_costs: position.entry_costs,
            exit_costs: cost.total,
            reason,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn finalize(
        &self,
        mut result: BacktestResult,
        trades: Vec<CompletedTrade>,
        equity_curve: Vec<Decimal>,
        balance: Decimal,
        realized_pnl: Decimal,
        totals: CostTotals,
        timeframe: Timeframe,
    ) -> BacktestResult {
        let stats = analytics::trade_stats(&trades);

        result.ending_balance = balance;
        result.total_pnl = realized_pnl;
        result.total_pnl_percent = money::safe_div(
            realized_pnl * Decimal::ONE_HUNDRED,
            result.starting_balance,
        )
        .to_f64()
        .unwrap_or(0.0);
        result.total_trades = trades.len() as i32;
        result.winning_trades = trades.iter().filter(|t| t.pnl > Decimal::ZERO).count() as i32;
        result.losing_trades = trades.iter().filter(|t| t.pnl < Decimal::ZERO).count() as i32;
        result.win_rate = analytics::win_rate(&trades);
        result.profit_factor = analytics::profit_factor(&trades);
        result.sharpe_ratio = analytics::sharpe_ratio(&equity_curve, timeframe.periods_per_year());
        result.max_drawdown = analytics::max_drawdown_percent(&equity_curve);
        result.average_profit = stats.average_profit;
        result.average_loss = stats.average_loss;
        result.best_trade = stats.best_trade;
        result.worst_trade = stats.worst_trade;
        result.monthly_returns = analytics::monthly_returns(&trades);
        result.total_fees = totals.fees;
        result.total_slippage = totals.slippage;
        result.observed_cost_bps = analytics::observed_cost_bps(totals.costs, totals.notional);
        result.cost_delta_bps = result.observed_cost_bps - result.assumed_cost_bps;
        result.trades = trades;
        result.equity_curve = equity_curve;

        tracing::debug!(
            trades = result.total_trades,
            win_rate = result.win_rate,
            pnl = %result.total_pnl,
            "backtest replay finished"
        );

        result
    }
}
