use std::collections::HashMap;

use rust_decimal::Decimal;

use backtest_core::{
    BacktestError, MarketSnapshot, PortfolioSnapshot, PriceBar, Signal, SignalAction, Strategy,
    StrategyEvaluator,
};

/// Bars of history retained per pair.
const MAX_HISTORY_BARS: usize = 500;

/// Reference evaluator for the declarative rule grammar:
///
/// ```text
/// price > sma(20)
/// sma(10) < sma(30)
/// ```
///
/// Entry conditions AND together into a BUY, exit conditions into a SELL
/// (exit wins when both hold). Price history is owned by the evaluator
/// instance and only ever grows through `update_price_history`, so a
/// backtest sees exactly the bars the engine has fed.
#[derive(Debug, Default)]
pub struct RuleEvaluator {
    history: HashMap<String, Vec<PriceBar>>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Operand {
    Price,
    Sma(usize),
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Comparison {
    Above,
    Below,
}

impl RuleEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    fn parse_operand(text: &str) -> Result<Operand, BacktestError> {
        let text = text.trim();
        if text == "price" {
            return Ok(Operand::Price);
        }
        if let Some(inner) = text.strip_prefix("sma(").and_then(|t| t.strip_suffix(')')) {
            let window: usize = inner.trim().parse().map_err(|_| {
                BacktestError::Evaluator(format!("bad sma window in condition: {text}"))
            })?;
            if window == 0 {
                return Err(BacktestError::Evaluator("sma window must be positive".to_string()));
            }
            return Ok(Operand::Sma(window));
        }
        Err(BacktestError::Evaluator(format!("unknown operand: {text}")))
    }

    fn parse_condition(condition: &str) -> Result<(Operand, Comparison, Operand), BacktestError> {
        let (lhs, op, rhs) = if let Some((l, r)) = condition.split_once('>') {
            (l, Comparison::Above, r)
        } else if let Some((l, r)) = condition.split_once('<') {
            (l, Comparison::Below, r)
        } else {
            return Err(BacktestError::Evaluator(format!(
                "unsupported condition: {condition}"
            )));
        };
        Ok((Self::parse_operand(lhs)?, op, Self::parse_operand(rhs)?))
    }

    fn sma(history: &[PriceBar], window: usize) -> Option<Decimal> {
        if history.len() < window {
            return None;
        }
        let sum: Decimal = history[history.len() - window..]
            .iter()
            .map(|bar| bar.close)
            .sum();
        Some(sum / Decimal::from(window as u64))
    }

    fn resolve(operand: Operand, history: &[PriceBar], price: Decimal) -> Option<Decimal> {
        match operand {
            Operand::Price => Some(price),
            Operand::Sma(window) => Self::sma(history, window),
        }
    }

    /// All conditions hold, with enough history to evaluate each of them.
    fn all_hold(
        conditions: &[String],
        history: &[PriceBar],
        price: Decimal,
    ) -> Result<bool, BacktestError> {
        if conditions.is_empty() {
            return Ok(false);
        }
        for condition in conditions {
            let (lhs, op, rhs) = Self::parse_condition(condition)?;
            let (Some(left), Some(right)) = (
                Self::resolve(lhs, history, price),
                Self::resolve(rhs, history, price),
            ) else {
                return Ok(false);
            };
            let holds = match op {
                Comparison::Above => left > right,
                Comparison::Below => left < right,
            };
            if !holds {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

impl StrategyEvaluator for RuleEvaluator {
    fn update_price_history(&mut self, pair: &str, bar: &PriceBar) {
        let history = self.history.entry(pair.to_string()).or_default();
        history.push(bar.clone());
        if history.len() > MAX_HISTORY_BARS {
            history.remove(0);
        }
    }

    fn clear_price_history(&mut self, pair: &str) {
        self.history.remove(pair);
    }

    fn evaluate(
        &mut self,
        strategy: &Strategy,
        market: &MarketSnapshot,
        _portfolio: &PortfolioSnapshot,
        _is_backtesting: bool,
    ) -> Result<Option<Signal>, BacktestError> {
        // Indicators read the fed history only; the snapshot price is the
        // current quote the decision would execute against.
        let history = self.history.get(&market.pair).map(Vec::as_slice).unwrap_or(&[]);

        if Self::all_hold(&strategy.exit_conditions, history, market.price)? {
            return Ok(Some(Signal {
                action: SignalAction::Sell,
                pair: market.pair.clone(),
                reason: "exit conditions met".to_string(),
            }));
        }
        if Self::all_hold(&strategy.entry_conditions, history, market.price)? {
            return Ok(Some(Signal {
                action: SignalAction::Buy,
                pair: market.pair.clone(),
                reason: "entry conditions met".to_string(),
            }));
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn bar(ts: i64, close: Decimal) -> PriceBar {
        PriceBar {
            timestamp: ts,
            open: close,
            high: close,
            low: close,
            close,
            volume: dec!(1),
        }
    }

    fn strategy(entry: &[&str], exit: &[&str]) -> Strategy {
        Strategy {
            id: "s1".to_string(),
            name: "rules".to_string(),
            entry_conditions: entry.iter().map(|s| s.to_string()).collect(),
            exit_conditions: exit.iter().map(|s| s.to_string()).collect(),
            position_size_percent: dec!(50),
            stop_loss_percent: dec!(0),
            take_profit_percent: dec!(0),
            trading_pairs: vec!["BTC/USD".to_string()],
            post_only: false,
            risk_level: backtest_core::RiskLevel::Moderate,
            trading_mode: backtest_core::TradingMode::Paper,
        }
    }

    fn snapshot(price: Decimal) -> (MarketSnapshot, PortfolioSnapshot) {
        (
            MarketSnapshot {
                pair: "BTC/USD".to_string(),
                price,
                timestamp: 0,
            },
            PortfolioSnapshot {
                balance: dec!(10000),
                open_position_value: Decimal::ZERO,
            },
        )
    }

    #[test]
    fn no_signal_without_enough_history() {
        let mut eval = RuleEvaluator::new();
        let strategy = strategy(&["price > sma(3)"], &[]);
        let (market, portfolio) = snapshot(dec!(110));
        eval.update_price_history("BTC/USD", &bar(0, dec!(100)));
        let signal = eval.evaluate(&strategy, &market, &portfolio, true).unwrap();
        assert!(signal.is_none(), "one bar of history cannot fill sma(3)");
    }

    #[test]
    fn buy_when_price_above_sma() {
        let mut eval = RuleEvaluator::new();
        let strategy = strategy(&["price > sma(3)"], &[]);
        for (i, close) in [100, 101, 102].into_iter().enumerate() {
            eval.update_price_history("BTC/USD", &bar(i as i64, Decimal::from(close)));
        }
        let (market, portfolio) = snapshot(dec!(110));
        let signal = eval.evaluate(&strategy, &market, &portfolio, true).unwrap().unwrap();
        assert_eq!(signal.action, SignalAction::Buy);
    }

    #[test]
    fn exit_wins_when_both_rule_sets_hold() {
        let mut eval = RuleEvaluator::new();
        let strategy = strategy(&["price > sma(2)"], &["price > sma(2)"]);
        for (i, close) in [100, 100].into_iter().enumerate() {
            eval.update_price_history("BTC/USD", &bar(i as i64, Decimal::from(close)));
        }
        let (market, portfolio) = snapshot(dec!(105));
        let signal = eval.evaluate(&strategy, &market, &portfolio, true).unwrap().unwrap();
        assert_eq!(signal.action, SignalAction::Sell);
    }

    #[test]
    fn unknown_condition_is_an_evaluator_error() {
        let mut eval = RuleEvaluator::new();
        let strategy = strategy(&["rsi(14) < 30"], &[]);
        let (market, portfolio) = snapshot(dec!(105));
        eval.update_price_history("BTC/USD", &bar(0, dec!(100)));
        assert!(eval.evaluate(&strategy, &market, &portfolio, true).is_err());
    }

    #[test]
    fn clear_drops_only_the_named_pair() {
        let mut eval = RuleEvaluator::new();
        eval.update_price_history("BTC/USD", &bar(0, dec!(100)));
        eval.update_price_history("ETH/USD", &bar(0, dec!(10)));
        eval.clear_price_history("BTC/USD");
        assert!(eval.history.get("BTC/USD").is_none());
        assert_eq!(eval.history.get("ETH/USD").unwrap().len(), 1);
    }
}
