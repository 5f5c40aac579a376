use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use backtest_core::money;

use crate::models::{CostModelConfig, ExecutionType, TradeCost};

/// Kraken spot fee schedule: (30-day volume floor, maker %, taker %).
const FEE_TIERS: [(Decimal, Decimal, Decimal); 9] = [
    (dec!(0), dec!(0.16), dec!(0.26)),
    (dec!(50000), dec!(0.14), dec!(0.24)),
    (dec!(100000), dec!(0.12), dec!(0.22)),
    (dec!(250000), dec!(0.10), dec!(0.20)),
    (dec!(500000), dec!(0.08), dec!(0.18)),
    (dec!(1000000), dec!(0.06), dec!(0.16)),
    (dec!(2500000), dec!(0.04), dec!(0.14)),
    (dec!(5000000), dec!(0.02), dec!(0.12)),
    (dec!(10000000), dec!(0.00), dec!(0.10)),
];

/// Computes fee, slippage and half-spread costs for a prospective order.
/// Pure: no state beyond the configuration.
#[derive(Debug, Clone, Default)]
pub struct TradingCostModel {
    config: CostModelConfig,
}

impl TradingCostModel {
    pub fn new(config: CostModelConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CostModelConfig {
        &self.config
    }

    /// Full cost breakdown for filling `order_value` notional.
    ///
    /// `volume_30d` keys the tiered fee table when tiering is enabled.
    /// The realistic-slippage scaling multiplies the slippage *rate*, not
    /// the dollar amount, so the returned `slippage_percent` is what was
    /// actually applied.
    pub fn cost(
        &self,
        execution: ExecutionType,
        order_value: Decimal,
        volume_30d: Option<Decimal>,
        is_large_order: bool,
    ) -> TradeCost {
        let fee_rate = self.fee_rate(execution, volume_30d);
        let fee = money::percent_of(order_value, fee_rate);

        let slippage_percent = if self.config.use_realistic_slippage {
            self.config.slippage_percent * Self::size_multiplier(order_value, is_large_order)
        } else {
            self.config.slippage_percent
        };
        let slippage_amount = money::percent_of(order_value, slippage_percent);

        // One side of a fill crosses half the quoted spread.
        let spread_percent = self.config.spread_percent / dec!(2);
        let spread_cost = money::percent_of(order_value, spread_percent);

        let total = fee + slippage_amount + spread_cost;
        let total_percent = money::safe_div(total * Decimal::ONE_HUNDRED, order_value);

        TradeCost {
            fee,
            slippage_amount,
            slippage_percent,
            spread_cost,
            spread_percent,
            total,
            total_percent,
        }
    }

    fn fee_rate(&self, execution: ExecutionType, volume_30d: Option<Decimal>) -> Decimal {
        if !self.config.use_tiered_fees {
            return match execution {
                ExecutionType::Maker => self.config.maker_fee,
                ExecutionType::Taker => self.config.taker_fee,
            };
        }

        let volume = volume_30d.unwrap_or(Decimal::ZERO);
        let tier = FEE_TIERS
            .iter()
            .rev()
            .find(|(floor, _, _)| volume >= *floor)
            .unwrap_or(&FEE_TIERS[0]);
        match execution {
            ExecutionType::Maker => tier.1,
            ExecutionType::Taker => tier.2,
        }
    }

    fn size_multiplier(order_value: Decimal, is_large_order: bool) -> Decimal {
        if is_large_order {
            dec!(3)
        } else if order_value > dec!(100000) {
            dec!(2)
        } else if order_value > dec!(50000) {
            dec!(1.5)
        } else if order_value > dec!(10000) {
            dec!(1.25)
        } else {
            Decimal::ONE
        }
    }
}
