use rust_decimal::Decimal;

use backtest_core::money;

/// Stop-loss price `percent` below the entry for a long, above for a short.
pub fn stop_loss_price(entry_price: Decimal, percent: Decimal, is_buy: bool) -> Decimal {
    if is_buy {
        money::apply_percent(entry_price, -percent)
    } else {
        money::apply_percent(entry_price, percent)
    }
}

/// Take-profit price `percent` above the entry for a long, below for a short.
pub fn take_profit_price(entry_price: Decimal, percent: Decimal, is_buy: bool) -> Decimal {
    if is_buy {
        money::apply_percent(entry_price, percent)
    } else {
        money::apply_percent(entry_price, -percent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn long_side_brackets_the_entry() {
        assert_eq!(stop_loss_price(dec!(100), dec!(5), true), dec!(95));
        assert_eq!(take_profit_price(dec!(100), dec!(10), true), dec!(110));
    }

    #[test]
    fn short_side_mirrors_the_long_side() {
        assert_eq!(stop_loss_price(dec!(100), dec!(5), false), dec!(105));
        assert_eq!(take_profit_price(dec!(100), dec!(10), false), dec!(90));
    }
}
