//! backtest-cli: seed a synthetic OHLCV dataset and replay a strategy
//! against it end to end (provider -> engine -> analytics -> run store).
//!
//! Usage:
//!   cargo run -p backtest-cli                                # defaults
//!   cargo run -p backtest-cli -- --bars 2000 --balance 25000
//!   cargo run -p backtest-cli -- --db coinlab.db --asset ETH/USD

use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sqlx::sqlite::SqlitePoolOptions;

use backtest_core::{money, DataTier, PriceBar, RiskLevel, Strategy, Timeframe, TradingMode};
use backtest_data::{DataProvider, DataRequest, SqliteBarStore};
use backtest_engine::{CostModelConfig, RuleEvaluator, RunStatus};
use backtest_runner::{BacktestOrchestrator, SqliteRunStore};

const HOUR_MS: i64 = 3_600_000;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "backtest_cli=info,backtest_runner=info".into()),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    let flag = |name: &str| {
        args.iter()
            .position(|a| a == name)
            .and_then(|i| args.get(i + 1))
            .map(String::as_str)
    };

    let db_path = flag("--db").unwrap_or("coinlab.db").to_string();
    let asset = flag("--asset").unwrap_or("BTC/USD").to_string();
    let bar_count: usize = flag("--bars").and_then(|v| v.parse().ok()).unwrap_or(720);
    let balance: Decimal = flag("--balance")
        .and_then(|v| v.parse().ok())
        .unwrap_or(dec!(10000));

    let pool = SqlitePoolOptions::new()
        .connect(&format!("sqlite://{db_path}?mode=rwc"))
        .await?;

    let bar_store = SqliteBarStore::new(pool.clone());
    bar_store.init_tables().await?;
    let bars = synthetic_bars(bar_count);
    bar_store
        .insert_bars(&asset, Timeframe::Hour1, DataTier::Premium, &bars)
        .await?;
    tracing::info!(%asset, bars = bars.len(), db = %db_path, "seeded synthetic dataset");

    let strategy = Strategy {
        id: "sma-cross".to_string(),
        name: "SMA 12/48 Crossover".to_string(),
        entry_conditions: vec!["sma(12) > sma(48)".to_string()],
        exit_conditions: vec!["sma(12) < sma(48)".to_string()],
        position_size_percent: dec!(50),
        stop_loss_percent: dec!(5),
        take_profit_percent: dec!(12),
        trading_pairs: vec![asset.clone()],
        post_only: false,
        risk_level: RiskLevel::Moderate,
        trading_mode: TradingMode::Paper,
    };

    let orchestrator = BacktestOrchestrator::with_default_dir(
        DataProvider::new(bar_store),
        SqliteRunStore::new(pool),
        CostModelConfig::default(),
    );
    let outcome = orchestrator
        .run(&strategy, &DataRequest::for_asset(&asset), balance, RuleEvaluator::new())
        .await;

    let result = &outcome.result;
    if let Some(error) = &result.validation_error {
        tracing::error!(run_id = %outcome.run_id, %error, "backtest failed");
        std::process::exit(1);
    }

    let status = RunStatus::from_metrics(result.win_rate, result.profit_factor);
    println!("run        {}", outcome.run_id);
    println!("status     {}", status.as_str());
    println!(
        "trades     {} ({} wins / {} losses, {:.1}% win rate)",
        result.total_trades, result.winning_trades, result.losing_trades, result.win_rate
    );
    println!(
        "pnl        {} ({:.2}%)",
        money::format_usd(result.total_pnl),
        result.total_pnl_percent
    );
    println!("sharpe     {:.2}", result.sharpe_ratio);
    println!("drawdown   {:.2}%", result.max_drawdown);
    println!(
        "costs      {} fees, {} slippage ({:.1} bps observed vs {:.1} assumed)",
        money::format_usd(result.total_fees),
        money::format_usd(result.total_slippage),
        result.observed_cost_bps,
        result.assumed_cost_bps
    );
    Ok(())
}

/// Deterministic hourly wave: a slow drift with a sine swing, so the
/// crossover strategy has trends to catch. Ends at the current hour.
fn synthetic_bars(count: usize) -> Vec<PriceBar> {
    let end = Utc::now().timestamp_millis() / HOUR_MS * HOUR_MS;
    let start = end - (count as i64 - 1) * HOUR_MS;

    let mut bars = Vec::with_capacity(count);
    let mut price = 50_000.0_f64;
    for i in 0..count {
        let swing = (i as f64 / 36.0).sin() * 0.004;
        let next = price * (1.0 + 0.0002 + swing);
        let (high, low) = if next >= price { (next, price) } else { (price, next) };
        bars.push(PriceBar {
            timestamp: start + i as i64 * HOUR_MS,
            open: money::from_f64_lossy(price),
            high: money::from_f64_lossy(high * 1.001),
            low: money::from_f64_lossy(low * 0.999),
            close: money::from_f64_lossy(next),
            volume: money::from_f64_lossy(250.0 + (i as f64 / 7.0).cos().abs() * 500.0),
        });
        price = next;
    }
    bars
}
