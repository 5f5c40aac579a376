use std::str::FromStr;

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::SqlitePool;

use backtest_core::{BacktestError, TradeFill, TradeSide, TradeStore};
use backtest_engine::{BacktestRunRecord, RunStatus, RunStore};

/// Persists completed run records and raw trade fills. Monetary columns
/// are TEXT so records read back bit-exact.
pub struct SqliteRunStore {
    pool: SqlitePool,
}

impl SqliteRunStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn init_tables(&self) -> Result<(), anyhow::Error> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS backtest_runs (
                run_id TEXT PRIMARY KEY,
                strategy_id TEXT NOT NULL,
                strategy_name TEXT NOT NULL,
                asset TEXT NOT NULL,
                timeframe TEXT NOT NULL,
                data_tier TEXT NOT NULL,
                start_time INTEGER NOT NULL,
                end_time INTEGER NOT NULL,
                starting_balance TEXT NOT NULL,
                ending_balance TEXT NOT NULL,
                total_pnl TEXT NOT NULL,
                total_trades INTEGER NOT NULL,
                win_rate REAL NOT NULL,
                profit_factor REAL NOT NULL,
                sharpe_ratio REAL NOT NULL,
                max_drawdown REAL NOT NULL,
                status TEXT NOT NULL,
                data_file_hashes TEXT NOT NULL DEFAULT '[]',
                parser_version TEXT NOT NULL DEFAULT '',
                engine_version TEXT NOT NULL DEFAULT '',
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS trade_fills (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                strategy_id TEXT NOT NULL,
                pair TEXT NOT NULL,
                side TEXT NOT NULL,
                price TEXT NOT NULL,
                volume TEXT NOT NULL,
                timestamp INTEGER NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Record one executed fill (used by live/paper trading feeds and
    /// test fixtures).
    pub async fn insert_fill(&self, fill: &TradeFill) -> Result<(), anyhow::Error> {
        self.init_tables().await?;
        sqlx::query(
            "INSERT INTO trade_fills (strategy_id, pair, side, price, volume, timestamp)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&fill.strategy_id)
        .bind(&fill.pair)
        .bind(match fill.side {
            TradeSide::Buy => "BUY",
            TradeSide::Sell => "SELL",
        })
        .bind(fill.price.to_string())
        .bind(fill.volume.to_string())
        .bind(fill.timestamp)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Fetch one persisted run (tests, reporting).
    pub async fn get_run(&self, run_id: &str) -> Result<Option<BacktestRunRecord>, anyhow::Error> {
        self.init_tables().await?;
        let row = sqlx::query_as::<_, RunRow>(
            "SELECT run_id, strategy_id, strategy_name, asset, timeframe, data_tier,
                    start_time, end_time, starting_balance, ending_balance, total_pnl,
                    total_trades, win_rate, profit_factor, sharpe_ratio, max_drawdown,
                    status, data_file_hashes, parser_version, engine_version
             FROM backtest_runs WHERE run_id = ?",
        )
        .bind(run_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(RunRow::into_record).transpose()
    }
}

fn db_err(err: impl std::fmt::Display) -> BacktestError {
    BacktestError::Database(err.to_string())
}

#[async_trait]
impl RunStore for SqliteRunStore {
    async fn insert_run(&self, record: &BacktestRunRecord) -> Result<(), BacktestError> {
        self.init_tables().await.map_err(db_err)?;
        sqlx::query(
            "INSERT INTO backtest_runs (
                run_id, strategy_id, strategy_name, asset, timeframe, data_tier,
                start_time, end_time, starting_balance, ending_balance, total_pnl,
                total_trades, win_rate, profit_factor, sharpe_ratio, max_drawdown,
                status, data_file_hashes, parser_version, engine_version
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.run_id)
        .bind(&record.strategy_id)
        .bind(&record.strategy_name)
        .bind(&record.asset)
        .bind(&record.timeframe)
        .bind(&record.data_tier)
        .bind(record.start_time)
        .bind(record.end_time)
        .bind(record.starting_balance.to_string())
        .bind(record.ending_balance.to_string())
        .bind(record.total_pnl.to_string())
        .bind(record.total_trades)
        .bind(record.win_rate)
        .bind(record.profit_factor)
        .bind(record.sharpe_ratio)
        .bind(record.max_drawdown)
        .bind(record.status.as_str())
        .bind(&record.data_file_hashes)
        .bind(&record.parser_version)
        .bind(&record.engine_version)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }
}

#[async_trait]
impl TradeStore for SqliteRunStore {
    async fn get_trades_by_strategy(
        &self,
        strategy_id: &str,
    ) -> Result<Vec<TradeFill>, BacktestError> {
        self.init_tables().await.map_err(db_err)?;
        let rows = sqlx::query_as::<_, FillRow>(
            "SELECT strategy_id, pair, side, price, volume, timestamp
             FROM trade_fills WHERE strategy_id = ? ORDER BY timestamp, id",
        )
        .bind(strategy_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.into_iter().map(FillRow::into_fill).collect()
    }
}

/// Internal row types for sqlx deserialization.
#[derive(sqlx::FromRow)]
struct RunRow {
    run_id: String,
    strategy_id: String,
    strategy_name: String,
    asset: String,
    timeframe: String,
    data_tier: String,
    start_time: i64,
    end_time: i64,
    starting_balance: String,
    ending_balance: String,
    total_pnl: String,
    total_trades: i32,
    win_rate: f64,
    profit_factor: f64,
    sharpe_ratio: f64,
    max_drawdown: f64,
    status: String,
    data_file_hashes: String,
    parser_version: String,
    engine_version: String,
}

impl RunRow {
    fn into_record(self) -> Result<BacktestRunRecord, anyhow::Error> {
        let status = match self.status.as_str() {
            "EXCELLENT" => RunStatus::Excellent,
            "GOOD" => RunStatus::Good,
            "ACCEPTABLE" => RunStatus::Acceptable,
            _ => RunStatus::Failed,
        };
        Ok(BacktestRunRecord {
            run_id: self.run_id,
            strategy_id: self.strategy_id,
            strategy_name: self.strategy_name,
            asset: self.asset,
            timeframe: self.timeframe,
            data_tier: self.data_tier,
            start_time: self.start_time,
            end_time: self.end_time,
            starting_balance: Decimal::from_str(&self.starting_balance)?,
            ending_balance: Decimal::from_str(&self.ending_balance)?,
            total_pnl: Decimal::from_str(&self.total_pnl)?,
            total_trades: self.total_trades,
            win_rate: self.win_rate,
            profit_factor: self.profit_factor,
            sharpe_ratio: self.sharpe_ratio,
            max_drawdown: self.max_drawdown,
            status,
            data_file_hashes: self.data_file_hashes,
            parser_version: self.parser_version,
            engine_version: self.engine_version,
        })
    }
}

#[derive(sqlx::FromRow)]
struct FillRow {
    strategy_id: String,
    pair: String,
    side: String,
    price: String,
    volume: String,
    timestamp: i64,
}

impl FillRow {
    fn into_fill(self) -> Result<TradeFill, BacktestError> {
        let side = match self.side.as_str() {
            "BUY" => TradeSide::Buy,
            "SELL" => TradeSide::Sell,
            other => {
                return Err(BacktestError::Database(format!("unknown fill side: {other}")))
            }
        };
        let parse = |text: &str| {
            Decimal::from_str(text)
                .map_err(|e| BacktestError::Database(format!("bad decimal column: {e}")))
        };
        Ok(TradeFill {
            strategy_id: self.strategy_id,
            pair: self.pair,
            side,
            price: parse(&self.price)?,
            volume: parse(&self.volume)?,
            timestamp: self.timestamp,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    async fn store() -> SqliteRunStore {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        let store = SqliteRunStore::new(pool);
        store.init_tables().await.unwrap();
        store
    }

    fn record(run_id: &str) -> BacktestRunRecord {
        BacktestRunRecord {
            run_id: run_id.to_string(),
            strategy_id: "strat-1".to_string(),
            strategy_name: "SMA Cross".to_string(),
            asset: "BTC/USD".to_string(),
            timeframe: "1h".to_string(),
            data_tier: "PREMIUM".to_string(),
            start_time: 0,
            end_time: 86_400_000,
            starting_balance: dec!(10000),
            ending_balance: dec!(10456.78901234),
            total_pnl: dec!(456.78901234),
            total_trades: 7,
            win_rate: 57.14,
            profit_factor: 1.8,
            sharpe_ratio: 2.1,
            max_drawdown: 4.2,
            status: RunStatus::Good,
            data_file_hashes: r#"["sha256:abc"]"#.to_string(),
            parser_version: "1.0.0".to_string(),
            engine_version: "1.0.0".to_string(),
        }
    }

    #[tokio::test]
    async fn run_records_round_trip_with_provenance() {
        let store = store().await;
        store.insert_run(&record("bt_100")).await.unwrap();

        let loaded = store.get_run("bt_100").await.unwrap().unwrap();
        assert_eq!(loaded.ending_balance, dec!(10456.78901234));
        assert_eq!(loaded.status, RunStatus::Good);
        assert_eq!(loaded.data_file_hashes, r#"["sha256:abc"]"#);
        assert_eq!(loaded.parser_version, "1.0.0");
        assert!(store.get_run("bt_missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn fills_come_back_in_time_order() {
        let store = store().await;
        let mk = |side, price: Decimal, ts| TradeFill {
            strategy_id: "strat-1".to_string(),
            pair: "BTC/USD".to_string(),
            side,
            price,
            volume: dec!(1),
            timestamp: ts,
        };
        store.insert_fill(&mk(TradeSide::Sell, dec!(110), 2000)).await.unwrap();
        store.insert_fill(&mk(TradeSide::Buy, dec!(100), 1000)).await.unwrap();

        let fills = store.get_trades_by_strategy("strat-1").await.unwrap();
        assert_eq!(fills.len(), 2);
        assert_eq!(fills[0].side, TradeSide::Buy);
        assert_eq!(fills[1].price, dec!(110));
        assert!(store.get_trades_by_strategy("other").await.unwrap().is_empty());
    }
}
