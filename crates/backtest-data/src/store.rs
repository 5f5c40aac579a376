use std::str::FromStr;

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::SqlitePool;

use backtest_core::{
    BacktestError, BarStore, DataCoverage, DataTier, PriceBar, TaggedBar, Timeframe,
};

/// Inter-bar deltas beyond this multiple of the timeframe duration count
/// as gaps when scoring coverage.
const GAP_FACTOR: f64 = 1.5;

/// SQLite-backed bar store. Monetary columns are stored as TEXT and
/// re-parsed into `Decimal` so a dataset reads back bit-exact.
pub struct SqliteBarStore {
    pool: SqlitePool,
}

impl SqliteBarStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn init_tables(&self) -> Result<(), anyhow::Error> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS price_bars (
                asset TEXT NOT NULL,
                timeframe TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                open TEXT NOT NULL,
                high TEXT NOT NULL,
                low TEXT NOT NULL,
                close TEXT NOT NULL,
                volume TEXT NOT NULL,
                data_tier TEXT NOT NULL,
                PRIMARY KEY (asset, timeframe, timestamp)
            )",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Bulk-seed a dataset (fixtures, imports).
    pub async fn insert_bars(
        &self,
        asset: &str,
        timeframe: Timeframe,
        tier: DataTier,
        bars: &[PriceBar],
    ) -> Result<(), anyhow::Error> {
        self.init_tables().await?;
        for bar in bars {
            sqlx::query(
                "INSERT OR REPLACE INTO price_bars
                    (asset, timeframe, timestamp, open, high, low, close, volume, data_tier)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(asset)
            .bind(timeframe.as_str())
            .bind(bar.timestamp)
            .bind(bar.open.to_string())
            .bind(bar.high.to_string())
            .bind(bar.low.to_string())
            .bind(bar.close.to_string())
            .bind(bar.volume.to_string())
            .bind(tier.tier_name())
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }
}

/// Internal row type for sqlx deserialization.
#[derive(sqlx::FromRow)]
struct BarRow {
    timestamp: i64,
    open: String,
    high: String,
    low: String,
    close: String,
    volume: String,
    data_tier: String,
}

impl BarRow {
    fn into_tagged(self) -> Result<TaggedBar, BacktestError> {
        let parse = |text: &str| {
            Decimal::from_str(text)
                .map_err(|e| BacktestError::Database(format!("bad decimal column: {e}")))
        };
        let tier = DataTier::parse(&self.data_tier).ok_or_else(|| {
            BacktestError::Database(format!("unknown data tier: {}", self.data_tier))
        })?;
        Ok(TaggedBar {
            bar: PriceBar {
                timestamp: self.timestamp,
                open: parse(&self.open)?,
                high: parse(&self.high)?,
                low: parse(&self.low)?,
                close: parse(&self.close)?,
                volume: parse(&self.volume)?,
            },
            tier,
        })
    }
}

fn db_err(err: sqlx::Error) -> BacktestError {
    BacktestError::Database(err.to_string())
}

#[async_trait]
impl BarStore for SqliteBarStore {
    async fn get_bars_in_range(
        &self,
        asset: &str,
        timeframe: Timeframe,
        start_ts: i64,
        end_ts: i64,
    ) -> Result<Vec<TaggedBar>, BacktestError> {
        let rows = sqlx::query_as::<_, BarRow>(
            "SELECT timestamp, open, high, low, close, volume, data_tier
             FROM price_bars
             WHERE asset = ? AND timeframe = ? AND timestamp BETWEEN ? AND ?
             ORDER BY timestamp",
        )
        .bind(asset)
        .bind(timeframe.as_str())
        .bind(start_ts)
        .bind(end_ts)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.into_iter().map(BarRow::into_tagged).collect()
    }

    async fn get_coverage(
        &self,
        asset: &str,
        timeframe: Timeframe,
    ) -> Result<Option<DataCoverage>, BacktestError> {
        let timestamps: Vec<(i64,)> = sqlx::query_as(
            "SELECT timestamp FROM price_bars
             WHERE asset = ? AND timeframe = ?
             ORDER BY timestamp",
        )
        .bind(asset)
        .bind(timeframe.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        if timestamps.is_empty() {
            return Ok(None);
        }

        let earliest = timestamps[0].0;
        let latest = timestamps[timestamps.len() - 1].0;
        let total_bars = timestamps.len() as i64;
        let duration = timeframe.duration_ms();
        let expected_bars = (latest - earliest) / duration + 1;

        let gap_threshold = (duration as f64 * GAP_FACTOR) as i64;
        let mut gaps_count = 0i64;
        let mut missed = 0i64;
        for pair in timestamps.windows(2) {
            let delta = pair[1].0 - pair[0].0;
            if delta > gap_threshold {
                gaps_count += 1;
                missed += delta / duration - 1;
            }
        }
        let gap_fraction = missed as f64 / expected_bars as f64;
        let quality_score =
            ((total_bars as f64 / expected_bars as f64) * (1.0 - gap_fraction)).clamp(0.0, 1.0);

        Ok(Some(DataCoverage {
            earliest,
            latest,
            total_bars,
            expected_bars,
            gaps_count,
            quality_score,
        }))
    }

    async fn get_distinct_data_tiers(
        &self,
        asset: &str,
        timeframe: Timeframe,
    ) -> Result<Vec<DataTier>, BacktestError> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT DISTINCT data_tier FROM price_bars WHERE asset = ? AND timeframe = ?",
        )
        .bind(asset)
        .bind(timeframe.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let mut tiers: Vec<DataTier> = rows
            .into_iter()
            .filter_map(|(name,)| DataTier::parse(&name))
            .collect();
        tiers.sort();
        Ok(tiers)
    }
}
