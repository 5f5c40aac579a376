use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::BacktestError;

/// A single immutable OHLCV bar. `timestamp` is milliseconds since epoch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceBar {
    pub timestamp: i64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

impl PriceBar {
    /// Check the OHLC envelope: `low <= open,close <= high`, positive
    /// prices, non-negative volume.
    pub fn validate(&self) -> Result<(), BacktestError> {
        if self.open <= Decimal::ZERO
            || self.high <= Decimal::ZERO
            || self.low <= Decimal::ZERO
            || self.close <= Decimal::ZERO
        {
            return Err(BacktestError::InvalidInput(format!(
                "bar at {} has a non-positive price",
                self.timestamp
            )));
        }
        if self.low > self.open || self.low > self.close || self.high < self.open || self.high < self.close {
            return Err(BacktestError::InvalidInput(format!(
                "bar at {} violates low <= open,close <= high",
                self.timestamp
            )));
        }
        if self.volume < Decimal::ZERO {
            return Err(BacktestError::InvalidInput(format!(
                "bar at {} has negative volume",
                self.timestamp
            )));
        }
        Ok(())
    }
}

/// Validate a full run input: every bar well-formed, timestamps strictly
/// increasing.
pub fn validate_sequence(bars: &[PriceBar]) -> Result<(), BacktestError> {
    for bar in bars {
        bar.validate()?;
    }
    for pair in bars.windows(2) {
        if pair[1].timestamp <= pair[0].timestamp {
            return Err(BacktestError::InvalidInput(format!(
                "bars out of order: {} follows {}",
                pair[1].timestamp, pair[0].timestamp
            )));
        }
    }
    Ok(())
}

/// Canonical chart timeframe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    Minute1,
    Minute5,
    Minute15,
    Minute30,
    Hour1,
    Hour4,
    Day1,
    Week1,
}

impl Timeframe {
    pub const ALL: [Timeframe; 8] = [
        Timeframe::Minute1,
        Timeframe::Minute5,
        Timeframe::Minute15,
        Timeframe::Minute30,
        Timeframe::Hour1,
        Timeframe::Hour4,
        Timeframe::Day1,
        Timeframe::Week1,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::Minute1 => "1m",
            Timeframe::Minute5 => "5m",
            Timeframe::Minute15 => "15m",
            Timeframe::Minute30 => "30m",
            Timeframe::Hour1 => "1h",
            Timeframe::Hour4 => "4h",
            Timeframe::Day1 => "1d",
            Timeframe::Week1 => "1w",
        }
    }

    pub fn parse(tag: &str) -> Option<Timeframe> {
        Timeframe::ALL.into_iter().find(|tf| tf.as_str() == tag)
    }

    pub fn duration_ms(&self) -> i64 {
        match self {
            Timeframe::Minute1 => 60_000,
            Timeframe::Minute5 => 300_000,
            Timeframe::Minute15 => 900_000,
            Timeframe::Minute30 => 1_800_000,
            Timeframe::Hour1 => 3_600_000,
            Timeframe::Hour4 => 14_400_000,
            Timeframe::Day1 => 86_400_000,
            Timeframe::Week1 => 604_800_000,
        }
    }

    /// Bar periods per year on the 24/7 crypto calendar (365.25 days).
    pub fn periods_per_year(&self) -> f64 {
        match self {
            Timeframe::Minute1 => 525_960.0,
            Timeframe::Minute5 => 105_192.0,
            Timeframe::Minute15 => 35_064.0,
            Timeframe::Minute30 => 17_532.0,
            Timeframe::Hour1 => 8_766.0,
            Timeframe::Hour4 => 2_191.5,
            Timeframe::Day1 => 365.25,
            Timeframe::Week1 => 52.0,
        }
    }

    /// Infer the timeframe from the median inter-bar delta. Returns the
    /// canonical tag whose duration is closest to the observed cadence.
    pub fn detect(bars: &[PriceBar]) -> Option<Timeframe> {
        if bars.len() < 2 {
            return None;
        }
        let mut deltas: Vec<i64> = bars
            .windows(2)
            .map(|pair| pair[1].timestamp - pair[0].timestamp)
            .collect();
        deltas.sort_unstable();
        let median = deltas[deltas.len() / 2];
        Timeframe::ALL
            .into_iter()
            .min_by_key(|tf| (tf.duration_ms() - median).abs())
    }
}

/// Declared quality class of a dataset, best first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataTier {
    Premium,
    Professional,
    Standard,
    Basic,
}

impl DataTier {
    pub fn tier_name(&self) -> &'static str {
        match self {
            DataTier::Premium => "PREMIUM",
            DataTier::Professional => "PROFESSIONAL",
            DataTier::Standard => "STANDARD",
            DataTier::Basic => "BASIC",
        }
    }

    pub fn parse(name: &str) -> Option<DataTier> {
        match name {
            "PREMIUM" => Some(DataTier::Premium),
            "PROFESSIONAL" => Some(DataTier::Professional),
            "STANDARD" => Some(DataTier::Standard),
            "BASIC" => Some(DataTier::Basic),
            _ => None,
        }
    }

    /// Premium and Professional data is trusted for production evaluation.
    pub fn is_production_grade(&self) -> bool {
        matches!(self, DataTier::Premium | DataTier::Professional)
    }
}

/// A stored bar together with the tier tag of the dataset it came from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaggedBar {
    pub bar: PriceBar,
    pub tier: DataTier,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Conservative,
    Moderate,
    Aggressive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradingMode {
    Paper,
    Live,
}

/// A declarative trading strategy. Immutable for the duration of a run;
/// the entry/exit conditions are opaque to everything but the evaluator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Strategy {
    pub id: String,
    pub name: String,
    pub entry_conditions: Vec<String>,
    pub exit_conditions: Vec<String>,
    /// Fraction of the balance committed per entry, in (0, 100].
    pub position_size_percent: Decimal,
    /// 0 disables the stop.
    pub stop_loss_percent: Decimal,
    /// 0 disables the target.
    pub take_profit_percent: Decimal,
    pub trading_pairs: Vec<String>,
    /// Exits prefer maker execution when set.
    pub post_only: bool,
    pub risk_level: RiskLevel,
    pub trading_mode: TradingMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SignalAction {
    Buy,
    Sell,
    Hold,
}

/// What the evaluator hands back for one bar.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub action: SignalAction,
    pub pair: String,
    pub reason: String,
}

/// The market as visible to the evaluator at decision time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub pair: String,
    pub price: Decimal,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioSnapshot {
    pub balance: Decimal,
    pub open_position_value: Decimal,
}

/// Coverage summary a bar store reports for one (asset, timeframe).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataCoverage {
    pub earliest: i64,
    pub latest: i64,
    pub total_bars: i64,
    pub expected_bars: i64,
    pub gaps_count: i64,
    pub quality_score: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeSide {
    Buy,
    Sell,
}

/// A raw executed fill as recorded by a trade store. FIFO-paired into
/// round trips for per-strategy reporting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeFill {
    pub strategy_id: String,
    pub pair: String,
    pub side: TradeSide,
    pub price: Decimal,
    pub volume: Decimal,
    pub timestamp: i64,
}
