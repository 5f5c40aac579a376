use serde::{Deserialize, Serialize};

use backtest_core::{
    validate_sequence, BacktestError, BarStore, DataTier, PriceBar, TaggedBar, Timeframe,
};

/// Requested when no timeframe is given and coverage offers no hint.
const DEFAULT_TIMEFRAME: Timeframe = Timeframe::Hour1;

/// What the caller asks for. Everything but the asset may be left to
/// auto-resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataRequest {
    pub asset: String,
    #[serde(default)]
    pub timeframe: Option<Timeframe>,
    #[serde(default)]
    pub tier: Option<DataTier>,
    #[serde(default)]
    pub start_ts: Option<i64>,
    #[serde(default)]
    pub end_ts: Option<i64>,
}

impl DataRequest {
    pub fn for_asset(asset: &str) -> Self {
        Self {
            asset: asset.to_string(),
            timeframe: None,
            tier: None,
            start_ts: None,
            end_ts: None,
        }
    }
}

/// A fully resolved run input: the concrete tier/timeframe/range plus the
/// loaded bars (`tagged` keeps the per-row tier tags for validation).
#[derive(Debug, Clone)]
pub struct DataSelection {
    pub asset: String,
    pub timeframe: Timeframe,
    pub tier: DataTier,
    pub start_ts: i64,
    pub end_ts: i64,
    pub bars: Vec<PriceBar>,
    pub tagged: Vec<TaggedBar>,
}

/// Resolves tier, timeframe and date range against a bar store and loads
/// the bars for one run. Explicit request fields always win; the rest is
/// derived from coverage and the tiers actually present.
pub struct DataProvider<S: BarStore> {
    store: S,
}

impl<S: BarStore> DataProvider<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub async fn select(&self, request: &DataRequest) -> Result<DataSelection, BacktestError> {
        let timeframe = request.timeframe.unwrap_or(DEFAULT_TIMEFRAME);

        let (start_ts, end_ts) = match (request.start_ts, request.end_ts) {
            (Some(start), Some(end)) => (start, end),
            _ => {
                let coverage = self
                    .store
                    .get_coverage(&request.asset, timeframe)
                    .await?
                    .ok_or_else(|| {
                        BacktestError::InvalidInput(format!(
                            "no coverage for {} {}",
                            request.asset,
                            timeframe.as_str()
                        ))
                    })?;
                (
                    request.start_ts.unwrap_or(coverage.earliest),
                    request.end_ts.unwrap_or(coverage.latest),
                )
            }
        };
        if start_ts > end_ts {
            return Err(BacktestError::InvalidInput(format!(
                "empty date range: {start_ts} > {end_ts}"
            )));
        }

        let tier = match request.tier {
            Some(tier) => tier,
            None => self.auto_tier(&request.asset, timeframe).await?,
        };

        let tagged = self
            .store
            .get_bars_in_range(&request.asset, timeframe, start_ts, end_ts)
            .await?;
        if tagged.is_empty() {
            return Err(BacktestError::InvalidInput(format!(
                "no bars for {} {} in range",
                request.asset,
                timeframe.as_str()
            )));
        }

        let bars: Vec<PriceBar> = tagged.iter().map(|t| t.bar.clone()).collect();
        validate_sequence(&bars)?;

        tracing::debug!(
            asset = %request.asset,
            timeframe = timeframe.as_str(),
            tier = tier.tier_name(),
            bars = bars.len(),
            "resolved backtest dataset"
        );

        Ok(DataSelection {
            asset: request.asset.clone(),
            timeframe,
            tier,
            start_ts,
            end_ts,
            bars,
            tagged,
        })
    }

    /// Best production-grade tier present, falling back to the best
    /// available. Mixed-tier datasets still fail tier validation later;
    /// this only names the expectation.
    async fn auto_tier(&self, asset: &str, timeframe: Timeframe) -> Result<DataTier, BacktestError> {
        let tiers = self.store.get_distinct_data_tiers(asset, timeframe).await?;
        tiers
            .iter()
            .copied()
            .find(DataTier::is_production_grade)
            .or_else(|| tiers.first().copied())
            .ok_or_else(|| {
                BacktestError::InvalidInput(format!(
                    "no data tiers recorded for {} {}",
                    asset,
                    timeframe.as_str()
                ))
            })
    }
}
