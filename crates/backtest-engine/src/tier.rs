use backtest_core::{BacktestError, DataTier, TaggedBar, Timeframe};

/// Acceptable relative deviation between the observed and expected bar
/// counts for the covered span.
const COUNT_TOLERANCE: f64 = 0.25;

/// Inter-bar deltas beyond this multiple of the timeframe duration count
/// as gaps.
const GAP_FACTOR: f64 = 1.5;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TierReport {
    pub tier: DataTier,
    /// `(actual / expected) x (1 - gap fraction)`, clamped to [0, 1].
    pub quality_score: f64,
}

/// Check that every OHLC entity in the run carries the same tier tag and
/// that the series is dense enough for its own span, and score its quality.
pub fn validate_tier(tagged: &[TaggedBar], timeframe: Timeframe) -> Result<TierReport, BacktestError> {
    let first = tagged.first().ok_or_else(|| {
        BacktestError::TierValidation("no OHLC entities supplied for tier validation".to_string())
    })?;

    let tier = first.tier;
    if let Some(other) = tagged.iter().find(|t| t.tier != tier) {
        return Err(BacktestError::TierValidation(format!(
            "mixed data tiers in run: {} and {}",
            tier.tier_name(),
            other.tier.tier_name()
        )));
    }

    let duration = timeframe.duration_ms();
    let span = tagged.last().map(|t| t.bar.timestamp).unwrap_or(first.bar.timestamp)
        - first.bar.timestamp;
    let expected = span / duration + 1;
    let actual = tagged.len() as i64;

    let deviation = (actual - expected).abs() as f64 / expected as f64;
    if deviation > COUNT_TOLERANCE {
        return Err(BacktestError::TierValidation(format!(
            "bar count {} deviates from expected {} beyond tolerance",
            actual, expected
        )));
    }

    let gap_threshold = (duration as f64 * GAP_FACTOR) as i64;
    let mut missed: i64 = 0;
    for pair in tagged.windows(2) {
        let delta = pair[1].bar.timestamp - pair[0].bar.timestamp;
        if delta > gap_threshold {
            missed += delta / duration - 1;
        }
    }
    let gap_fraction = missed as f64 / expected as f64;
    let quality_score = ((actual as f64 / expected as f64) * (1.0 - gap_fraction)).clamp(0.0, 1.0);

    Ok(TierReport { tier, quality_score })
}
