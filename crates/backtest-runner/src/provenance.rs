use std::fmt::Write as _;

use sha2::{Digest, Sha256};

use backtest_core::{DataTier, PriceBar, Timeframe};

/// Version of the bar ingestion/parsing pipeline. Independent of the
/// engine and cost-model versions.
pub const PARSER_VERSION: &str = "1.0.0";

/// Version of the simulation engine semantics.
pub const ENGINE_VERSION: &str = "1.0.0";

/// Deterministic digest of one run's dataset:
/// `asset|timeframe|tier|` followed by `ts|o|h|l|c|v|` per bar, in order.
/// Any single changed field changes the hash.
pub fn dataset_hash(asset: &str, timeframe: Timeframe, tier: DataTier, bars: &[PriceBar]) -> String {
    let mut canonical = String::with_capacity(64 + bars.len() * 48);
    let _ = write!(
        canonical,
        "{}|{}|{}|",
        asset,
        timeframe.as_str(),
        tier.tier_name()
    );
    for bar in bars {
        let _ = write!(
            canonical,
            "{}|{}|{}|{}|{}|{}|",
            bar.timestamp, bar.open, bar.high, bar.low, bar.close, bar.volume
        );
    }
    format!("sha256:{}", hex::encode(Sha256::digest(canonical.as_bytes())))
}

/// The persisted `data_file_hashes` field: a JSON array of hash strings.
pub fn hashes_json(hashes: &[String]) -> String {
    serde_json::to_string(hashes).unwrap_or_else(|_| "[]".to_string())
}
