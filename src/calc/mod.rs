//! Pure calculation layer: rolling indicators and the two screens.

pub mod bloom;
pub mod indicators;
pub mod vcp;

pub use bloom::{BloomFilter, BloomMatch, BloomParams};
pub use vcp::{market_return, VcpFilter, VcpMatch, VcpParams};

use crate::data::PriceBar;
use std::collections::BTreeMap;

/// Partition mixed bars into per-symbol, date-sorted histories.
pub fn group_by_symbol(bars: &[PriceBar]) -> BTreeMap<String, Vec<PriceBar>> {
    let mut grouped: BTreeMap<String, Vec<PriceBar>> = BTreeMap::new();
    for bar in bars {
        grouped.entry(bar.stock_id.clone()).or_default().push(bar.clone());
    }
    for series in grouped.values_mut() {
        series.sort_by_key(|b| b.date);
    }
    grouped
}
