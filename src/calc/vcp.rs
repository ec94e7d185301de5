//! VCP-style strength and new-high screen.
//!
//! A symbol is kept when it is either "strong" (stacked moving averages
//! with a rising long average, beating the market) or sitting at a
//! 52-week high (again beating the market). Missing inputs substitute
//! values that make the comparisons fail naturally, so a symbol with thin
//! history drops out instead of erroring.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::{group_by_symbol, indicators};
use crate::data::{IndexBar, PriceBar};

/// VCP screen parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VcpParams {
    #[serde(default = "default_ma_short")]
    pub ma_short: usize,
    #[serde(default = "default_ma_mid")]
    pub ma_mid: usize,
    #[serde(default = "default_ma_long")]
    pub ma_long: usize,
    /// Rows the long average must have risen over
    #[serde(default = "default_slope_lookback")]
    pub slope_lookback: usize,
    /// Return horizon compared against the market
    #[serde(default = "default_return_lookback")]
    pub return_lookback: usize,
    #[serde(default = "default_high_short")]
    pub high_short: usize,
    #[serde(default = "default_high_long")]
    pub high_long: usize,
    /// How close the short-window high must sit to the long-window high
    #[serde(default = "default_new_high_tolerance")]
    pub new_high_tolerance: f64,
}

impl Default for VcpParams {
    fn default() -> Self {
        Self {
            ma_short: default_ma_short(),
            ma_mid: default_ma_mid(),
            ma_long: default_ma_long(),
            slope_lookback: default_slope_lookback(),
            return_lookback: default_return_lookback(),
            high_short: default_high_short(),
            high_long: default_high_long(),
            new_high_tolerance: default_new_high_tolerance(),
        }
    }
}

fn default_ma_short() -> usize {
    50
}

fn default_ma_mid() -> usize {
    150
}

fn default_ma_long() -> usize {
    200
}

fn default_slope_lookback() -> usize {
    20
}

fn default_return_lookback() -> usize {
    20
}

fn default_high_short() -> usize {
    5
}

fn default_high_long() -> usize {
    252
}

fn default_new_high_tolerance() -> f64 {
    0.10
}

/// One symbol passing the VCP screen.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VcpMatch {
    pub stock_id: String,
    pub date: NaiveDate,
    pub close_price: f64,
    pub return_20d: Option<f64>,
    pub is_strong: bool,
    pub is_new_high: bool,
}

/// The VCP screen.
pub struct VcpFilter {
    params: VcpParams,
}

impl VcpFilter {
    pub fn new(params: VcpParams) -> Self {
        Self { params }
    }

    /// Run the screen over mixed-symbol history.
    ///
    /// `market_return` is the benchmark return over the same horizon;
    /// `target_date` defaults to the latest date present in the data.
    pub fn run(
        &self,
        bars: &[PriceBar],
        market_return: f64,
        target_date: Option<NaiveDate>,
    ) -> Vec<VcpMatch> {
        let target = match target_date.or_else(|| bars.iter().map(|b| b.date).max()) {
            Some(d) => d,
            None => return Vec::new(),
        };
        let p = &self.params;

        let mut matches = Vec::new();
        for (stock_id, series) in group_by_symbol(bars) {
            let idx = match series.iter().position(|b| b.date == target) {
                Some(i) => i,
                None => continue,
            };

            let closes: Vec<Option<f64>> = series.iter().map(|b| b.close).collect();
            let highs: Vec<Option<f64>> = series.iter().map(|b| b.high).collect();

            let ma_short = indicators::sma(&closes, p.ma_short);
            let ma_mid = indicators::sma(&closes, p.ma_mid);
            let ma_long = indicators::sma(&closes, p.ma_long);
            let slope = indicators::ma_slope(&ma_long, p.slope_lookback);
            let ret = indicators::pct_return(&closes, p.return_lookback);
            let high_short = indicators::rolling_max(&highs, p.high_short);
            let high_long = indicators::rolling_max(&highs, p.high_long);

            // Undefined-safe substitutions: each makes its comparison fail
            let close = closes[idx].unwrap_or(0.0);
            let m_short = ma_short[idx].unwrap_or(f64::INFINITY);
            let m_mid = ma_mid[idx].unwrap_or(f64::INFINITY);
            let m_long = ma_long[idx].unwrap_or(f64::INFINITY);
            let long_slope = slope[idx].unwrap_or(-1.0);
            let ret_value = ret[idx].unwrap_or(f64::NEG_INFINITY);
            let h_short = high_short[idx].unwrap_or(0.0);
            let h_long = high_long[idx].unwrap_or(0.0);

            let beats_market = ret_value > market_return;
            let is_strong = close > m_short
                && m_short > m_mid
                && m_mid > m_long
                && long_slope > 0.0
                && beats_market;
            let is_new_high = h_long > 0.0
                && (h_short / h_long - 1.0).abs() <= p.new_high_tolerance
                && beats_market;

            if is_strong || is_new_high {
                matches.push(VcpMatch {
                    stock_id,
                    date: target,
                    close_price: close,
                    return_20d: ret[idx],
                    is_strong,
                    is_new_high,
                });
            }
        }
        matches
    }
}

impl Default for VcpFilter {
    fn default() -> Self {
        Self::new(VcpParams::default())
    }
}

/// Benchmark trailing return ending at the last index row at or before
/// `target_date`.
///
/// The lookback shrinks to the available history; anything unusable
/// degrades to `0.0` with a warning rather than failing the run.
pub fn market_return(index: &[IndexBar], target_date: NaiveDate, lookback: usize) -> f64 {
    let mut sorted: Vec<&IndexBar> = index.iter().collect();
    sorted.sort_by_key(|b| b.date);

    let end = match sorted.iter().rposition(|b| b.date <= target_date) {
        Some(i) => i,
        None => {
            warn!(target = %target_date, "No index data at or before target, using 0.0");
            return 0.0;
        }
    };

    let effective = lookback.min(end);
    if effective == 0 {
        warn!(target = %target_date, "No index history before target, using 0.0");
        return 0.0;
    }
    if effective < lookback {
        warn!(
            requested = lookback,
            effective,
            "Index history shorter than lookback, shrinking"
        );
    }

    let base = sorted[end - effective].level;
    if base == 0.0 {
        warn!("Index base level is zero, using 0.0");
        return 0.0;
    }
    sorted[end].level / base - 1.0
}
