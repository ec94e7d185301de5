//! Three-line bloom screen.
//!
//! Close stacked above three short moving averages while printing the
//! highest close of the lookback window. The gap ratio against the
//! second-highest close measures how far the breakout stretched.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::{group_by_symbol, indicators};
use crate::data::PriceBar;

/// Bloom screen parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BloomParams {
    #[serde(default = "default_ma_fast")]
    pub ma_fast: usize,
    #[serde(default = "default_ma_mid")]
    pub ma_mid: usize,
    #[serde(default = "default_ma_slow")]
    pub ma_slow: usize,
    /// Window for the close-based high and second-highest close
    #[serde(default = "default_high_lookback")]
    pub high_lookback: usize,
}

impl Default for BloomParams {
    fn default() -> Self {
        Self {
            ma_fast: default_ma_fast(),
            ma_mid: default_ma_mid(),
            ma_slow: default_ma_slow(),
            high_lookback: default_high_lookback(),
        }
    }
}

fn default_ma_fast() -> usize {
    8
}

fn default_ma_mid() -> usize {
    21
}

fn default_ma_slow() -> usize {
    55
}

fn default_high_lookback() -> usize {
    55
}

/// One symbol passing the bloom screen.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BloomMatch {
    pub stock_id: String,
    pub date: NaiveDate,
    pub today_price: f64,
    /// Raw second-highest close; `None` marks the gap ratio as unreliable
    pub second_high_55d: Option<f64>,
    pub gap_ratio: f64,
}

/// The three-line bloom screen.
pub struct BloomFilter {
    params: BloomParams,
}

impl BloomFilter {
    pub fn new(params: BloomParams) -> Self {
        Self { params }
    }

    /// Run the screen; `target_date` defaults to the latest date present.
    pub fn run(&self, bars: &[PriceBar], target_date: Option<NaiveDate>) -> Vec<BloomMatch> {
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

            let ma_fast = indicators::sma(&closes, p.ma_fast);
            let ma_mid = indicators::sma(&closes, p.ma_mid);
            let ma_slow = indicators::sma(&closes, p.ma_slow);
            // Close-based high: the breakout reference is the close series
            let high = indicators::rolling_max(&closes, p.high_lookback);
            let second = indicators::second_highest(&closes, p.high_lookback);

            let close = closes[idx].unwrap_or(0.0);
            let m_fast = ma_fast[idx].unwrap_or(f64::INFINITY);
            let m_mid = ma_mid[idx].unwrap_or(f64::INFINITY);
            let m_slow = ma_slow[idx].unwrap_or(f64::INFINITY);
            // Undefined high never satisfies close >= high
            let h = high[idx].unwrap_or(f64::INFINITY);

            let blooming =
                close > m_fast && m_fast > m_mid && m_mid > m_slow && close >= h;
            if !blooming {
                continue;
            }

            // Divide-by-zero guard: an undefined or zero second high
            // defaults to 1, flagged by the raw Option staying None/zero
            let raw_second = second[idx];
            let denominator = match raw_second {
                Some(v) if v != 0.0 => v,
                _ => 1.0,
            };
            matches.push(BloomMatch {
                stock_id,
                date: target,
                today_price: close,
                second_high_55d: raw_second,
                gap_ratio: close / denominator - 1.0,
            });
        }
        matches
    }
}

impl Default for BloomFilter {
    fn default() -> Self {
        Self::new(BloomParams::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(n: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + chrono::Duration::days(n as i64 - 1)
    }

    fn bars_from_closes(stock_id: &str, closes: &[f64]) -> Vec<PriceBar> {
        closes
            .iter()
            .enumerate()
            .map(|(i, c)| PriceBar {
                stock_id: stock_id.to_string(),
                date: day(i as u32 + 1),
                open: Some(*c),
                high: Some(*c),
                low: Some(*c),
                close: Some(*c),
                volume: Some(1000.0),
            })
            .collect()
    }

    /// Accelerating uptrend: every average stacked, last close the highest.
    fn accelerating(len: usize) -> Vec<f64> {
        (0..len).map(|i| 100.0 * 1.01f64.powi(i as i32)).collect()
    }

    #[test]
    fn test_accelerating_uptrend_blooms() {
        let bars = bars_from_closes("2330", &accelerating(80));
        let matches = BloomFilter::default().run(&bars, None);

        assert_eq!(matches.len(), 1);
        let m = &matches[0];
        assert!(m.gap_ratio > 0.0);
        // Second-highest is the previous close, one percent below
        let second = m.second_high_55d.unwrap();
        assert!((m.today_price / second - 1.0 - m.gap_ratio).abs() < 1e-12);
        assert!((m.gap_ratio - 0.01).abs() < 1e-4);
    }

    #[test]
    fn test_below_high_rejected() {
        // Uptrend that ends with a pullback below the window high
        let mut closes = accelerating(80);
        closes.push(closes[78] * 0.95);
        let bars = bars_from_closes("2330", &closes);
        let matches = BloomFilter::default().run(&bars, None);
        assert!(matches.is_empty());
    }

    #[test]
    fn test_flat_series_rejected() {
        // Averages equal, strict ordering fails
        let bars = bars_from_closes("2330", &vec![100.0; 80]);
        let matches = BloomFilter::default().run(&bars, None);
        assert!(matches.is_empty());
    }

    #[test]
    fn test_thin_history_rejected() {
        // Too short for the slow average; undefined values must not match
        let bars = bars_from_closes("2330", &accelerating(20));
        let matches = BloomFilter::default().run(&bars, None);
        assert!(matches.is_empty());
    }

    #[test]
    fn test_zero_second_high_defaults_denominator() {
        // Window [0, 0, 0, 10]: second-highest close is 0, so the gap
        // denominator falls back to 1 and the raw value flags it
        let bars = bars_from_closes("1111", &[0.0, 0.0, 0.0, 10.0]);
        let params = BloomParams {
            ma_fast: 2,
            ma_mid: 3,
            ma_slow: 4,
            high_lookback: 5,
        };
        let matches = BloomFilter::new(params).run(&bars, None);

        assert_eq!(matches.len(), 1);
        let m = &matches[0];
        assert_eq!(m.second_high_55d, Some(0.0));
        assert!((m.gap_ratio - 9.0).abs() < 1e-12);
    }
}
