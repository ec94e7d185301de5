//! Rolling-window primitives.
//!
//! All functions take a date-sorted series for one symbol, with missing
//! observations as `None`, and return a vector aligned index-for-index with
//! the input. Each primitive has its own validity rule, so `None` in means
//! a well-defined `None` out, never a poisoned calculation.

/// Simple moving average over a full window: every observation in the
/// window must be present.
pub fn sma(values: &[Option<f64>], period: usize) -> Vec<Option<f64>> {
    let period = period.max(1);
    let mut out = vec![None; values.len()];
    for i in 0..values.len() {
        if i + 1 < period {
            continue;
        }
        let window = &values[i + 1 - period..=i];
        if window.iter().all(Option::is_some) {
            let sum: f64 = window.iter().flatten().sum();
            out[i] = Some(sum / period as f64);
        }
    }
    out
}

fn rolling_extreme(
    values: &[Option<f64>],
    period: usize,
    pick_max: bool,
) -> Vec<Option<f64>> {
    let period = period.max(1);
    // Partial head windows count, as long as enough observations exist
    let min_required = (period / 2).max(1);
    let mut out = vec![None; values.len()];
    for i in 0..values.len() {
        let lo = (i + 1).saturating_sub(period);
        let window: Vec<f64> = values[lo..=i].iter().flatten().copied().collect();
        if window.len() >= min_required {
            let extreme = window
                .iter()
                .copied()
                .fold(if pick_max { f64::NEG_INFINITY } else { f64::INFINITY }, |acc, v| {
                    if pick_max {
                        acc.max(v)
                    } else {
                        acc.min(v)
                    }
                });
            out[i] = Some(extreme);
        }
    }
    out
}

/// Rolling maximum; requires at least `max(period / 2, 1)` observations.
pub fn rolling_max(values: &[Option<f64>], period: usize) -> Vec<Option<f64>> {
    rolling_extreme(values, period, true)
}

/// Rolling minimum; same validity rule as [`rolling_max`].
pub fn rolling_min(values: &[Option<f64>], period: usize) -> Vec<Option<f64>> {
    rolling_extreme(values, period, false)
}

/// Percentage return over `period` rows: `v[t] / v[t - period] - 1`.
/// Undefined when either endpoint is missing or the base is zero.
pub fn pct_return(values: &[Option<f64>], period: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; values.len()];
    if period == 0 {
        return out;
    }
    for i in period..values.len() {
        if let (Some(now), Some(base)) = (values[i], values[i - period]) {
            if base != 0.0 {
                out[i] = Some(now / base - 1.0);
            }
        }
    }
    out
}

/// Second-highest value in a growing window clamped to `period` rows.
/// Needs at least two observations; duplicates count separately.
pub fn second_highest(values: &[Option<f64>], period: usize) -> Vec<Option<f64>> {
    let period = period.max(1);
    let mut out = vec![None; values.len()];
    for i in 0..values.len() {
        let lo = (i + 1).saturating_sub(period);
        let mut window: Vec<f64> = values[lo..=i].iter().flatten().copied().collect();
        if window.len() < 2 {
            continue;
        }
        window.sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));
        out[i] = Some(window[1]);
    }
    out
}

/// Difference of a moving average against itself `lookback` rows earlier.
pub fn ma_slope(ma: &[Option<f64>], lookback: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; ma.len()];
    if lookback == 0 {
        return out;
    }
    for i in lookback..ma.len() {
        if let (Some(now), Some(then)) = (ma[i], ma[i - lookback]) {
            out[i] = Some(now - then);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn series(v: &[f64]) -> Vec<Option<f64>> {
        v.iter().copied().map(Some).collect()
    }

    #[test]
    fn test_sma_full_window_only() {
        let out = sma(&series(&[1.0, 2.0, 3.0, 4.0]), 3);
        assert_eq!(out, vec![None, None, Some(2.0), Some(3.0)]);
    }

    #[test]
    fn test_sma_gap_invalidates_window() {
        let values = vec![Some(1.0), None, Some(3.0), Some(4.0), Some(5.0)];
        let out = sma(&values, 3);
        assert_eq!(out[2], None);
        assert_eq!(out[3], None);
        assert_eq!(out[4], Some(4.0));
    }

    #[test]
    fn test_rolling_max_partial_head() {
        // period 4, min_required 2: defined from the second row on
        let out = rolling_max(&series(&[1.0, 5.0, 3.0, 2.0, 4.0]), 4);
        assert_eq!(out, vec![None, Some(5.0), Some(5.0), Some(5.0), Some(5.0)]);
    }

    #[test]
    fn test_rolling_max_window_slides() {
        let out = rolling_max(&series(&[9.0, 1.0, 2.0, 3.0]), 2);
        assert_eq!(out[3], Some(3.0));
    }

    #[test]
    fn test_rolling_min() {
        let out = rolling_min(&series(&[5.0, 1.0, 3.0]), 2);
        assert_eq!(out, vec![Some(5.0), Some(1.0), Some(1.0)]);
    }

    #[test]
    fn test_rolling_extreme_tolerates_gaps() {
        let values = vec![Some(1.0), None, None, None];
        // period 4, min_required 2, only one observation
        let out = rolling_max(&values, 4);
        assert_eq!(out[3], None);
    }

    #[test]
    fn test_pct_return() {
        let out = pct_return(&series(&[100.0, 110.0, 121.0]), 1);
        assert_eq!(out[0], None);
        assert!((out[1].unwrap() - 0.1).abs() < 1e-12);
        assert!((out[2].unwrap() - 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_pct_return_zero_base_undefined() {
        let out = pct_return(&series(&[0.0, 10.0]), 1);
        assert_eq!(out[1], None);
    }

    #[test]
    fn test_second_highest_needs_two() {
        let out = second_highest(&series(&[5.0]), 55);
        assert_eq!(out, vec![None]);
    }

    #[test]
    fn test_second_highest_growing_window() {
        let out = second_highest(&series(&[3.0, 7.0, 5.0]), 55);
        assert_eq!(out, vec![None, Some(3.0), Some(5.0)]);
    }

    #[test]
    fn test_second_highest_duplicates_count() {
        let out = second_highest(&series(&[7.0, 7.0, 1.0]), 55);
        assert_eq!(out[2], Some(7.0));
    }

    #[test]
    fn test_second_highest_window_clamped() {
        let out = second_highest(&series(&[9.0, 1.0, 2.0, 3.0]), 2);
        // Window [2, 3]: second highest is 2
        assert_eq!(out[3], Some(2.0));
    }

    #[test]
    fn test_ma_slope() {
        let ma = series(&[1.0, 2.0, 4.0]);
        let out = ma_slope(&ma, 2);
        assert_eq!(out, vec![None, None, Some(3.0)]);
    }

    #[test]
    fn test_ma_slope_missing_endpoint() {
        let ma = vec![None, Some(2.0), Some(4.0)];
        let out = ma_slope(&ma, 2);
        assert_eq!(out[2], None);
    }
}
