//! Technical indicators
//!
//! Pure per-bar series computations over daily OHLCV data. Windowed
//! indicators return `None` for the undefined prefix and for any
//! zero-division condition; downstream filters treat `None` as failing,
//! never as zero.

use crate::types::Bar;

/// Calculate Simple Moving Average
pub fn sma(values: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut result = Vec::with_capacity(values.len());

    for i in 0..values.len() {
        if period == 0 || i + 1 < period {
            result.push(None);
        } else {
            let sum: f64 = values[i + 1 - period..=i].iter().sum();
            result.push(Some(sum / period as f64));
        }
    }

    result
}

/// Relative volume: volume / SMA(volume, window).
///
/// A zero rolling average maps to `None` rather than infinity.
pub fn rvol(volumes: &[u64], window: usize) -> Vec<Option<f64>> {
    let vols: Vec<f64> = volumes.iter().map(|&v| v as f64).collect();
    let avg = sma(&vols, window);

    vols.iter()
        .zip(avg)
        .map(|(&v, a)| match a {
            Some(a) if a > 0.0 => Some(v / a),
            _ => None,
        })
        .collect()
}

/// Rolling average daily transaction value (volume * close)
pub fn avg_txn_value(bars: &[Bar], window: usize) -> Vec<Option<f64>> {
    let txn: Vec<f64> = bars.iter().map(|b| b.volume as f64 * b.close).collect();
    sma(&txn, window)
}

/// Where the close sits within the day's range (0 = low, 1 = high).
///
/// `None` when the day has zero range.
pub fn price_position(bars: &[Bar]) -> Vec<Option<f64>> {
    bars.iter()
        .map(|b| {
            let range = b.high - b.low;
            if range > 0.0 {
                Some((b.close - b.low) / range)
            } else {
                None
            }
        })
        .collect()
}

/// Exponential Moving Average, seeded with the first value.
///
/// Smoothing factor 2/(period+1); defined for every index (no warm-up gap
/// beyond index 0), matching pandas `ewm(span=period, adjust=False)`.
pub fn ema(values: &[f64], period: usize) -> Vec<f64> {
    let mut result = Vec::with_capacity(values.len());

    if values.is_empty() || period == 0 {
        return result;
    }

    let multiplier = 2.0 / (period as f64 + 1.0);
    let mut ema_value = values[0];
    result.push(ema_value);

    for &value in &values[1..] {
        ema_value = (value - ema_value) * multiplier + ema_value;
        result.push(ema_value);
    }

    result
}

/// Calculate True Range
pub fn true_range(bars: &[Bar]) -> Vec<f64> {
    let mut tr = Vec::with_capacity(bars.len());

    for (i, bar) in bars.iter().enumerate() {
        let tr_value = if i == 0 {
            bar.high - bar.low
        } else {
            let prev_close = bars[i - 1].close;
            let hl = bar.high - bar.low;
            let hc = (bar.high - prev_close).abs();
            let lc = (bar.low - prev_close).abs();
            hl.max(hc).max(lc)
        };
        tr.push(tr_value);
    }

    tr
}

/// Average True Range: rolling mean of true range over `window`
pub fn atr(bars: &[Bar], window: usize) -> Vec<Option<f64>> {
    let tr = true_range(bars);
    sma(&tr, window)
}

/// Money Flow Index over `window`.
///
/// Typical price = (H+L+C)/3; a bar's money flow (tp * volume) is signed
/// positive when the typical price rose versus the previous bar, else
/// negative. A zero negative-flow denominator maps to `None` rather than
/// pinning the oscillator at 100.
pub fn mfi(bars: &[Bar], window: usize) -> Vec<Option<f64>> {
    let n = bars.len();
    let mut result = vec![None; n];
    if window == 0 || n == 0 {
        return result;
    }

    let tp: Vec<f64> = bars.iter().map(|b| (b.high + b.low + b.close) / 3.0).collect();

    // Signed flows are undefined for the first bar (no previous typical price)
    let mut pos_flow = vec![0.0; n];
    let mut neg_flow = vec![0.0; n];
    for i in 1..n {
        let mf = tp[i] * bars[i].volume as f64;
        if tp[i] > tp[i - 1] {
            pos_flow[i] = mf;
        } else {
            neg_flow[i] = mf;
        }
    }

    for i in window..n {
        let pos_sum: f64 = pos_flow[i + 1 - window..=i].iter().sum();
        let neg_sum: f64 = neg_flow[i + 1 - window..=i].iter().sum();

        if neg_sum > 0.0 {
            let ratio = pos_sum / neg_sum;
            result[i] = Some(100.0 - 100.0 / (1.0 + ratio));
        }
    }

    result
}

/// Lookback windows used by `enrich`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnrichParams {
    pub ema_period: usize,
    pub atr_period: usize,
    pub mfi_period: usize,
    pub vol_window: usize,
}

impl Default for EnrichParams {
    fn default() -> Self {
        EnrichParams {
            ema_period: 10,
            atr_period: 14,
            mfi_period: 14,
            vol_window: 10,
        }
    }
}

/// A bar plus its derived per-bar series values.
///
/// Every derived field is an explicit `Option`: `None` means the indicator
/// is not yet defined at this bar (short prefix or zero-division), and must
/// fail any filter that consumes it.
#[derive(Debug, Clone, PartialEq)]
pub struct EnrichedBar {
    pub bar: Bar,
    pub prev_close: Option<f64>,
    pub rvol: Option<f64>,
    pub avg_txn_value: Option<f64>,
    pub price_pos: Option<f64>,
    pub ema: Option<f64>,
    pub prev_ema: Option<f64>,
    pub atr: Option<f64>,
    pub mfi: Option<f64>,
}

/// Compute all derived series for a bar sequence
pub fn enrich(bars: &[Bar], params: &EnrichParams) -> Vec<EnrichedBar> {
    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
    let volumes: Vec<u64> = bars.iter().map(|b| b.volume).collect();

    let rvol_series = rvol(&volumes, params.vol_window);
    let txn_series = avg_txn_value(bars, params.vol_window);
    let pos_series = price_position(bars);
    let ema_series = ema(&closes, params.ema_period);
    let atr_series = atr(bars, params.atr_period);
    let mfi_series = mfi(bars, params.mfi_period);

    bars.iter()
        .enumerate()
        .map(|(i, bar)| EnrichedBar {
            bar: bar.clone(),
            prev_close: if i > 0 { Some(bars[i - 1].close) } else { None },
            rvol: rvol_series[i],
            avg_txn_value: txn_series[i],
            price_pos: pos_series[i],
            ema: ema_series.get(i).copied(),
            prev_ema: if i > 0 { ema_series.get(i - 1).copied() } else { None },
            atr: atr_series[i],
            mfi: mfi_series[i],
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::NaiveDate;

    fn bar(day: u32, open: f64, high: f64, low: f64, close: f64, volume: u64) -> Bar {
        Bar::new_unchecked(
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + chrono::Days::new(day as u64),
            open,
            high,
            low,
            close,
            volume,
        )
    }

    #[test]
    fn test_sma() {
        let values = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        let result = sma(&values, 3);

        assert_eq!(result[0], None);
        assert_eq!(result[1], None);
        assert_eq!(result[2], Some(2.0));
        assert_eq!(result[3], Some(3.0));
        assert_eq!(result[4], Some(4.0));
    }

    #[test]
    fn test_rvol_basic() {
        let volumes = vec![100, 100, 100, 400];
        let result = rvol(&volumes, 3);

        assert_eq!(result[0], None);
        assert_eq!(result[1], None);
        assert_relative_eq!(result[2].unwrap(), 1.0);
        // 400 / mean(100, 100, 400) = 400 / 200
        assert_relative_eq!(result[3].unwrap(), 2.0);
    }

    #[test]
    fn test_rvol_zero_average_is_none() {
        let volumes = vec![0, 0, 0, 50];
        let result = rvol(&volumes, 3);
        assert_eq!(result[2], None);
    }

    #[test]
    fn test_price_position() {
        let bars = vec![
            bar(0, 100.0, 110.0, 90.0, 108.0, 1000),
            bar(1, 100.0, 100.0, 100.0, 100.0, 1000), // zero range
        ];
        let result = price_position(&bars);
        assert_relative_eq!(result[0].unwrap(), 0.9);
        assert_eq!(result[1], None);
    }

    #[test]
    fn test_ema_seeded_with_first_value() {
        let values = vec![10.0, 20.0, 30.0];
        let result = ema(&values, 3);

        assert_eq!(result.len(), 3);
        assert_relative_eq!(result[0], 10.0);
        // k = 0.5: 10 + (20-10)*0.5 = 15; 15 + (30-15)*0.5 = 22.5
        assert_relative_eq!(result[1], 15.0);
        assert_relative_eq!(result[2], 22.5);
    }

    #[test]
    fn test_atr_undefined_prefix() {
        let bars: Vec<Bar> = (0..5)
            .map(|i| bar(i, 100.0, 110.0, 90.0, 105.0, 1000))
            .collect();
        let result = atr(&bars, 3);

        assert_eq!(result[0], None);
        assert_eq!(result[1], None);
        // constant 20-point range, true range stays 20
        assert_relative_eq!(result[2].unwrap(), 20.0);
        assert_relative_eq!(result[4].unwrap(), 20.0);
    }

    #[test]
    fn test_mfi_all_positive_flow_is_none() {
        // strictly rising typical price: zero negative flow, MFI undefined
        let bars: Vec<Bar> = (0..6)
            .map(|i| {
                let base = 100.0 + i as f64 * 10.0;
                bar(i, base, base + 5.0, base - 5.0, base + 2.0, 1000)
            })
            .collect();
        let result = mfi(&bars, 3);
        assert!(result.iter().all(|v| v.is_none()));
    }

    #[test]
    fn test_mfi_bounded() {
        let bars: Vec<Bar> = (0..20)
            .map(|i| {
                let base = 100.0 + ((i * 7) % 13) as f64;
                bar(i, base, base + 4.0, base - 4.0, base + (i % 3) as f64, 1000 + i as u64 * 37)
            })
            .collect();
        for v in mfi(&bars, 5).into_iter().flatten() {
            assert!((0.0..=100.0).contains(&v));
        }
    }

    #[test]
    fn test_short_series_all_undefined() {
        let bars: Vec<Bar> = (0..4)
            .map(|i| bar(i, 100.0, 110.0, 90.0, 105.0, 1000))
            .collect();
        let params = EnrichParams {
            ema_period: 10,
            atr_period: 14,
            mfi_period: 14,
            vol_window: 10,
        };
        for eb in enrich(&bars, &params) {
            assert_eq!(eb.rvol, None);
            assert_eq!(eb.avg_txn_value, None);
            assert_eq!(eb.atr, None);
            assert_eq!(eb.mfi, None);
        }
    }

    #[test]
    fn test_enrich_prev_fields() {
        let bars = vec![
            bar(0, 100.0, 110.0, 90.0, 105.0, 1000),
            bar(1, 105.0, 115.0, 95.0, 110.0, 1200),
        ];
        let enriched = enrich(&bars, &EnrichParams::default());

        assert_eq!(enriched[0].prev_close, None);
        assert_eq!(enriched[0].prev_ema, None);
        assert_eq!(enriched[1].prev_close, Some(105.0));
        assert_eq!(enriched[1].prev_ema, enriched[0].ema);
    }
}
