//! Volume-spike detection with RVOL, price, and confirmation filters

use std::collections::HashMap;

use chrono::Days;
use ordered_float::OrderedFloat;

use crate::indicators::{avg_txn_value, price_position, rvol};
use crate::types::{Bar, SpikeEvent, Ticker};

/// Thresholds applied by `detect_spikes`
#[derive(Debug, Clone, PartialEq)]
pub struct ScreenParams {
    /// Minimum close price (filters penny stocks)
    pub min_price: f64,
    /// Minimum rolling average daily transaction value
    pub min_avg_txn_value: f64,
    /// SMA window for the RVOL baseline and transaction value
    pub vol_window: usize,
    /// Relative-volume spike multiplier
    pub rvol_threshold: f64,
    /// Close must sit at least this high within the day range
    pub price_position_min: f64,
}

impl Default for ScreenParams {
    fn default() -> Self {
        ScreenParams {
            min_price: 100.0,
            min_avg_txn_value: 1_000_000.0,
            vol_window: 10,
            rvol_threshold: 4.0,
            price_position_min: 0.5,
        }
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Scan a single ticker's daily bars for volume-spike days.
///
/// Filters applied (all must hold):
///   1. Close >= min_price
///   2. Rolling average transaction value >= min_avg_txn_value
///   3. RVOL >= rvol_threshold
///   4. Green candle (close > open)
///   5. Close in upper portion of day range (>= price_position_min)
///   6. Close > previous close
///
/// Consecutive qualifying days each emit their own event; output is in
/// date-ascending insertion order. Series shorter than the rolling window
/// plus one bar return no events.
pub fn detect_spikes(bars: &[Bar], ticker: &Ticker, params: &ScreenParams) -> Vec<SpikeEvent> {
    if bars.len() < params.vol_window + 1 {
        return Vec::new();
    }

    let volumes: Vec<u64> = bars.iter().map(|b| b.volume).collect();
    let rvol_series = rvol(&volumes, params.vol_window);
    let txn_series = avg_txn_value(bars, params.vol_window);
    let pos_series = price_position(bars);

    let mut events = Vec::new();

    for i in 1..bars.len() {
        let bar = &bars[i];
        let prev_close = bars[i - 1].close;

        let (rvol_val, txn_val, pos_val) = match (rvol_series[i], txn_series[i], pos_series[i]) {
            (Some(r), Some(t), Some(p)) => (r, t, p),
            _ => continue,
        };

        let qualifies = bar.close >= params.min_price
            && txn_val >= params.min_avg_txn_value
            && rvol_val >= params.rvol_threshold
            && bar.close > bar.open
            && pos_val >= params.price_position_min
            && bar.close > prev_close;

        if qualifies {
            events.push(SpikeEvent {
                ticker: ticker.clone(),
                date: bar.date,
                rvol: round2(rvol_val),
                close: bar.close,
                pre_spike_close: prev_close,
                pct_change: round2((bar.close - prev_close) / prev_close * 100.0),
                high: bar.high,
                low: bar.low,
                volume: bar.volume,
                avg_txn_value: txn_val,
            });
        }
    }

    events
}

/// Run spike detection across all tickers, sorted by RVOL descending
pub fn scan_all(data: &HashMap<Ticker, Vec<Bar>>, params: &ScreenParams) -> Vec<SpikeEvent> {
    let mut all_events: Vec<SpikeEvent> = data
        .iter()
        .flat_map(|(ticker, bars)| detect_spikes(bars, ticker, params))
        .collect();

    all_events.sort_by_key(|e| std::cmp::Reverse(OrderedFloat(e.rvol)));
    all_events
}

/// Return only spike events within `lookback_days` of each ticker's latest
/// bar date, sorted by RVOL descending
pub fn latest_spikes(
    data: &HashMap<Ticker, Vec<Bar>>,
    params: &ScreenParams,
    lookback_days: u64,
) -> Vec<SpikeEvent> {
    let mut results = Vec::new();

    for (ticker, bars) in data {
        let last_date = match bars.last() {
            Some(bar) => bar.date,
            None => continue,
        };
        let cutoff = last_date
            .checked_sub_days(Days::new(lookback_days))
            .unwrap_or(last_date);

        results.extend(
            detect_spikes(bars, ticker, params)
                .into_iter()
                .filter(|e| e.date >= cutoff),
        );
    }

    results.sort_by_key(|e| std::cmp::Reverse(OrderedFloat(e.rvol)));
    results
}
