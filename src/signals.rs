//! Signal engine: entry, take-profit, and stop-loss logic
//!
//! One state machine per ticker with two states, FLAT and IN_POSITION,
//! evaluated once per new bar. The same `check_entry`/`check_exit` pair
//! drives both the live scan and the backtest replay, so the rules cannot
//! drift between the two paths.

use std::collections::HashMap;

use tracing::warn;

use crate::indicators::{enrich, EnrichParams, EnrichedBar};
use crate::types::{ActivePosition, Bar, Signal, SignalKind, SpikeEvent, Ticker, TpMode};

/// Entry/exit parameters for the state machine
#[derive(Debug, Clone, PartialEq)]
pub struct StrategyParams {
    /// Max % distance from the pre-spike close for entry
    pub retrace_pct: f64,
    /// EMA look-back for the MA-reclaim check
    pub ema_period: usize,
    /// Minimum MFI at entry
    pub mfi_min: f64,
    /// Base stop-loss % below the pre-spike close
    pub sl_pct: f64,
    /// ATR look-back for the adaptive stop-loss
    pub atr_period: usize,
    pub tp_mode: TpMode,
    /// Trailing-stop distance when tp_mode is Trailing
    pub trailing_pct: f64,
}

impl Default for StrategyParams {
    fn default() -> Self {
        StrategyParams {
            retrace_pct: 3.0,
            ema_period: 10,
            mfi_min: 20.0,
            sl_pct: 5.0,
            atr_period: 14,
            tp_mode: TpMode::MaBreakdown,
            trailing_pct: 2.5,
        }
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Adaptive stop-loss: pre_spike_close - max(sl_pct%, 1 x ATR).
///
/// On a deep retracement the anchor-based stop can land at or above the
/// entry price; fall back to sl_pct% below the entry so the stop is always
/// below price.
pub fn adaptive_stop_loss(pre_spike_close: f64, atr: f64, sl_pct: f64, entry_price: f64) -> f64 {
    let pct_dist = pre_spike_close * sl_pct / 100.0;
    let sl = pre_spike_close - pct_dist.max(atr);
    if sl >= entry_price {
        entry_price * (1.0 - sl_pct / 100.0)
    } else {
        sl
    }
}

/// True when price has retraced to within `retrace_pct` of the pre-spike close
fn is_near_entry(current_close: f64, pre_spike_close: f64, retrace_pct: f64) -> bool {
    if pre_spike_close <= 0.0 {
        return false;
    }
    let distance_pct = (current_close - pre_spike_close).abs() / pre_spike_close * 100.0;
    distance_pct <= retrace_pct
}

/// True when the close crosses above the EMA from at-or-below
fn ema_reclaim(latest: &EnrichedBar) -> bool {
    match (latest.ema, latest.prev_close, latest.prev_ema) {
        (Some(ema), Some(prev_close), Some(prev_ema)) => {
            latest.bar.close > ema && prev_close <= prev_ema
        }
        _ => false,
    }
}

/// Check the latest bar for an entry signal following a spike event.
///
/// FLAT -> IN_POSITION when, on a bar strictly after the spike day:
///   1. price has retraced to within `retrace_pct` of the pre-spike close;
///   2. the close crosses above the EMA (MA reclaim);
///   3. MFI >= `mfi_min` (an undefined MFI fails the filter).
pub fn check_entry(
    bars: &[EnrichedBar],
    spike: &SpikeEvent,
    params: &StrategyParams,
) -> Option<Signal> {
    let latest = bars.last()?;

    if latest.bar.date <= spike.date {
        return None;
    }

    if spike.pre_spike_close <= 0.0 {
        warn!(
            ticker = %spike.ticker,
            date = %spike.date,
            "spike has non-positive pre-spike close, skipping entry checks"
        );
        return None;
    }

    let close = latest.bar.close;
    let near = is_near_entry(close, spike.pre_spike_close, params.retrace_pct);
    let reclaim = ema_reclaim(latest);
    let mfi_ok = latest.mfi.is_some_and(|m| m >= params.mfi_min);

    if !(near && reclaim && mfi_ok) {
        return None;
    }

    let atr = latest.atr.unwrap_or(0.0);
    let sl = adaptive_stop_loss(spike.pre_spike_close, atr, params.sl_pct, close);
    let retrace = (close - spike.pre_spike_close).abs() / spike.pre_spike_close * 100.0;

    Some(Signal {
        ticker: spike.ticker.clone(),
        kind: SignalKind::Entry,
        date: latest.bar.date,
        price: close,
        spike: spike.clone(),
        entry_price: Some(close),
        sl_price: Some(round2(sl)),
        tp_price: Some(spike.high),
        note: format!(
            "Retrace {:.1}% | EMA reclaim | MFI {:.0}",
            retrace,
            latest.mfi.unwrap_or(0.0)
        ),
    })
}

/// Check the latest bar for an exit signal (stop-loss or take-profit).
///
/// `highest_since_entry` is ratcheted up on every call, exit or not. The
/// stop-loss is checked before any take-profit mode; when both conditions
/// hold on the same bar the stop-loss wins.
pub fn check_exit(
    bars: &[EnrichedBar],
    pos: &mut ActivePosition,
    params: &StrategyParams,
) -> Option<Signal> {
    let latest = bars.last()?;
    let close = latest.bar.close;
    let date = latest.bar.date;

    pos.highest_since_entry = pos.highest_since_entry.max(close);

    if close <= pos.sl_price {
        return Some(Signal {
            ticker: pos.ticker.clone(),
            kind: SignalKind::StopLoss,
            date,
            price: close,
            spike: pos.spike.clone(),
            entry_price: Some(pos.entry_price),
            sl_price: Some(pos.sl_price),
            tp_price: None,
            note: format!("SL hit @ {:.0}", close),
        });
    }

    match params.tp_mode {
        TpMode::Breakout => {
            if close > pos.spike.high {
                return Some(Signal {
                    ticker: pos.ticker.clone(),
                    kind: SignalKind::TakeProfit,
                    date,
                    price: close,
                    spike: pos.spike.clone(),
                    entry_price: Some(pos.entry_price),
                    sl_price: None,
                    tp_price: Some(pos.spike.high),
                    note: format!("Breakout above spike high {:.0}", pos.spike.high),
                });
            }
        }
        TpMode::MaBreakdown => {
            let in_profit = close > pos.entry_price;
            let below_ema = latest.ema.is_some_and(|ema| close < ema);
            if in_profit && below_ema {
                return Some(Signal {
                    ticker: pos.ticker.clone(),
                    kind: SignalKind::TakeProfit,
                    date,
                    price: close,
                    spike: pos.spike.clone(),
                    entry_price: Some(pos.entry_price),
                    sl_price: None,
                    tp_price: None,
                    note: "MA breakdown (close < EMA) while in profit".to_string(),
                });
            }
        }
        TpMode::Trailing => {
            let trail_price = pos.highest_since_entry * (1.0 - params.trailing_pct / 100.0);
            let in_profit = close > pos.entry_price;
            if in_profit && close < trail_price {
                return Some(Signal {
                    ticker: pos.ticker.clone(),
                    kind: SignalKind::TakeProfit,
                    date,
                    price: close,
                    spike: pos.spike.clone(),
                    entry_price: Some(pos.entry_price),
                    sl_price: None,
                    tp_price: None,
                    note: format!(
                        "Trailing stop @ {:.0} (peak {:.0})",
                        trail_price, pos.highest_since_entry
                    ),
                });
            }
        }
    }

    None
}

/// Daily-report row: a stock near the entry zone that has not yet triggered
/// a full entry signal
#[derive(Debug, Clone)]
pub struct NearEntry {
    pub ticker: Ticker,
    pub current_close: f64,
    pub pre_spike_close: f64,
    pub retrace_pct: f64,
    pub ema_reclaiming: bool,
    pub mfi: Option<f64>,
    pub entry_zone_low: f64,
    pub entry_zone_high: f64,
    pub sl: f64,
    pub tp: f64,
}

/// For the daily report: stocks whose latest close is within the entry zone
pub fn find_near_entry(
    data: &HashMap<Ticker, Vec<Bar>>,
    spikes: &[SpikeEvent],
    params: &StrategyParams,
    enrich_params: &EnrichParams,
) -> Vec<NearEntry> {
    let mut results = Vec::new();

    for spike in spikes {
        let bars = match data.get(&spike.ticker) {
            Some(bars) if !bars.is_empty() => bars,
            _ => continue,
        };
        if spike.pre_spike_close <= 0.0 {
            continue;
        }

        let enriched = enrich(bars, enrich_params);
        let latest = match enriched.last() {
            Some(eb) => eb,
            None => continue,
        };
        if latest.bar.date <= spike.date {
            continue;
        }

        let close = latest.bar.close;
        if !is_near_entry(close, spike.pre_spike_close, params.retrace_pct) {
            continue;
        }

        let atr = latest.atr.unwrap_or(0.0);
        let sl = adaptive_stop_loss(spike.pre_spike_close, atr, params.sl_pct, close);

        results.push(NearEntry {
            ticker: spike.ticker.clone(),
            current_close: close,
            pre_spike_close: spike.pre_spike_close,
            retrace_pct: round2(
                (close - spike.pre_spike_close).abs() / spike.pre_spike_close * 100.0,
            ),
            ema_reclaiming: latest.ema.is_some_and(|ema| close > ema),
            mfi: latest.mfi,
            entry_zone_low: spike.pre_spike_close * (1.0 - params.retrace_pct / 100.0),
            entry_zone_high: spike.pre_spike_close,
            sl,
            tp: spike.high,
        });
    }

    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::NaiveDate;

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 1).unwrap() + chrono::Days::new(day as u64)
    }

    fn spike() -> SpikeEvent {
        SpikeEvent {
            ticker: Ticker::new("BBCA"),
            date: date(0),
            rvol: 6.0,
            close: 9450.0,
            pre_spike_close: 9100.0,
            pct_change: 3.85,
            high: 9500.0,
            low: 9100.0,
            volume: 6_000_000,
            avg_txn_value: 9.5e9,
        }
    }

    /// Hand-built enriched bar; the state machine only reads the latest one
    fn eb(
        day: u32,
        close: f64,
        prev_close: f64,
        ema: f64,
        prev_ema: f64,
        mfi: Option<f64>,
        atr: f64,
    ) -> EnrichedBar {
        EnrichedBar {
            bar: Bar::new_unchecked(date(day), close, close + 10.0, close - 10.0, close, 1_000),
            prev_close: Some(prev_close),
            rvol: Some(1.0),
            avg_txn_value: Some(1e9),
            price_pos: Some(0.5),
            ema: Some(ema),
            prev_ema: Some(prev_ema),
            atr: Some(atr),
            mfi,
        }
    }

    fn params() -> StrategyParams {
        StrategyParams::default()
    }

    fn position(entry_price: f64, sl_price: f64) -> ActivePosition {
        ActivePosition {
            ticker: Ticker::new("BBCA"),
            entry_date: date(3),
            entry_price,
            spike: spike(),
            sl_price,
            tp_price: Some(9500.0),
            highest_since_entry: entry_price,
        }
    }

    #[test]
    fn test_entry_signal() {
        // retraced close to pre-spike close, EMA reclaimed, MFI healthy
        let bars = vec![eb(3, 9150.0, 9000.0, 9100.0, 9050.0, Some(55.0), 50.0)];
        let sig = check_entry(&bars, &spike(), &params()).expect("entry should fire");

        assert_eq!(sig.kind, SignalKind::Entry);
        assert_eq!(sig.price, 9150.0);
        // SL = 9100 - max(9100 * 5%, ATR 50) = 9100 - 455
        assert_relative_eq!(sig.sl_price.unwrap(), 8645.0);
        assert_eq!(sig.tp_price, Some(9500.0));
    }

    #[test]
    fn test_no_entry_on_or_before_spike_day() {
        let bars = vec![eb(0, 9150.0, 9000.0, 9100.0, 9050.0, Some(55.0), 50.0)];
        assert!(check_entry(&bars, &spike(), &params()).is_none());
    }

    #[test]
    fn test_no_entry_when_pre_spike_close_invalid() {
        let mut s = spike();
        s.pre_spike_close = 0.0;
        let bars = vec![eb(3, 9150.0, 9000.0, 9100.0, 9050.0, Some(55.0), 50.0)];
        assert!(check_entry(&bars, &s, &params()).is_none());
    }

    #[test]
    fn test_no_entry_when_retrace_too_far() {
        // 9800 is 7.7% above the 9100 anchor, beyond the 3% zone
        let bars = vec![eb(3, 9800.0, 9600.0, 9650.0, 9700.0, Some(55.0), 50.0)];
        assert!(check_entry(&bars, &spike(), &params()).is_none());
    }

    #[test]
    fn test_no_entry_without_ema_cross() {
        // already above the EMA on the previous bar: no reclaim
        let bars = vec![eb(3, 9150.0, 9120.0, 9100.0, 9050.0, Some(55.0), 50.0)];
        assert!(check_entry(&bars, &spike(), &params()).is_none());
    }

    #[test]
    fn test_no_entry_when_mfi_missing_or_low() {
        let bars = vec![eb(3, 9150.0, 9000.0, 9100.0, 9050.0, None, 50.0)];
        assert!(check_entry(&bars, &spike(), &params()).is_none());

        let bars = vec![eb(3, 9150.0, 9000.0, 9100.0, 9050.0, Some(10.0), 50.0)];
        assert!(check_entry(&bars, &spike(), &params()).is_none());
    }

    #[test]
    fn test_sl_fallback_on_deep_retracement() {
        // anchor-based SL (9100 - 455 = 8645) sits above the 8600 entry
        let mut p = params();
        p.retrace_pct = 8.0;
        let bars = vec![eb(3, 8600.0, 8500.0, 8550.0, 8520.0, Some(55.0), 50.0)];
        let sig = check_entry(&bars, &spike(), &p).expect("entry should fire");

        assert_relative_eq!(sig.sl_price.unwrap(), 8600.0 * 0.95);
        assert!(sig.sl_price.unwrap() < sig.price);
    }

    #[test]
    fn test_stop_loss_fires() {
        // spec example: SL = 9100 - max(455, 50) = 8645; close 8500 breaches it
        let mut pos = position(9150.0, 8645.0);
        let bars = vec![eb(5, 8500.0, 8700.0, 8800.0, 8850.0, Some(30.0), 50.0)];
        let sig = check_exit(&bars, &mut pos, &params()).expect("SL should fire");

        assert_eq!(sig.kind, SignalKind::StopLoss);
        assert_eq!(sig.price, 8500.0);
    }

    #[test]
    fn test_stop_loss_takes_priority_over_take_profit() {
        // close 8500 is both below the SL and above the (contrived) spike high
        let mut pos = position(8000.0, 8600.0);
        pos.spike.high = 8400.0;
        let mut p = params();
        p.tp_mode = TpMode::Breakout;

        let bars = vec![eb(5, 8500.0, 8700.0, 8800.0, 8850.0, Some(30.0), 50.0)];
        let sig = check_exit(&bars, &mut pos, &p).expect("exit should fire");
        assert_eq!(sig.kind, SignalKind::StopLoss);
    }

    #[test]
    fn test_breakout_take_profit() {
        let mut pos = position(9150.0, 8645.0);
        let mut p = params();
        p.tp_mode = TpMode::Breakout;

        let bars = vec![eb(5, 9600.0, 9400.0, 9300.0, 9250.0, Some(60.0), 50.0)];
        let sig = check_exit(&bars, &mut pos, &p).expect("TP should fire");
        assert_eq!(sig.kind, SignalKind::TakeProfit);
        assert_eq!(sig.tp_price, Some(9500.0));
    }

    #[test]
    fn test_ma_breakdown_only_exits_in_profit() {
        let mut p = params();
        p.tp_mode = TpMode::MaBreakdown;

        // in profit and below the EMA: exit
        let mut pos = position(9150.0, 8645.0);
        let bars = vec![eb(5, 9300.0, 9400.0, 9350.0, 9380.0, Some(40.0), 50.0)];
        let sig = check_exit(&bars, &mut pos, &p).expect("TP should fire");
        assert_eq!(sig.kind, SignalKind::TakeProfit);

        // underwater and below the EMA: hold
        let mut pos = position(9150.0, 8645.0);
        let bars = vec![eb(5, 9000.0, 9100.0, 9050.0, 9080.0, Some(40.0), 50.0)];
        assert!(check_exit(&bars, &mut pos, &p).is_none());
    }

    #[test]
    fn test_trailing_stop() {
        // spec example: entry 9000, trailing 3%, peak 9900 -> trail 9603
        let mut p = params();
        p.tp_mode = TpMode::Trailing;
        p.trailing_pct = 3.0;

        let mut pos = position(9000.0, 8500.0);
        pos.highest_since_entry = 9000.0;

        // ride up to the peak: no exit, ratchet moves
        let bars = vec![eb(5, 9900.0, 9800.0, 9500.0, 9450.0, Some(70.0), 50.0)];
        assert!(check_exit(&bars, &mut pos, &p).is_none());
        assert_relative_eq!(pos.highest_since_entry, 9900.0);

        // pull back below the trail while in profit: exit
        let bars = vec![eb(6, 9500.0, 9900.0, 9600.0, 9550.0, Some(70.0), 50.0)];
        let sig = check_exit(&bars, &mut pos, &p).expect("TP should fire");
        assert_eq!(sig.kind, SignalKind::TakeProfit);
        assert_eq!(sig.price, 9500.0);
    }

    #[test]
    fn test_highest_since_entry_monotonic() {
        let mut p = params();
        p.tp_mode = TpMode::Trailing;
        let mut pos = position(9000.0, 8000.0);
        pos.highest_since_entry = 9000.0;

        let closes = [9200.0, 9100.0, 9600.0, 9300.0, 9550.0];
        let mut last_peak = pos.highest_since_entry;
        for (i, &close) in closes.iter().enumerate() {
            let bars = vec![eb(5 + i as u32, close, close, close - 100.0, close - 100.0, Some(50.0), 50.0)];
            let _ = check_exit(&bars, &mut pos, &p);
            assert!(pos.highest_since_entry >= last_peak);
            last_peak = pos.highest_since_entry;
        }
        assert_relative_eq!(pos.highest_since_entry, 9600.0);
    }

    #[test]
    fn test_find_near_entry() {
        let ticker = Ticker::new("BBCA");
        // quiet history, then a latest bar sitting 1% above the anchor
        let mut bars: Vec<Bar> = (0..12)
            .map(|i| Bar::new_unchecked(date(i), 9100.0, 9150.0, 9050.0, 9100.0, 1_000_000))
            .collect();
        bars.push(Bar::new_unchecked(
            date(12),
            9150.0,
            9250.0,
            9100.0,
            9191.0,
            1_100_000,
        ));

        let mut data = HashMap::new();
        data.insert(ticker.clone(), bars);

        let rows = find_near_entry(&data, &[spike()], &params(), &EnrichParams::default());
        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert_eq!(row.ticker, ticker);
        assert_relative_eq!(row.entry_zone_high, 9100.0);
        assert_relative_eq!(row.entry_zone_low, 9100.0 * 0.97);
        assert_relative_eq!(row.tp, 9500.0);
        assert!(row.retrace_pct <= 3.0);
    }
}
