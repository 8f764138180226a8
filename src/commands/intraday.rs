//! Intraday scan command
//!
//! Intended to run every 15 minutes during IDX market hours (09:15-15:00
//! WIB). Monitors tickers with a recent spike plus any ticker holding an
//! open position, runs the entry/exit state machine over fresh daily bars,
//! and sends deduplicated Telegram alerts.

use anyhow::Result;
use chrono::Days;
use std::collections::HashMap;
use tracing::{info, warn};

use idx_spike::data::YahooDailyFetcher;
use idx_spike::indicators::enrich;
use idx_spike::notify::TelegramNotifier;
use idx_spike::screener::detect_spikes;
use idx_spike::signals::{check_entry, check_exit};
use idx_spike::store::SignalStore;
use idx_spike::tickers::get_idx_tickers;
use idx_spike::types::{ActivePosition, Bar, SpikeEvent, Ticker};
use idx_spike::Config;

/// Daily history fetched per monitored ticker
const MONITOR_DAYS: u32 = 30;
/// A spike stays monitored for this many days after it prints
const SPIKE_MONITOR_WINDOW: u64 = 10;

pub fn run(config: &Config) -> Result<()> {
    info!("=== Intraday IDX Scan ===");

    let store = SignalStore::open(&config.data.signals_db_path)?;
    let mut positions = store.load_positions()?;

    let tickers = get_idx_tickers(&config.data.ticker_csv_path, false)?;
    let fetcher = YahooDailyFetcher::new(config.data.fetch_delay_ms)?;

    let screen = config.screen_params();
    let strategy = config.strategy_params()?;
    let enrich_params = config.enrich_params();

    // tickers to monitor: recent spikes plus anything we already hold
    let mut monitored: HashMap<Ticker, Vec<Bar>> = HashMap::new();
    let mut spikes_by_ticker: HashMap<Ticker, SpikeEvent> = HashMap::new();

    for ticker in &tickers {
        let bars = match fetcher.fetch_daily(ticker, MONITOR_DAYS) {
            Ok(bars) if !bars.is_empty() => bars,
            Ok(_) => continue,
            Err(e) => {
                warn!("Skipping {}: {:#}", ticker, e);
                continue;
            }
        };

        let events = detect_spikes(&bars, ticker, &screen);
        if let Some(latest) = events.into_iter().max_by_key(|e| e.date) {
            let last_date = bars.last().map(|b| b.date);
            let cutoff = last_date.and_then(|d| d.checked_sub_days(Days::new(SPIKE_MONITOR_WINDOW)));
            if cutoff.is_some_and(|c| latest.date >= c) {
                spikes_by_ticker.insert(ticker.clone(), latest);
                monitored.insert(ticker.clone(), bars);
            }
        }
    }

    for ticker in positions.keys() {
        if !monitored.contains_key(ticker) {
            match fetcher.fetch_daily(ticker, MONITOR_DAYS) {
                Ok(bars) if !bars.is_empty() => {
                    monitored.insert(ticker.clone(), bars);
                }
                Ok(_) => warn!("No data for held ticker {}", ticker),
                Err(e) => warn!("Failed to fetch held ticker {}: {:#}", ticker, e),
            }
        }
    }

    info!("Monitoring {} tickers", monitored.len());

    let notifier = TelegramNotifier::new(&config.telegram)?;

    for (ticker, bars) in &monitored {
        let enriched = enrich(bars, &enrich_params);

        // entry: spike ticker without an open position
        if let Some(spike) = spikes_by_ticker.get(ticker) {
            if !positions.contains_key(ticker) {
                if let Some(sig) = check_entry(&enriched, spike, &strategy) {
                    if !store.already_sent(ticker, sig.kind, sig.date)? {
                        info!("ENTRY signal: {} @ {}", ticker, sig.price);
                        notifier.send_signal_alert(&sig);
                        store.mark_sent(&sig)?;

                        let pos = ActivePosition {
                            ticker: ticker.clone(),
                            entry_date: sig.date,
                            entry_price: sig.price,
                            spike: spike.clone(),
                            sl_price: sig.sl_price.unwrap_or(0.0),
                            tp_price: sig.tp_price,
                            highest_since_entry: sig.price,
                        };
                        store.save_position(&pos)?;
                        positions.insert(ticker.clone(), pos);
                    }
                }
            }
        }

        // exit: open position on this ticker
        if let Some(pos) = positions.get_mut(ticker) {
            match check_exit(&enriched, pos, &strategy) {
                Some(sig) => {
                    if !store.already_sent(ticker, sig.kind, sig.date)? {
                        info!("{} signal: {} @ {}", sig.kind, ticker, sig.price);
                        notifier.send_signal_alert(&sig);
                        store.mark_sent(&sig)?;
                        store.remove_position(ticker)?;
                    }
                }
                // persist the ratcheted high so the trailing stop survives
                // across cron runs
                None => store.save_position(pos)?,
            }
        }
    }

    info!("Intraday scan complete");
    Ok(())
}
