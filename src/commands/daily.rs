//! Daily scan command
//!
//! Intended to run once per trading day after market close (19:00 WIB):
//! refresh the ticker list, download daily OHLCV for the full market, detect
//! recent volume spikes, list stocks near the entry zone, and send the
//! nightly Telegram report.

use anyhow::Result;
use tracing::{info, warn};

use idx_spike::data::YahooDailyFetcher;
use idx_spike::notify::TelegramNotifier;
use idx_spike::screener::latest_spikes;
use idx_spike::signals::find_near_entry;
use idx_spike::tickers::get_idx_tickers;
use idx_spike::Config;

pub fn run(config: &Config, refresh_tickers: bool, lookback_days: u64) -> Result<()> {
    info!("=== Daily IDX Scan ===");

    let tickers = get_idx_tickers(&config.data.ticker_csv_path, refresh_tickers)?;
    info!("Loaded {} IDX tickers", tickers.len());

    let fetcher = YahooDailyFetcher::new(config.data.fetch_delay_ms)?;
    let data = fetcher.fetch_bulk_daily(&tickers, config.data.history_days);
    if data.is_empty() {
        anyhow::bail!("No market data returned");
    }

    let spikes = latest_spikes(&data, &config.screen_params(), lookback_days);
    info!(
        "Found {} spike events in last {} days",
        spikes.len(),
        lookback_days
    );

    let strategy = config.strategy_params()?;
    let near_entry = find_near_entry(&data, &spikes, &strategy, &config.enrich_params());
    info!("Found {} stocks near entry level", near_entry.len());

    for spike in &spikes {
        info!(
            "  {} {} RVOL {:.2} close {:.0} ({:+.1}%)",
            spike.date, spike.ticker, spike.rvol, spike.close, spike.pct_change
        );
    }

    let notifier = TelegramNotifier::new(&config.telegram)?;
    let today = chrono::Local::now().date_naive();
    if notifier.send_daily_report(&spikes, &near_entry, today) {
        info!("Daily report sent to Telegram");
    } else {
        warn!("Failed to send daily report (check credentials)");
    }

    Ok(())
}
