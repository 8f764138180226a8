pub mod backtest;
pub mod daily;
pub mod intraday;
pub mod optimize;

use anyhow::Result;
use tracing::info;

use idx_spike::data::YahooDailyFetcher;
use idx_spike::types::{Bar, Ticker};

/// Fetch daily history for each ticker and concatenate into one bar series,
/// sorted by date. Multi-ticker runs treat the combined stream as a single
/// instrument so more spike/retrace cycles feed the backtest.
pub(crate) fn fetch_and_concat(
    fetcher: &YahooDailyFetcher,
    tickers: &[String],
    days: u32,
) -> Result<(Ticker, Vec<Bar>)> {
    let mut bars: Vec<Bar> = Vec::new();

    for code in tickers {
        let ticker = Ticker::new(code);
        let fetched = fetcher.fetch_daily(&ticker, days)?;
        if fetched.is_empty() {
            anyhow::bail!("No data for {}", code);
        }
        info!("Loaded {} bars for {}", fetched.len(), code);
        bars.extend(fetched);
    }

    bars.sort_by_key(|b| b.date);
    Ok((Ticker::new(tickers.join("+")), bars))
}
