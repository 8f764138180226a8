//! Market data loading
//!
//! Daily OHLCV comes from the Yahoo Finance chart API (IDX tickers carry the
//! `.JK` suffix there) or from local CSV files for offline backtests.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::thread::sleep;
use std::time::Duration as StdDuration;
use tracing::{info, warn};

use crate::types::{Bar, Ticker};

const YAHOO_CHART_URL: &str = "https://query1.finance.yahoo.com/v8/finance/chart";

/// Append `.JK` unless the code already carries it
pub fn yahoo_symbol(code: &str) -> String {
    if code.ends_with(".JK") {
        code.to_string()
    } else {
        format!("{code}.JK")
    }
}

// =============================================================================
// CSV Data Loading
// =============================================================================

/// Load daily bars from a CSV file with header date,open,high,low,close,volume
pub fn load_csv(path: impl AsRef<Path>) -> Result<Vec<Bar>> {
    let mut reader = csv::Reader::from_path(path.as_ref()).context("Failed to open CSV file")?;

    let mut bars = Vec::new();
    for (row_idx, result) in reader.deserialize::<Bar>().enumerate() {
        let bar = result.context(format!("Failed to parse row {}", row_idx + 1))?;
        if let Err(e) = bar.validate() {
            warn!("Skipping invalid bar at row {}: {}", row_idx + 1, e);
            continue;
        }
        bars.push(bar);
    }

    bars.sort_by_key(|b| b.date);
    Ok(bars)
}

/// Save daily bars to CSV
pub fn save_to_csv(bars: &[Bar], path: impl AsRef<Path>) -> Result<PathBuf> {
    let path = path.as_ref().to_path_buf();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).context("Failed to create data directory")?;
    }
    let mut file = File::create(&path).context("Failed to create output file")?;

    writeln!(file, "date,open,high,low,close,volume")?;
    for bar in bars {
        writeln!(
            file,
            "{},{},{},{},{},{}",
            bar.date, bar.open, bar.high, bar.low, bar.close, bar.volume
        )?;
    }

    info!("Saved {} rows to {}", bars.len(), path.display());
    Ok(path)
}

// =============================================================================
// Yahoo Finance Daily Fetcher
// =============================================================================

#[derive(Debug, serde::Deserialize)]
struct ChartResponse {
    chart: Chart,
}

#[derive(Debug, serde::Deserialize)]
struct Chart {
    result: Option<Vec<ChartResult>>,
    error: Option<serde_json::Value>,
}

#[derive(Debug, serde::Deserialize)]
struct ChartResult {
    timestamp: Option<Vec<i64>>,
    indicators: Indicators,
}

#[derive(Debug, serde::Deserialize)]
struct Indicators {
    quote: Vec<Quote>,
}

#[derive(Debug, serde::Deserialize)]
struct Quote {
    open: Vec<Option<f64>>,
    high: Vec<Option<f64>>,
    low: Vec<Option<f64>>,
    close: Vec<Option<f64>>,
    volume: Vec<Option<u64>>,
}

/// Turn a chart result into validated daily bars, dropping rows with gaps.
///
/// IDX stocks routinely print untraded days (nulls in every field) and the
/// occasional malformed row; both are skipped rather than failing the fetch.
fn bars_from_chart(result: &ChartResult) -> Vec<Bar> {
    let timestamps = match &result.timestamp {
        Some(ts) => ts,
        None => return Vec::new(),
    };
    let quote = match result.indicators.quote.first() {
        Some(q) => q,
        None => return Vec::new(),
    };

    let mut bars = Vec::with_capacity(timestamps.len());
    for (i, &ts) in timestamps.iter().enumerate() {
        let date = match DateTime::from_timestamp(ts, 0) {
            Some(dt) => dt.date_naive(),
            None => continue,
        };
        let fields = (
            quote.open.get(i).copied().flatten(),
            quote.high.get(i).copied().flatten(),
            quote.low.get(i).copied().flatten(),
            quote.close.get(i).copied().flatten(),
            quote.volume.get(i).copied().flatten(),
        );
        let (open, high, low, close, volume) = match fields {
            (Some(o), Some(h), Some(l), Some(c), Some(v)) => (o, h, l, c, v),
            _ => continue,
        };

        match Bar::new(date, open, high, low, close, volume) {
            Ok(bar) => bars.push(bar),
            Err(e) => warn!("Skipping malformed bar on {}: {}", date, e),
        }
    }

    bars.sort_by_key(|b| b.date);
    bars.dedup_by_key(|b| b.date);
    bars
}

/// Fetches daily OHLCV for IDX tickers from the Yahoo chart API
pub struct YahooDailyFetcher {
    client: reqwest::blocking::Client,
    request_delay: StdDuration,
}

impl YahooDailyFetcher {
    pub fn new(request_delay_ms: u64) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(StdDuration::from_secs(30))
            .user_agent("Mozilla/5.0")
            .build()
            .context("Failed to build HTTP client")?;

        Ok(YahooDailyFetcher {
            client,
            request_delay: StdDuration::from_millis(request_delay_ms),
        })
    }

    /// Download daily bars covering the last `days` calendar days
    pub fn fetch_daily(&self, ticker: &Ticker, days: u32) -> Result<Vec<Bar>> {
        let symbol = yahoo_symbol(ticker.as_str());
        // end one day ahead so today's bar is included once it prints
        let end = Utc::now() + Duration::days(1);
        let start = end - Duration::days(days as i64 + 1);
        let url = format!(
            "{YAHOO_CHART_URL}/{symbol}?period1={}&period2={}&interval=1d",
            start.timestamp(),
            end.timestamp()
        );

        let response = self
            .client
            .get(&url)
            .send()
            .context(format!("Request failed for {symbol}"))?;

        if !response.status().is_success() {
            anyhow::bail!("API returned status {} for {}", response.status(), symbol);
        }

        let parsed: ChartResponse = response
            .json()
            .context(format!("Failed to parse chart response for {symbol}"))?;

        if let Some(err) = parsed.chart.error {
            anyhow::bail!("Chart API error for {}: {}", symbol, err);
        }

        let bars = parsed
            .chart
            .result
            .as_deref()
            .and_then(|r| r.first())
            .map(bars_from_chart)
            .unwrap_or_default();

        Ok(bars)
    }

    /// Download daily bars for many tickers, one request per ticker.
    ///
    /// Per-ticker failures are logged and skipped so a handful of delisted
    /// codes cannot abort a full-market scan.
    pub fn fetch_bulk_daily(&self, tickers: &[Ticker], days: u32) -> HashMap<Ticker, Vec<Bar>> {
        let mut data = HashMap::new();

        for (i, ticker) in tickers.iter().enumerate() {
            match self.fetch_daily(ticker, days) {
                Ok(bars) if !bars.is_empty() => {
                    data.insert(ticker.clone(), bars);
                }
                Ok(_) => warn!("No data returned for {}", ticker),
                Err(e) => warn!("Failed to fetch {}: {:#}", ticker, e),
            }

            if i + 1 < tickers.len() {
                sleep(self.request_delay);
            }
        }

        info!("Fetched data for {} / {} tickers", data.len(), tickers.len());
        data
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_yahoo_symbol_suffix() {
        assert_eq!(yahoo_symbol("BBCA"), "BBCA.JK");
        assert_eq!(yahoo_symbol("BBCA.JK"), "BBCA.JK");
    }

    #[test]
    fn test_bars_from_chart_skips_null_rows() {
        let json = r#"{
            "timestamp": [1709596800, 1709683200, 1709769600],
            "indicators": { "quote": [{
                "open":   [9100.0, null, 9150.0],
                "high":   [9200.0, null, 9500.0],
                "low":    [9050.0, null, 9100.0],
                "close":  [9100.0, null, 9450.0],
                "volume": [1000000, null, 6000000]
            }]}
        }"#;
        let result: ChartResult = serde_json::from_str(json).unwrap();
        let bars = bars_from_chart(&result);

        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].date, NaiveDate::from_ymd_opt(2024, 3, 5).unwrap());
        assert_eq!(bars[1].close, 9450.0);
        assert_eq!(bars[1].volume, 6_000_000);
    }

    #[test]
    fn test_bars_from_chart_drops_invalid_ohlc() {
        // close above the high fails validation and is skipped
        let json = r#"{
            "timestamp": [1709596800],
            "indicators": { "quote": [{
                "open":   [9100.0],
                "high":   [9200.0],
                "low":    [9050.0],
                "close":  [9500.0],
                "volume": [1000000]
            }]}
        }"#;
        let result: ChartResult = serde_json::from_str(json).unwrap();
        assert!(bars_from_chart(&result).is_empty());
    }

    #[test]
    fn test_csv_round_trip() {
        let bars = vec![
            Bar::new_unchecked(
                NaiveDate::from_ymd_opt(2024, 3, 4).unwrap(),
                9100.0,
                9150.0,
                9050.0,
                9100.0,
                1_000_000,
            ),
            Bar::new_unchecked(
                NaiveDate::from_ymd_opt(2024, 3, 5).unwrap(),
                9100.0,
                9500.0,
                9100.0,
                9450.0,
                6_000_000,
            ),
        ];

        let path = std::env::temp_dir().join(format!("idx_spike_csv_test_{}.csv", std::process::id()));
        save_to_csv(&bars, &path).unwrap();
        let loaded = load_csv(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(loaded, bars);
    }
}
