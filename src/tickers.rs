//! IDX ticker list
//!
//! Primary source is the IDX website API; a local CSV cache is both the
//! fallback and the persisted copy of the last successful fetch.

use anyhow::{Context, Result};
use itertools::Itertools;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

use crate::types::Ticker;

const IDX_STOCK_LIST_URL: &str =
    "https://www.idx.co.id/primary/StockData/GetSecuritiesStock?length=9999&start=0&code=&sector=&board=";
const IDX_REFERER: &str = "https://www.idx.co.id/en/market-data/stocks-data/list-of-stocks/";

#[derive(Debug, serde::Deserialize)]
struct StockListResponse {
    #[serde(default, alias = "reply")]
    data: Vec<StockRecord>,
}

#[derive(Debug, serde::Deserialize)]
struct StockRecord {
    #[serde(rename = "Code")]
    code: Option<String>,
}

/// Fetch ticker codes from the IDX website API
pub fn fetch_idx_tickers_online() -> Result<Vec<Ticker>> {
    let client = reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
        .context("Failed to build HTTP client")?;

    let response = client
        .get(IDX_STOCK_LIST_URL)
        .header("User-Agent", "Mozilla/5.0")
        .header("Referer", IDX_REFERER)
        .send()
        .context("Failed to fetch IDX stock list")?
        .error_for_status()
        .context("IDX stock list request rejected")?;

    let payload: StockListResponse = response.json().context("Failed to parse stock list")?;

    let tickers: Vec<Ticker> = payload
        .data
        .into_iter()
        .filter_map(|r| r.code)
        .filter(|c| !c.is_empty())
        .unique()
        .sorted()
        .map(Ticker::new)
        .collect();

    Ok(tickers)
}

/// Load tickers from the local CSV cache (header row skipped)
pub fn load_tickers_from_csv(path: impl AsRef<Path>) -> Result<Vec<Ticker>> {
    let mut reader =
        csv::Reader::from_path(path.as_ref()).context("Failed to open ticker CSV")?;

    let tickers: Vec<Ticker> = reader
        .records()
        .filter_map(|r| r.ok())
        .filter_map(|r| r.get(0).map(|s| s.trim().to_string()))
        .filter(|s| !s.is_empty())
        .unique()
        .sorted()
        .map(Ticker::new)
        .collect();

    Ok(tickers)
}

/// Persist tickers to the CSV cache
pub fn save_tickers_to_csv(tickers: &[Ticker], path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).context("Failed to create data directory")?;
    }

    let mut file = File::create(path).context("Failed to create ticker CSV")?;
    writeln!(file, "ticker")?;
    for ticker in tickers {
        writeln!(file, "{ticker}")?;
    }
    Ok(())
}

/// Return the IDX ticker list.
///
/// Without `force_refresh` the CSV cache is preferred; otherwise the online
/// API is tried first and the cache refreshed on success. Errors only when
/// both sources come up empty.
pub fn get_idx_tickers(csv_path: impl AsRef<Path>, force_refresh: bool) -> Result<Vec<Ticker>> {
    let csv_path = csv_path.as_ref();

    if !force_refresh {
        if let Ok(cached) = load_tickers_from_csv(csv_path) {
            if !cached.is_empty() {
                return Ok(cached);
            }
        }
    }

    match fetch_idx_tickers_online() {
        Ok(tickers) if !tickers.is_empty() => {
            info!("Fetched {} tickers from IDX website", tickers.len());
            if let Err(e) = save_tickers_to_csv(&tickers, csv_path) {
                warn!("Failed to update ticker cache: {:#}", e);
            }
            return Ok(tickers);
        }
        Ok(_) => warn!("IDX website returned an empty ticker list"),
        Err(e) => warn!("Failed to fetch tickers from IDX website: {:#}", e),
    }

    let cached = load_tickers_from_csv(csv_path).unwrap_or_default();
    if !cached.is_empty() {
        info!("Using cached ticker CSV ({} tickers)", cached.len());
        return Ok(cached);
    }

    anyhow::bail!(
        "Cannot obtain IDX ticker list. Place a CSV with a 'ticker' column at: {}",
        csv_path.display()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_csv_cache_round_trip() {
        let path = std::env::temp_dir().join(format!(
            "idx_spike_tickers_test_{}.csv",
            std::process::id()
        ));

        let tickers = vec![Ticker::new("TLKM"), Ticker::new("BBCA"), Ticker::new("ASII")];
        save_tickers_to_csv(&tickers, &path).unwrap();
        let loaded = load_tickers_from_csv(&path).unwrap();
        std::fs::remove_file(&path).ok();

        // cache load sorts and dedups
        assert_eq!(
            loaded,
            vec![Ticker::new("ASII"), Ticker::new("BBCA"), Ticker::new("TLKM")]
        );
    }

    #[test]
    fn test_stock_list_parsing() {
        let json = r#"{ "data": [
            { "Code": "BBCA", "Name": "Bank Central Asia" },
            { "Code": "TLKM" },
            { "Code": "" },
            { "Name": "no code" },
            { "Code": "BBCA" }
        ]}"#;
        let payload: StockListResponse = serde_json::from_str(json).unwrap();
        let tickers: Vec<Ticker> = payload
            .data
            .into_iter()
            .filter_map(|r| r.code)
            .filter(|c| !c.is_empty())
            .unique()
            .sorted()
            .map(Ticker::new)
            .collect();

        assert_eq!(tickers, vec![Ticker::new("BBCA"), Ticker::new("TLKM")]);
    }

    #[test]
    fn test_get_tickers_errors_without_any_source() {
        let path = std::env::temp_dir().join("idx_spike_no_such_cache.csv");
        std::fs::remove_file(&path).ok();
        // offline fetch fails in test environments; with no cache this errors
        // rather than returning an empty universe
        if let Ok(tickers) = get_idx_tickers(&path, false) {
            assert!(!tickers.is_empty());
            std::fs::remove_file(&path).ok();
        }
    }
}
