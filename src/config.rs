//! Configuration management
//!
//! Loads JSON configuration with per-section defaults, plus Telegram
//! credentials from the environment (via `.env` when present). Every section
//! is optional in the file; missing fields fall back to the defaults below.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::backtest::{BacktestConfig, BacktestParams};
use crate::indicators::EnrichParams;
use crate::screener::ScreenParams;
use crate::signals::StrategyParams;
use crate::types::TpMode;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub screen: ScreenConfig,
    #[serde(default)]
    pub entry: EntryConfig,
    #[serde(default)]
    pub exit: ExitConfig,
    #[serde(default)]
    pub data: DataConfig,
    #[serde(default)]
    pub backtest: BacktestSection,
    /// Filled from TELEGRAM_BOT_TOKEN / TELEGRAM_CHAT_ID, never from the file
    #[serde(skip)]
    pub telegram: TelegramConfig,
}

impl Config {
    /// Load configuration from a JSON file, then overlay env credentials
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = fs::read_to_string(path.as_ref()).context("Failed to read config file")?;
        let mut config: Config =
            serde_json::from_str(&contents).context("Failed to parse config JSON")?;
        config.telegram = TelegramConfig::from_env();
        Ok(config)
    }

    /// Defaults plus env credentials, for running without a config file
    pub fn from_env() -> Self {
        Config {
            telegram: TelegramConfig::from_env(),
            ..Config::default()
        }
    }

    pub fn screen_params(&self) -> ScreenParams {
        ScreenParams {
            min_price: self.screen.min_price,
            min_avg_txn_value: self.screen.min_avg_txn_value,
            vol_window: self.screen.vol_window,
            rvol_threshold: self.screen.rvol_threshold,
            price_position_min: self.screen.price_position_min,
        }
    }

    pub fn strategy_params(&self) -> Result<StrategyParams> {
        let tp_mode = TpMode::from_code(self.exit.tp_mode)
            .ok_or_else(|| anyhow!("invalid tp_mode {} (expected 1, 2, or 3)", self.exit.tp_mode))?;

        Ok(StrategyParams {
            retrace_pct: self.entry.retrace_pct,
            ema_period: self.entry.ema_period,
            mfi_min: self.entry.mfi_min,
            sl_pct: self.exit.sl_pct,
            atr_period: self.exit.atr_period,
            tp_mode,
            trailing_pct: self.exit.trailing_stop_pct,
        })
    }

    pub fn enrich_params(&self) -> EnrichParams {
        EnrichParams {
            ema_period: self.entry.ema_period,
            atr_period: self.exit.atr_period,
            mfi_period: self.entry.mfi_period,
            vol_window: self.screen.vol_window,
        }
    }

    pub fn backtest_params(&self) -> Result<BacktestParams> {
        Ok(BacktestParams {
            screen: self.screen_params(),
            strategy: self.strategy_params()?,
            mfi_period: self.entry.mfi_period,
        })
    }

    pub fn backtest_config(&self) -> BacktestConfig {
        BacktestConfig {
            initial_cash: self.backtest.initial_cash,
            commission: self.backtest.commission,
        }
    }
}

/// Spike screening thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScreenConfig {
    /// IDR; filters penny stocks
    pub min_price: f64,
    /// IDR rolling average daily transaction value
    pub min_avg_txn_value: f64,
    /// Days for the RVOL baseline
    pub vol_window: usize,
    pub rvol_threshold: f64,
    /// Close must sit in the upper part of the day range
    pub price_position_min: f64,
}

impl Default for ScreenConfig {
    fn default() -> Self {
        ScreenConfig {
            min_price: 100.0,
            min_avg_txn_value: 1_000_000.0,
            vol_window: 10,
            rvol_threshold: 4.0,
            price_position_min: 0.5,
        }
    }
}

/// Entry-side settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryConfig {
    /// Max % retracement from the pre-spike close
    pub retrace_pct: f64,
    /// EMA period for the reclaim confirmation
    pub ema_period: usize,
    pub mfi_period: usize,
    pub mfi_min: f64,
}

impl Default for EntryConfig {
    fn default() -> Self {
        EntryConfig {
            retrace_pct: 3.0,
            ema_period: 10,
            mfi_period: 14,
            mfi_min: 20.0,
        }
    }
}

/// Exit-side settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExitConfig {
    /// Stop-loss % below the pre-spike close
    pub sl_pct: f64,
    /// ATR look-back for the adaptive stop
    pub atr_period: usize,
    /// Trailing-stop distance (tp_mode 3)
    pub trailing_stop_pct: f64,
    /// 1 = breakout, 2 = MA breakdown, 3 = trailing stop
    pub tp_mode: u8,
}

impl Default for ExitConfig {
    fn default() -> Self {
        ExitConfig {
            sl_pct: 5.0,
            atr_period: 14,
            trailing_stop_pct: 2.5,
            tp_mode: 2,
        }
    }
}

/// Data source and storage paths
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    pub ticker_csv_path: String,
    pub signals_db_path: String,
    /// How far back to fetch daily OHLCV
    pub history_days: u32,
    /// Pause between per-ticker fetches, to stay polite with the data host
    pub fetch_delay_ms: u64,
}

impl Default for DataConfig {
    fn default() -> Self {
        DataConfig {
            ticker_csv_path: "data/idx_tickers.csv".to_string(),
            signals_db_path: "data/signals.db".to_string(),
            history_days: 120,
            fetch_delay_ms: 200,
        }
    }
}

/// Backtest cash and commission model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestSection {
    /// IDR
    pub initial_cash: f64,
    /// Proportional, per side
    pub commission: f64,
}

impl Default for BacktestSection {
    fn default() -> Self {
        BacktestSection {
            initial_cash: 100_000_000.0,
            commission: 0.0015,
        }
    }
}

/// Telegram credentials, environment-only
#[derive(Debug, Clone, Default)]
pub struct TelegramConfig {
    pub bot_token: Option<String>,
    pub chat_id: Option<String>,
}

impl TelegramConfig {
    pub fn from_env() -> Self {
        // .env is optional; real env vars win either way
        let _ = dotenv::dotenv();
        TelegramConfig {
            bot_token: std::env::var("TELEGRAM_BOT_TOKEN").ok(),
            chat_id: std::env::var("TELEGRAM_CHAT_ID").ok(),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.bot_token.is_some() && self.chat_id.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_thresholds() {
        let config = Config::default();
        assert_eq!(config.screen.rvol_threshold, 4.0);
        assert_eq!(config.screen.vol_window, 10);
        assert_eq!(config.entry.retrace_pct, 3.0);
        assert_eq!(config.exit.sl_pct, 5.0);
        assert_eq!(config.exit.tp_mode, 2);
        assert_eq!(config.data.history_days, 120);
        assert_eq!(config.backtest.initial_cash, 100_000_000.0);
        assert_eq!(config.backtest.commission, 0.0015);
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let json = r#"{ "screen": { "min_price": 200.0, "min_avg_txn_value": 5000000.0,
            "vol_window": 20, "rvol_threshold": 6.0, "price_position_min": 0.6 } }"#;
        let config: Config = serde_json::from_str(json).unwrap();

        assert_eq!(config.screen.rvol_threshold, 6.0);
        assert_eq!(config.screen.vol_window, 20);
        // untouched sections keep their defaults
        assert_eq!(config.entry.ema_period, 10);
        assert_eq!(config.exit.trailing_stop_pct, 2.5);
    }

    #[test]
    fn test_strategy_params_conversion() {
        let config = Config::default();
        let params = config.strategy_params().unwrap();
        assert_eq!(params.tp_mode, TpMode::MaBreakdown);
        assert_eq!(params.ema_period, 10);

        let mut bad = Config::default();
        bad.exit.tp_mode = 9;
        assert!(bad.strategy_params().is_err());
    }

    #[test]
    fn test_enrich_params_pull_from_all_sections() {
        let mut config = Config::default();
        config.screen.vol_window = 15;
        config.entry.ema_period = 20;
        let params = config.enrich_params();
        assert_eq!(params.vol_window, 15);
        assert_eq!(params.ema_period, 20);
        assert_eq!(params.mfi_period, 14);
        assert_eq!(params.atr_period, 14);
    }
}
