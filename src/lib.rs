//! IDX Volume-Spike Screener
//!
//! Screens Indonesian Stock Exchange (IDX) equities for abnormal volume
//! spikes, tracks retracement entries confirmed by an EMA reclaim, and
//! manages exits through adaptive stops and configurable take-profit modes.
//! The same signal state machine drives the live Telegram alerts and the
//! backtesting/optimization engine.

pub mod backtest;
pub mod config;
pub mod data;
pub mod indicators;
pub mod notify;
pub mod optimize;
pub mod screener;
pub mod signals;
pub mod store;
pub mod tickers;
pub mod types;

pub use config::Config;
pub use types::*;
