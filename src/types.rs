//! Core data types used across the screener

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Validation errors for daily bar data
#[derive(Debug, Error)]
pub enum BarValidationError {
    #[error("high ({high}) must be >= low ({low})")]
    HighLessThanLow { high: f64, low: f64 },

    #[error("open ({open}) must be between low ({low}) and high ({high})")]
    OpenOutOfRange { open: f64, low: f64, high: f64 },

    #[error("close ({close}) must be between low ({low}) and high ({high})")]
    CloseOutOfRange { close: f64, low: f64, high: f64 },

    #[error("prices must be positive: open={open}, high={high}, low={low}, close={close}")]
    NonPositivePrice {
        open: f64,
        high: f64,
        low: f64,
        close: f64,
    },
}

/// One trading day's OHLCV bar
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
}

impl Bar {
    /// Create a new bar with validation
    pub fn new(
        date: NaiveDate,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: u64,
    ) -> Result<Self, BarValidationError> {
        let bar = Self {
            date,
            open,
            high,
            low,
            close,
            volume,
        };
        bar.validate()?;
        Ok(bar)
    }

    /// Create a bar without validation (for trusted sources)
    pub fn new_unchecked(
        date: NaiveDate,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: u64,
    ) -> Self {
        Self {
            date,
            open,
            high,
            low,
            close,
            volume,
        }
    }

    /// Validate the bar data
    pub fn validate(&self) -> Result<(), BarValidationError> {
        if self.open <= 0.0 || self.high <= 0.0 || self.low <= 0.0 || self.close <= 0.0 {
            return Err(BarValidationError::NonPositivePrice {
                open: self.open,
                high: self.high,
                low: self.low,
                close: self.close,
            });
        }

        if self.high < self.low {
            return Err(BarValidationError::HighLessThanLow {
                high: self.high,
                low: self.low,
            });
        }

        if self.open < self.low || self.open > self.high {
            return Err(BarValidationError::OpenOutOfRange {
                open: self.open,
                low: self.low,
                high: self.high,
            });
        }

        if self.close < self.low || self.close > self.high {
            return Err(BarValidationError::CloseOutOfRange {
                close: self.close,
                low: self.low,
                high: self.high,
            });
        }

        Ok(())
    }

    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }
}

/// Ticker code using Arc<str> for cheap cloning
///
/// Tickers are cloned into spike events, signals, and positions; Arc<str>
/// keeps those clones O(1) instead of reallocating the string each time.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Ticker(#[serde(with = "arc_str_serde")] std::sync::Arc<str>);

/// Custom serde for Arc<str>
mod arc_str_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::sync::Arc;

    pub fn serialize<S>(value: &Arc<str>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(value)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Arc<str>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(Arc::from(s.as_str()))
    }
}

impl Ticker {
    pub fn new(s: impl AsRef<str>) -> Self {
        Ticker(std::sync::Arc::from(s.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Ticker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A detected volume-spike day for a single ticker.
///
/// Immutable once created by `detect_spikes`. The spike-day high becomes the
/// breakout take-profit target; `pre_spike_close` anchors the entry zone and
/// the adaptive stop-loss.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpikeEvent {
    pub ticker: Ticker,
    pub date: NaiveDate,
    pub rvol: f64,
    pub close: f64,
    /// Close of the bar before the spike day
    pub pre_spike_close: f64,
    pub pct_change: f64,
    pub high: f64,
    pub low: f64,
    pub volume: u64,
    /// Rolling average (volume * close) at spike time
    pub avg_txn_value: f64,
}

/// Signal kind emitted by the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalKind {
    Entry,
    TakeProfit,
    StopLoss,
}

impl SignalKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalKind::Entry => "ENTRY",
            SignalKind::TakeProfit => "TAKE_PROFIT",
            SignalKind::StopLoss => "STOP_LOSS",
        }
    }
}

impl std::fmt::Display for SignalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Take-profit policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TpMode {
    /// Exit when close > spike-day high
    Breakout,
    /// Exit when close < EMA while in profit
    MaBreakdown,
    /// Trailing stop below the highest close since entry
    Trailing,
}

impl TpMode {
    pub const ALL: [TpMode; 3] = [TpMode::Breakout, TpMode::MaBreakdown, TpMode::Trailing];

    pub fn label(&self) -> &'static str {
        match self {
            TpMode::Breakout => "Breakout",
            TpMode::MaBreakdown => "MA Breakdown",
            TpMode::Trailing => "Trailing Stop",
        }
    }

    /// Numeric code used in config files (1/2/3)
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(TpMode::Breakout),
            2 => Some(TpMode::MaBreakdown),
            3 => Some(TpMode::Trailing),
            _ => None,
        }
    }
}

impl std::fmt::Display for TpMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// An immutable signal event produced by the state machine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub ticker: Ticker,
    pub kind: SignalKind,
    pub date: NaiveDate,
    pub price: f64,
    pub spike: SpikeEvent,
    pub entry_price: Option<f64>,
    pub sl_price: Option<f64>,
    pub tp_price: Option<f64>,
    pub note: String,
}

/// Position opened via an ENTRY signal.
///
/// Mutable state owned by the signal engine: `highest_since_entry` is
/// ratcheted up every bar while the position is open and feeds the
/// trailing-stop exit. At most one ActivePosition exists per ticker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivePosition {
    pub ticker: Ticker,
    pub entry_date: NaiveDate,
    pub entry_price: f64,
    pub spike: SpikeEvent,
    /// Fixed at entry
    pub sl_price: f64,
    /// Breakout target (spike-day high); other modes compute exits dynamically
    pub tp_price: Option<f64>,
    pub highest_since_entry: f64,
}

/// Completed backtest trade
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub ticker: Ticker,
    pub entry_date: NaiveDate,
    pub entry_price: f64,
    pub exit_date: NaiveDate,
    pub exit_price: f64,
    pub quantity: f64,
    pub pnl: f64,
    pub commission: f64,
    pub net_pnl: f64,
    /// TAKE_PROFIT / STOP_LOSS, or "End of backtest" for forced liquidation
    pub exit_reason: String,
}

impl Trade {
    /// Gross return percentage of the round trip
    pub fn return_pct(&self) -> f64 {
        if self.entry_price == 0.0 {
            return 0.0;
        }
        (self.exit_price - self.entry_price) / self.entry_price * 100.0
    }
}

/// Backtest summary statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub final_equity: f64,
    pub total_return: f64,
    pub sharpe_ratio: f64,
    pub max_drawdown: f64,
    pub win_rate: f64,
    pub profit_factor: f64,
    /// Average net return per trade, in percent
    pub expectancy: f64,
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub avg_win: f64,
    pub avg_loss: f64,
    pub total_commission: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    #[test]
    fn test_bar_validation() {
        assert!(Bar::new(date("2024-01-02"), 100.0, 110.0, 95.0, 105.0, 1000).is_ok());
        assert!(Bar::new(date("2024-01-02"), 96.0, 90.0, 95.0, 92.0, 1000).is_err());
        assert!(Bar::new(date("2024-01-02"), 100.0, 110.0, 95.0, 120.0, 1000).is_err());
        assert!(Bar::new(date("2024-01-02"), 120.0, 110.0, 95.0, 105.0, 1000).is_err());
    }

    #[test]
    fn test_spike_event_round_trip() {
        let spike = SpikeEvent {
            ticker: Ticker::new("BBCA"),
            date: date("2024-03-05"),
            rvol: 6.0,
            close: 9450.0,
            pre_spike_close: 9100.0,
            pct_change: 3.85,
            high: 9500.0,
            low: 9100.0,
            volume: 6_000_000,
            avg_txn_value: 9.5e9,
        };
        let json = serde_json::to_string(&spike).unwrap();
        let parsed: SpikeEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(spike, parsed);
    }

    #[test]
    fn test_active_position_round_trip() {
        let spike = SpikeEvent {
            ticker: Ticker::new("TLKM"),
            date: date("2024-03-05"),
            rvol: 4.2,
            close: 3200.0,
            pre_spike_close: 3100.0,
            pct_change: 3.23,
            high: 3250.0,
            low: 3090.0,
            volume: 12_000_000,
            avg_txn_value: 3.1e10,
        };
        let pos = ActivePosition {
            ticker: Ticker::new("TLKM"),
            entry_date: date("2024-03-08"),
            entry_price: 3120.0,
            spike,
            sl_price: 2945.0,
            tp_price: Some(3250.0),
            highest_since_entry: 3120.0,
        };
        let json = serde_json::to_string(&pos).unwrap();
        let parsed: ActivePosition = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.ticker, pos.ticker);
        assert_eq!(parsed.entry_price, pos.entry_price);
        assert_eq!(parsed.spike, pos.spike);
        assert_eq!(parsed.tp_price, pos.tp_price);
    }

    #[test]
    fn test_tp_mode_codes() {
        assert_eq!(TpMode::from_code(1), Some(TpMode::Breakout));
        assert_eq!(TpMode::from_code(2), Some(TpMode::MaBreakdown));
        assert_eq!(TpMode::from_code(3), Some(TpMode::Trailing));
        assert_eq!(TpMode::from_code(4), None);
    }
}
