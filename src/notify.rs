//! Telegram notifications
//!
//! Formats and sends the daily report and intraday signal alerts via the
//! Telegram Bot API. Sending is best-effort: a failed or unconfigured send
//! returns `false` and never aborts a scan.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use std::time::Duration;
use tracing::{error, warn};

use crate::config::TelegramConfig;
use crate::signals::NearEntry;
use crate::types::{Signal, SignalKind, SpikeEvent};

const MAX_SPIKES_IN_REPORT: usize = 15;
const MAX_NEAR_ENTRY_IN_REPORT: usize = 10;

pub struct TelegramNotifier {
    client: reqwest::blocking::Client,
    credentials: Option<(String, String)>,
}

#[derive(serde::Serialize)]
struct SendMessagePayload<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'a str,
}

impl TelegramNotifier {
    pub fn new(config: &TelegramConfig) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .context("Failed to build HTTP client")?;

        let credentials = match (&config.bot_token, &config.chat_id) {
            (Some(token), Some(chat_id)) => Some((token.clone(), chat_id.clone())),
            _ => None,
        };

        Ok(TelegramNotifier {
            client,
            credentials,
        })
    }

    /// Send one HTML-formatted message; returns whether it went out
    pub fn send_message(&self, text: &str) -> bool {
        let (token, chat_id) = match &self.credentials {
            Some(creds) => creds,
            None => {
                warn!("Telegram credentials not configured, skipping send");
                return false;
            }
        };

        let url = format!("https://api.telegram.org/bot{token}/sendMessage");
        let payload = SendMessagePayload {
            chat_id,
            text,
            parse_mode: "HTML",
        };

        match self.client.post(&url).json(&payload).send() {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                error!("Telegram API returned status {}", response.status());
                false
            }
            Err(e) => {
                error!("Failed to send Telegram message: {:#}", e);
                false
            }
        }
    }

    pub fn send_daily_report(
        &self,
        spikes: &[SpikeEvent],
        near_entry: &[NearEntry],
        date: NaiveDate,
    ) -> bool {
        self.send_message(&format_daily_report(spikes, near_entry, date))
    }

    pub fn send_signal_alert(&self, signal: &Signal) -> bool {
        self.send_message(&format_signal_alert(signal))
    }
}

// =============================================================================
// Formatters
// =============================================================================

/// IDR with thousand separators, no decimals
fn idr(value: f64) -> String {
    let negative = value < 0.0;
    let digits = format!("{:.0}", value.abs());

    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }

    if negative {
        format!("-{out}")
    } else {
        out
    }
}

/// Compact form for large transaction values
fn trillion(value: f64) -> String {
    if value >= 1e12 {
        format!("{:.1}T", value / 1e12)
    } else if value >= 1e9 {
        format!("{:.1}B", value / 1e9)
    } else {
        idr(value)
    }
}

/// Build the nightly report message
pub fn format_daily_report(
    spikes: &[SpikeEvent],
    near_entry: &[NearEntry],
    date: NaiveDate,
) -> String {
    let mut lines = vec![format!(
        "📊 <b>IDX Volume Spike Report – {}</b>\n",
        date.format("%d %b %Y")
    )];

    if spikes.is_empty() {
        lines.push("No volume spikes detected today.".to_string());
    } else {
        lines.push("🔥 <b>VOLUME SPIKE DETECTED:</b>".to_string());
        for (i, s) in spikes.iter().take(MAX_SPIKES_IN_REPORT).enumerate() {
            lines.push(format!(
                "{}. <b>{}</b> – RVOL: {}x | Close: {} ({:+.1}%) | Txn: {}",
                i + 1,
                s.ticker,
                s.rvol,
                idr(s.close),
                s.pct_change,
                trillion(s.avg_txn_value)
            ));
        }
    }

    if !near_entry.is_empty() {
        lines.push(String::new());
        lines.push("📍 <b>NEAR ENTRY LEVEL:</b>".to_string());
        for (i, ne) in near_entry.iter().take(MAX_NEAR_ENTRY_IN_REPORT).enumerate() {
            let ema_status = if ne.ema_reclaiming {
                "reclaiming ✓"
            } else {
                "below ✗"
            };
            lines.push(format!(
                "{}. <b>{}</b> – Retrace: {}% from spike | EMA: {}\n   Entry zone: {}–{} | SL: {} | TP: {}",
                i + 1,
                ne.ticker,
                ne.retrace_pct,
                ema_status,
                idr(ne.entry_zone_low),
                idr(ne.entry_zone_high),
                idr(ne.sl),
                idr(ne.tp)
            ));
        }
    }

    lines.join("\n")
}

/// Build an intraday alert message for a single signal
pub fn format_signal_alert(signal: &Signal) -> String {
    let (icon, label) = match signal.kind {
        SignalKind::Entry => ("🟢", "ENTRY SIGNAL"),
        SignalKind::TakeProfit => ("🎯", "TAKE PROFIT"),
        SignalKind::StopLoss => ("🔴", "STOP LOSS"),
    };

    let mut parts = vec![
        format!(
            "{icon} <b>{label} – {} @ {}</b>\n",
            signal.ticker,
            idr(signal.price)
        ),
        signal.note.clone(),
    ];

    if let Some(entry) = signal.entry_price {
        if entry > 0.0 && signal.kind != SignalKind::Entry {
            let pnl_pct = (signal.price - entry) / entry * 100.0;
            parts.push(format!("Entry: {} | P&L: {pnl_pct:+.1}%", idr(entry)));
        }
    }

    if let Some(sl) = signal.sl_price {
        let sl_dist = (sl - signal.price) / signal.price * 100.0;
        parts.push(format!("SL: {} ({sl_dist:+.1}%)", idr(sl)));
    }

    if let Some(tp) = signal.tp_price {
        let tp_dist = (tp - signal.price) / signal.price * 100.0;
        parts.push(format!("TP: {} ({tp_dist:+.1}%)", idr(tp)));
    }

    parts.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Ticker;

    fn date(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn sample_spike() -> SpikeEvent {
        SpikeEvent {
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
        }
    }

    #[test]
    fn test_idr_formatting() {
        assert_eq!(idr(9450.0), "9,450");
        assert_eq!(idr(100_000_000.0), "100,000,000");
        assert_eq!(idr(999.0), "999");
        assert_eq!(idr(-12500.0), "-12,500");
    }

    #[test]
    fn test_trillion_formatting() {
        assert_eq!(trillion(2.5e12), "2.5T");
        assert_eq!(trillion(9.5e9), "9.5B");
        assert_eq!(trillion(500_000.0), "500,000");
    }

    #[test]
    fn test_daily_report_sections() {
        let near = NearEntry {
            ticker: Ticker::new("TLKM"),
            current_close: 3110.0,
            pre_spike_close: 3100.0,
            retrace_pct: 0.32,
            ema_reclaiming: true,
            mfi: Some(45.0),
            entry_zone_low: 3007.0,
            entry_zone_high: 3100.0,
            sl: 2945.0,
            tp: 3250.0,
        };

        let report = format_daily_report(&[sample_spike()], &[near], date("2024-03-05"));

        assert!(report.contains("IDX Volume Spike Report – 05 Mar 2024"));
        assert!(report.contains("VOLUME SPIKE DETECTED"));
        assert!(report.contains("<b>BBCA</b> – RVOL: 6x"));
        assert!(report.contains("9.5B"));
        assert!(report.contains("NEAR ENTRY LEVEL"));
        assert!(report.contains("reclaiming ✓"));
        assert!(report.contains("Entry zone: 3,007–3,100"));
    }

    #[test]
    fn test_daily_report_no_spikes() {
        let report = format_daily_report(&[], &[], date("2024-03-05"));
        assert!(report.contains("No volume spikes detected today."));
        assert!(!report.contains("NEAR ENTRY LEVEL"));
    }

    #[test]
    fn test_signal_alert_exit_includes_pnl() {
        let signal = Signal {
            ticker: Ticker::new("BBCA"),
            kind: SignalKind::TakeProfit,
            date: date("2024-03-12"),
            price: 9600.0,
            spike: sample_spike(),
            entry_price: Some(9150.0),
            sl_price: None,
            tp_price: None,
            note: "Breakout above spike high 9500".to_string(),
        };

        let text = format_signal_alert(&signal);
        assert!(text.contains("🎯 <b>TAKE PROFIT – BBCA @ 9,600</b>"));
        assert!(text.contains("P&L: +4.9%"));
    }

    #[test]
    fn test_signal_alert_entry_shows_levels() {
        let signal = Signal {
            ticker: Ticker::new("BBCA"),
            kind: SignalKind::Entry,
            date: date("2024-03-08"),
            price: 9150.0,
            spike: sample_spike(),
            entry_price: Some(9150.0),
            sl_price: Some(8645.0),
            tp_price: Some(9500.0),
            note: "Retrace 0.5% | EMA reclaim | MFI 55".to_string(),
        };

        let text = format_signal_alert(&signal);
        assert!(text.contains("🟢 <b>ENTRY SIGNAL – BBCA @ 9,150</b>"));
        assert!(text.contains("SL: 8,645 (-5.5%)"));
        assert!(text.contains("TP: 9,500 (+3.8%)"));
        // entry alerts don't show P&L against themselves
        assert!(!text.contains("P&L"));
    }

    #[test]
    fn test_unconfigured_notifier_returns_false() {
        let notifier = TelegramNotifier::new(&TelegramConfig::default()).unwrap();
        assert!(!notifier.send_message("hello"));
    }
}
