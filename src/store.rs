//! Signal and position persistence
//!
//! SQLite-backed store shared by the scan commands: open positions survive
//! between runs, and sent-signal rows deduplicate Telegram alerts so a
//! 15-minute cron never notifies twice for the same event.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;
use tracing::info;

use crate::types::{ActivePosition, Signal, SignalKind, SpikeEvent, Ticker};

pub struct SignalStore {
    conn: Connection,
}

impl SignalStore {
    /// Open (or create) the store at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create database directory")?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;

        let store = SignalStore { conn };
        store.create_tables()?;
        info!("Signal store ready at {}", path.display());
        Ok(store)
    }

    /// In-memory store, used by tests
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        let store = SignalStore { conn };
        store.create_tables()?;
        Ok(store)
    }

    fn create_tables(&self) -> Result<()> {
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS active_positions (
                ticker TEXT PRIMARY KEY,
                entry_date TEXT NOT NULL,
                entry_price REAL NOT NULL,
                sl_price REAL NOT NULL,
                tp_price REAL,
                spike_json TEXT NOT NULL,
                highest REAL NOT NULL DEFAULT 0
            )",
            [],
        )?;

        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS sent_signals (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                ticker TEXT NOT NULL,
                signal_type TEXT NOT NULL,
                date TEXT NOT NULL,
                price REAL NOT NULL,
                created_at TEXT DEFAULT CURRENT_TIMESTAMP
            )",
            [],
        )?;

        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_sent_signals_lookup
             ON sent_signals(ticker, signal_type, date)",
            [],
        )?;

        Ok(())
    }

    /// All open positions, keyed by ticker
    pub fn load_positions(&self) -> Result<HashMap<Ticker, ActivePosition>> {
        let mut stmt = self.conn.prepare(
            "SELECT ticker, entry_date, entry_price, sl_price, tp_price, spike_json, highest
             FROM active_positions",
        )?;

        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, f64>(2)?,
                row.get::<_, f64>(3)?,
                row.get::<_, Option<f64>>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, f64>(6)?,
            ))
        })?;

        let mut positions = HashMap::new();
        for row in rows {
            let (ticker, entry_date, entry_price, sl_price, tp_price, spike_json, highest) =
                row.context("Failed to read position row")?;

            let spike: SpikeEvent = serde_json::from_str(&spike_json)
                .with_context(|| format!("Corrupt spike_json for {ticker}"))?;
            let entry_date: NaiveDate = entry_date
                .parse()
                .with_context(|| format!("Bad entry_date for {ticker}"))?;

            let ticker = Ticker::new(&ticker);
            positions.insert(
                ticker.clone(),
                ActivePosition {
                    ticker,
                    entry_date,
                    entry_price,
                    spike,
                    sl_price,
                    tp_price,
                    highest_since_entry: highest,
                },
            );
        }

        Ok(positions)
    }

    /// Insert or update a position (one row per ticker)
    pub fn save_position(&self, pos: &ActivePosition) -> Result<()> {
        let spike_json = serde_json::to_string(&pos.spike)?;
        self.conn.execute(
            "INSERT OR REPLACE INTO active_positions
             (ticker, entry_date, entry_price, sl_price, tp_price, spike_json, highest)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                pos.ticker.as_str(),
                pos.entry_date.to_string(),
                pos.entry_price,
                pos.sl_price,
                pos.tp_price,
                spike_json,
                pos.highest_since_entry,
            ],
        )?;
        Ok(())
    }

    pub fn remove_position(&self, ticker: &Ticker) -> Result<()> {
        self.conn.execute(
            "DELETE FROM active_positions WHERE ticker = ?1",
            params![ticker.as_str()],
        )?;
        Ok(())
    }

    /// Has an alert for this (ticker, kind, date) already gone out?
    pub fn already_sent(&self, ticker: &Ticker, kind: SignalKind, date: NaiveDate) -> Result<bool> {
        let row: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM sent_signals WHERE ticker = ?1 AND signal_type = ?2 AND date = ?3",
                params![ticker.as_str(), kind.as_str(), date.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(row.is_some())
    }

    pub fn mark_sent(&self, signal: &Signal) -> Result<()> {
        self.conn.execute(
            "INSERT INTO sent_signals (ticker, signal_type, date, price) VALUES (?1, ?2, ?3, ?4)",
            params![
                signal.ticker.as_str(),
                signal.kind.as_str(),
                signal.date.to_string(),
                signal.price,
            ],
        )?;
        Ok(())
    }
}
