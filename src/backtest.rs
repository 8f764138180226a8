//! Backtest replay engine
//!
//! Replays a bar series chronologically through the same
//! `check_entry`/`check_exit` state machine the live scan uses, with a
//! single exclusive position, fixed starting cash, and proportional
//! commission per side.

use std::collections::HashMap;

use chrono::NaiveDate;

use crate::indicators::{enrich, EnrichParams};
use crate::screener::{detect_spikes, ScreenParams};
use crate::signals::{check_entry, check_exit, StrategyParams};
use crate::types::{ActivePosition, Bar, PerformanceMetrics, SpikeEvent, Ticker, Trade};

/// Full parameter vector for one replay: spike thresholds plus the
/// entry/exit rules. This is the 8-dimensional space the optimizer searches
/// (rvol_threshold and vol_window live in `screen`, the rest in `strategy`).
#[derive(Debug, Clone, PartialEq)]
pub struct BacktestParams {
    pub screen: ScreenParams,
    pub strategy: StrategyParams,
    /// MFI look-back (held fixed by the optimizer)
    pub mfi_period: usize,
}

impl Default for BacktestParams {
    fn default() -> Self {
        BacktestParams {
            screen: ScreenParams::default(),
            strategy: StrategyParams::default(),
            mfi_period: 14,
        }
    }
}

impl BacktestParams {
    pub fn enrich_params(&self) -> EnrichParams {
        EnrichParams {
            ema_period: self.strategy.ema_period,
            atr_period: self.strategy.atr_period,
            mfi_period: self.mfi_period,
            vol_window: self.screen.vol_window,
        }
    }
}

/// Cash and commission model
#[derive(Debug, Clone)]
pub struct BacktestConfig {
    pub initial_cash: f64,
    /// Proportional commission per side (0.0015 = typical IDX brokerage)
    pub commission: f64,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        BacktestConfig {
            initial_cash: 100_000_000.0,
            commission: 0.0015,
        }
    }
}

#[derive(Debug, Default)]
pub struct BacktestResult {
    pub trades: Vec<Trade>,
    pub equity_curve: Vec<(NaiveDate, f64)>,
    pub metrics: PerformanceMetrics,
}

/// A position plus the sizing the replay attached to it
struct OpenTrade {
    pos: ActivePosition,
    quantity: f64,
    entry_commission: f64,
}

/// Replay `bars` in strict chronological order under one parameter vector.
///
/// At most one position is open at a time; a new spike replaces the active
/// one only while flat, and the active spike is cleared when a position
/// closes. Entries are fully suppressed while a position is open.
pub fn run_backtest(
    bars: &[Bar],
    ticker: &Ticker,
    params: &BacktestParams,
    config: &BacktestConfig,
) -> BacktestResult {
    let enriched = enrich(bars, &params.enrich_params());
    let spikes_by_date: HashMap<NaiveDate, SpikeEvent> = detect_spikes(bars, ticker, &params.screen)
        .into_iter()
        .map(|e| (e.date, e))
        .collect();

    let mut cash = config.initial_cash;
    let mut trades: Vec<Trade> = Vec::new();
    let mut equity_curve: Vec<(NaiveDate, f64)> = Vec::with_capacity(bars.len());
    let mut active_spike: Option<SpikeEvent> = None;
    let mut open: Option<OpenTrade> = None;

    for (i, bar) in bars.iter().enumerate() {
        let window = &enriched[..=i];

        if let Some(trade) = open.as_mut() {
            let exit = check_exit(window, &mut trade.pos, &params.strategy);
            if let Some(sig) = exit {
                if let Some(trade) = open.take() {
                    cash +=
                        settle(&trade, sig.price, sig.date, sig.kind.as_str(), &mut trades, config);
                    active_spike = None;
                }
            }
        } else {
            // spikes are only picked up while flat; the entry date guard
            // prevents same-bar entries on the spike day itself
            if let Some(spike) = spikes_by_date.get(&bar.date) {
                active_spike = Some(spike.clone());
            }

            if let Some(spike) = &active_spike {
                if let Some(sig) = check_entry(window, spike, &params.strategy) {
                    let entry_price = sig.price;
                    let quantity = cash / (entry_price * (1.0 + config.commission));
                    if quantity > 0.0 {
                        let entry_commission = quantity * entry_price * config.commission;
                        cash -= quantity * entry_price + entry_commission;
                        open = Some(OpenTrade {
                            pos: ActivePosition {
                                ticker: ticker.clone(),
                                entry_date: sig.date,
                                entry_price,
                                spike: spike.clone(),
                                sl_price: sig.sl_price.unwrap_or(entry_price),
                                tp_price: sig.tp_price,
                                highest_since_entry: entry_price,
                            },
                            quantity,
                            entry_commission,
                        });
                    }
                }
            }
        }

        let equity = cash
            + open
                .as_ref()
                .map(|t| t.quantity * bar.close)
                .unwrap_or(0.0);
        equity_curve.push((bar.date, equity));
    }

    // liquidate anything still open at the last close for final stats
    if let Some(trade) = open.take() {
        if let Some(last) = bars.last() {
            cash += settle(&trade, last.close, last.date, "End of backtest", &mut trades, config);
            if let Some(point) = equity_curve.last_mut() {
                point.1 = cash;
            }
        }
    }

    let metrics = calculate_metrics(&trades, &equity_curve, config.initial_cash);

    BacktestResult {
        trades,
        equity_curve,
        metrics,
    }
}

/// Close an open trade, record it, and return the cash proceeds
fn settle(
    trade: &OpenTrade,
    exit_price: f64,
    exit_date: NaiveDate,
    exit_reason: &str,
    trades: &mut Vec<Trade>,
    config: &BacktestConfig,
) -> f64 {
    let gross = trade.quantity * exit_price;
    let exit_commission = gross * config.commission;
    let pnl = trade.quantity * (exit_price - trade.pos.entry_price);
    let commission = trade.entry_commission + exit_commission;

    trades.push(Trade {
        ticker: trade.pos.ticker.clone(),
        entry_date: trade.pos.entry_date,
        entry_price: trade.pos.entry_price,
        exit_date,
        exit_price,
        quantity: trade.quantity,
        pnl,
        commission,
        net_pnl: pnl - commission,
        exit_reason: exit_reason.to_string(),
    });

    gross - exit_commission
}

fn calculate_metrics(
    trades: &[Trade],
    equity_curve: &[(NaiveDate, f64)],
    initial_cash: f64,
) -> PerformanceMetrics {
    let final_equity = equity_curve.last().map(|&(_, e)| e).unwrap_or(initial_cash);
    let total_return = (final_equity - initial_cash) / initial_cash * 100.0;

    if trades.is_empty() {
        return PerformanceMetrics {
            final_equity,
            total_return,
            ..Default::default()
        };
    }

    let winning: Vec<&Trade> = trades.iter().filter(|t| t.net_pnl > 0.0).collect();
    let losing: Vec<&Trade> = trades.iter().filter(|t| t.net_pnl <= 0.0).collect();

    let win_rate = winning.len() as f64 / trades.len() as f64 * 100.0;

    let gross_profits: f64 = winning.iter().map(|t| t.net_pnl).sum();
    let gross_losses: f64 = losing.iter().map(|t| t.net_pnl.abs()).sum();

    let profit_factor = if gross_losses > 0.0 {
        gross_profits / gross_losses
    } else if gross_profits > 0.0 {
        f64::INFINITY
    } else {
        0.0
    };

    let avg_win = if winning.is_empty() {
        0.0
    } else {
        gross_profits / winning.len() as f64
    };
    let avg_loss = if losing.is_empty() {
        0.0
    } else {
        gross_losses / losing.len() as f64
    };

    // average net return per trade, relative to what the trade deployed
    let expectancy = trades
        .iter()
        .map(|t| {
            let cost = t.quantity * t.entry_price;
            if cost > 0.0 {
                t.net_pnl / cost * 100.0
            } else {
                0.0
            }
        })
        .sum::<f64>()
        / trades.len() as f64;

    let mut peak = initial_cash;
    let mut max_dd = 0.0;
    for &(_, equity) in equity_curve {
        if equity > peak {
            peak = equity;
        }
        let dd = (peak - equity) / peak;
        if dd > max_dd {
            max_dd = dd;
        }
    }

    // annualized for daily bars
    let returns: Vec<f64> = equity_curve
        .windows(2)
        .map(|w| (w[1].1 - w[0].1) / w[0].1)
        .collect();
    let sharpe_ratio = if returns.len() > 1 {
        let mean = returns.iter().sum::<f64>() / returns.len() as f64;
        let variance =
            returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / returns.len() as f64;
        let std_dev = variance.sqrt();
        if std_dev > 0.0 {
            mean / std_dev * (252.0_f64).sqrt()
        } else {
            0.0
        }
    } else {
        0.0
    };

    PerformanceMetrics {
        final_equity,
        total_return,
        sharpe_ratio,
        max_drawdown: max_dd * 100.0,
        win_rate,
        profit_factor,
        expectancy,
        total_trades: trades.len(),
        winning_trades: winning.len(),
        losing_trades: losing.len(),
        avg_win,
        avg_loss,
        total_commission: trades.iter().map(|t| t.commission).sum(),
    }
}
