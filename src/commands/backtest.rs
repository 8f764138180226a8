//! Backtest command implementation

use anyhow::Result;
use tracing::info;

use idx_spike::backtest::run_backtest;
use idx_spike::data::{load_csv, YahooDailyFetcher};
use idx_spike::types::Ticker;
use idx_spike::Config;

pub fn run(
    config: &Config,
    tickers: Vec<String>,
    days: u32,
    csv: Option<String>,
    show_trades: bool,
) -> Result<()> {
    info!("Starting backtest for {:?}", tickers);

    let (ticker, bars) = match csv {
        Some(path) => {
            let bars = load_csv(&path)?;
            info!("Loaded {} bars from {}", bars.len(), path);
            (Ticker::new(tickers.join("+")), bars)
        }
        None => {
            let fetcher = YahooDailyFetcher::new(config.data.fetch_delay_ms)?;
            super::fetch_and_concat(&fetcher, &tickers, days)?
        }
    };

    if let (Some(first), Some(last)) = (bars.first(), bars.last()) {
        info!(
            "Total bars: {} | Date range: {} -> {}",
            bars.len(),
            first.date,
            last.date
        );
    }

    let params = config.backtest_params()?;
    let bt_config = config.backtest_config();
    let result = run_backtest(&bars, &ticker, &params, &bt_config);

    let m = &result.metrics;
    println!("\n=== Backtest Results: {} ===\n", ticker);
    println!("  {:<24} {}", "TP mode", params.strategy.tp_mode);
    println!("  {:<24} {:.0}", "Final equity", m.final_equity);
    println!("  {:<24} {:+.2}%", "Total return", m.total_return);
    println!("  {:<24} {:.2}", "Sharpe ratio", m.sharpe_ratio);
    println!("  {:<24} {:.2}%", "Max drawdown", m.max_drawdown);
    println!("  {:<24} {:.1}%", "Win rate", m.win_rate);
    println!("  {:<24} {:.2}", "Profit factor", m.profit_factor);
    println!("  {:<24} {:+.2}%", "Expectancy", m.expectancy);
    println!(
        "  {:<24} {} ({} win / {} loss)",
        "Trades", m.total_trades, m.winning_trades, m.losing_trades
    );
    println!("  {:<24} {:.0}", "Total commission", m.total_commission);

    if show_trades {
        println!("\n=== Trades ===\n");
        println!(
            "{:<12} {:>10} {:<12} {:>10} {:>9} {:>14}  Reason",
            "Entry", "Price", "Exit", "Price", "Return", "Net P&L"
        );
        for trade in &result.trades {
            println!(
                "{:<12} {:>10.0} {:<12} {:>10.0} {:>8.2}% {:>14.0}  {}",
                trade.entry_date.to_string(),
                trade.entry_price,
                trade.exit_date.to_string(),
                trade.exit_price,
                trade.return_pct(),
                trade.net_pnl,
                trade.exit_reason
            );
        }
    }

    Ok(())
}
