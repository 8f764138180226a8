//! Optimize command implementation

use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use idx_spike::data::YahooDailyFetcher;
use idx_spike::optimize::{
    best_result, compare_tp_modes, optimize_with_progress, sort_results, Heatmap, Metric,
    OptimizationResult, ParamGrid,
};
use idx_spike::Config;

#[allow(clippy::too_many_arguments)]
pub fn run(
    config: &Config,
    tickers: Vec<String>,
    days: u32,
    mode: String,
    metric: String,
    max_tries: usize,
    seed: u64,
    top: usize,
    compare: bool,
    heatmap: bool,
) -> Result<()> {
    let metric: Metric = metric.parse().map_err(anyhow::Error::msg)?;
    let grid = match mode.as_str() {
        "quick" => ParamGrid::quick(),
        "full" => ParamGrid::full(),
        other => anyhow::bail!("Unknown grid mode: {other} (expected quick or full)"),
    };
    let max_tries = if max_tries == 0 { None } else { Some(max_tries) };

    let fetcher = YahooDailyFetcher::new(config.data.fetch_delay_ms)?;
    let (ticker, bars) = super::fetch_and_concat(&fetcher, &tickers, days)?;
    info!("Total bars: {}", bars.len());

    let base = config.backtest_params()?;
    let bt_config = config.backtest_config();

    if compare {
        println!("\n=== TP Mode Comparison ({}) ===\n", metric.label());
        println!(
            "{:<14} {:>14} {:>10} {:>10} {:>10} {:>8}",
            "Mode", "FinalEquity", "Return%", "WinRate%", "MaxDD%", "Trades"
        );
        for (mode, result) in
            compare_tp_modes(&bars, &ticker, &grid, &base, &bt_config, metric, seed)
        {
            let m = &result.metrics;
            println!(
                "{:<14} {:>14.0} {:>9.2}% {:>9.1}% {:>9.2}% {:>8}",
                mode.label(),
                m.final_equity,
                m.total_return,
                m.win_rate,
                m.max_drawdown,
                m.total_trades
            );
        }
        println!();
        return Ok(());
    }

    let pb = ProgressBar::new(grid.combination_count() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")?
            .progress_chars("#>-"),
    );
    pb.set_message("Optimizing...");

    info!("Starting parallel optimization");
    let mut results = optimize_with_progress(
        &bars, &ticker, &grid, &base, &bt_config, max_tries, seed, pb.clone(),
    );
    pb.finish_with_message("Optimization complete");

    if let Some(best) = best_result(&results, metric) {
        print_best(best);
    }

    if heatmap {
        println!("\n{}", Heatmap::from_results(&results, &grid, metric).render(metric));
    }

    sort_results(&mut results, metric);
    let display_count = top.min(results.len());
    println!("\n{}", "=".repeat(100));
    println!(
        "TOP {} OPTIMIZATION RESULTS (sorted by {})",
        display_count,
        metric.label()
    );
    println!("{}", "=".repeat(100));
    println!(
        "{:<6} {:>14} {:>9} {:>9} {:>8} {:>7} | Parameters",
        "Rank", "FinalEquity", "Return%", "WinRate%", "MaxDD%", "Trades"
    );
    println!("{}", "-".repeat(100));

    for (i, result) in results.iter().take(display_count).enumerate() {
        let m = &result.metrics;
        println!(
            "{:<6} {:>14.0} {:>8.2}% {:>8.1}% {:>7.2}% {:>7} | {}",
            i + 1,
            m.final_equity,
            m.total_return,
            m.win_rate,
            m.max_drawdown,
            m.total_trades,
            params_summary(result)
        );
    }

    Ok(())
}

fn params_summary(result: &OptimizationResult) -> String {
    let p = &result.params;
    format!(
        "RVOL:{:.0} Ret:{:.0}% EMA:{} SL:{:.0}% TP:{} Trail:{:.1}% MFI:{:.0} Vol:{}",
        p.screen.rvol_threshold,
        p.strategy.retrace_pct,
        p.strategy.ema_period,
        p.strategy.sl_pct,
        p.strategy.tp_mode.label(),
        p.strategy.trailing_pct,
        p.strategy.mfi_min,
        p.screen.vol_window
    )
}

fn print_best(best: &OptimizationResult) {
    let m = &best.metrics;
    println!("\nBest parameters:");
    println!("  {}", params_summary(best));
    println!("\nPerformance:");
    println!("  {:<24} {:.0}", "Final equity", m.final_equity);
    println!("  {:<24} {:+.2}%", "Total return", m.total_return);
    println!("  {:<24} {:.1}%", "Win rate", m.win_rate);
    println!("  {:<24} {:.2}%", "Max drawdown", m.max_drawdown);
    println!("  {:<24} {:.2}", "Sharpe ratio", m.sharpe_ratio);
    println!("  {:<24} {}", "Trades", m.total_trades);
    println!("  {:<24} {:+.2}%", "Expectancy", m.expectancy);
}
