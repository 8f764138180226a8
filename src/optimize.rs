//! Parameter optimization
//!
//! Grid search over the spike/entry/exit parameter space with parallel
//! execution using Rayon. Large grids can be randomly subsampled with a
//! seeded RNG so runs stay reproducible.

use indicatif::ProgressBar;
use itertools::iproduct;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;
use std::str::FromStr;

use crate::backtest::{run_backtest, BacktestConfig, BacktestParams};
use crate::types::{Bar, PerformanceMetrics, Ticker, TpMode};

/// Parameter grid for optimization
#[derive(Debug, Clone)]
pub struct ParamGrid {
    pub rvol_thresholds: Vec<f64>,
    pub retrace_pcts: Vec<f64>,
    pub ema_periods: Vec<usize>,
    pub sl_pcts: Vec<f64>,
    pub tp_modes: Vec<TpMode>,
    pub trailing_pcts: Vec<f64>,
    pub mfi_mins: Vec<f64>,
    pub vol_windows: Vec<usize>,
}

impl ParamGrid {
    pub fn quick() -> Self {
        ParamGrid {
            rvol_thresholds: vec![3.0, 5.0, 7.0],
            retrace_pcts: vec![2.0, 4.0],
            ema_periods: vec![10, 20],
            sl_pcts: vec![3.0, 5.0],
            tp_modes: vec![TpMode::MaBreakdown],
            trailing_pcts: vec![2.5],
            mfi_mins: vec![20.0, 40.0],
            vol_windows: vec![10, 20],
        }
    }

    pub fn full() -> Self {
        ParamGrid {
            rvol_thresholds: (3..=10).map(|v| v as f64).collect(),
            retrace_pcts: (1..=8).map(|v| v as f64).collect(),
            ema_periods: vec![5, 10, 20],
            sl_pcts: vec![2.0, 3.0, 4.0, 5.0],
            tp_modes: TpMode::ALL.to_vec(),
            trailing_pcts: vec![1.0, 2.0, 3.0, 4.0, 5.0],
            mfi_mins: vec![20.0, 30.0, 40.0, 50.0, 60.0],
            vol_windows: vec![10, 15, 20, 30],
        }
    }

    /// Restrict the grid to a single take-profit mode
    pub fn with_tp_mode(mut self, mode: TpMode) -> Self {
        self.tp_modes = vec![mode];
        self
    }

    pub fn combination_count(&self) -> usize {
        self.rvol_thresholds.len()
            * self.retrace_pcts.len()
            * self.ema_periods.len()
            * self.sl_pcts.len()
            * self.tp_modes.len()
            * self.trailing_pcts.len()
            * self.mfi_mins.len()
            * self.vol_windows.len()
    }

    /// Expand the grid into full parameter vectors, in grid order
    pub fn generate_params(&self, base: &BacktestParams) -> Vec<BacktestParams> {
        iproduct!(
            &self.rvol_thresholds,
            &self.retrace_pcts,
            &self.ema_periods,
            &self.sl_pcts,
            &self.tp_modes,
            &self.trailing_pcts,
            &self.mfi_mins,
            &self.vol_windows
        )
        .map(
            |(&rvol, &retrace, &ema, &sl, &tp, &trailing, &mfi, &vol)| {
                let mut params = base.clone();
                params.screen.rvol_threshold = rvol;
                params.screen.vol_window = vol;
                params.strategy.retrace_pct = retrace;
                params.strategy.ema_period = ema;
                params.strategy.sl_pct = sl;
                params.strategy.tp_mode = tp;
                params.strategy.trailing_pct = trailing;
                params.strategy.mfi_min = mfi;
                params
            },
        )
        .collect()
    }
}

/// Objective to maximize
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    FinalEquity,
    TotalReturn,
    WinRate,
    Sharpe,
    /// Maximized as its negation (smaller drawdown scores higher)
    MaxDrawdown,
}

impl Metric {
    pub fn score(&self, metrics: &PerformanceMetrics) -> f64 {
        match self {
            Metric::FinalEquity => metrics.final_equity,
            Metric::TotalReturn => metrics.total_return,
            Metric::WinRate => metrics.win_rate,
            Metric::Sharpe => metrics.sharpe_ratio,
            Metric::MaxDrawdown => -metrics.max_drawdown,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Metric::FinalEquity => "final_equity",
            Metric::TotalReturn => "return",
            Metric::WinRate => "win_rate",
            Metric::Sharpe => "sharpe",
            Metric::MaxDrawdown => "max_drawdown",
        }
    }
}

impl FromStr for Metric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "final_equity" | "equity" => Ok(Metric::FinalEquity),
            "return" | "total_return" => Ok(Metric::TotalReturn),
            "win_rate" => Ok(Metric::WinRate),
            "sharpe" => Ok(Metric::Sharpe),
            "max_drawdown" | "drawdown" => Ok(Metric::MaxDrawdown),
            other => Err(format!(
                "unknown metric '{other}' (expected final_equity, return, win_rate, sharpe, or max_drawdown)"
            )),
        }
    }
}

/// Outcome of one parameter combination
#[derive(Debug, Clone)]
pub struct OptimizationResult {
    pub params: BacktestParams,
    pub metrics: PerformanceMetrics,
}

/// Run every trial in parallel, preserving grid order in the output
fn run_trials(
    bars: &[Bar],
    ticker: &Ticker,
    trials: Vec<BacktestParams>,
    config: &BacktestConfig,
    progress: Option<&ProgressBar>,
) -> Vec<OptimizationResult> {
    trials
        .into_par_iter()
        .map(|params| {
            let result = run_backtest(bars, ticker, &params, config);
            if let Some(pb) = progress {
                pb.inc(1);
            }
            OptimizationResult {
                params,
                metrics: result.metrics,
            }
        })
        .collect()
}

/// Pick which grid combinations to evaluate.
///
/// When `max_tries` is below the grid size, a seeded random subset is drawn
/// without replacement and evaluated in grid order, so the same seed always
/// yields the same trials and the same winner.
fn select_trials(
    all: Vec<BacktestParams>,
    max_tries: Option<usize>,
    seed: u64,
) -> Vec<BacktestParams> {
    match max_tries {
        Some(k) if k < all.len() => {
            let mut rng = StdRng::seed_from_u64(seed);
            let mut indices = rand::seq::index::sample(&mut rng, all.len(), k).into_vec();
            indices.sort_unstable();

            let mut all = all;
            let mut picked = Vec::with_capacity(k);
            // drain from the back so earlier indices stay valid
            for &i in indices.iter().rev() {
                picked.push(all.swap_remove(i));
            }
            picked.reverse();
            picked
        }
        _ => all,
    }
}

/// Grid-search the parameter space for one ticker's bar history
pub fn optimize(
    bars: &[Bar],
    ticker: &Ticker,
    grid: &ParamGrid,
    base: &BacktestParams,
    config: &BacktestConfig,
    max_tries: Option<usize>,
    seed: u64,
) -> Vec<OptimizationResult> {
    let trials = select_trials(grid.generate_params(base), max_tries, seed);
    tracing::info!(
        ticker = %ticker,
        trials = trials.len(),
        grid = grid.combination_count(),
        "testing parameter combinations"
    );
    run_trials(bars, ticker, trials, config, None)
}

/// Same as `optimize` with a progress bar ticked per trial
pub fn optimize_with_progress(
    bars: &[Bar],
    ticker: &Ticker,
    grid: &ParamGrid,
    base: &BacktestParams,
    config: &BacktestConfig,
    max_tries: Option<usize>,
    seed: u64,
    progress: ProgressBar,
) -> Vec<OptimizationResult> {
    let trials = select_trials(grid.generate_params(base), max_tries, seed);
    progress.set_length(trials.len() as u64);
    run_trials(bars, ticker, trials, config, Some(&progress))
}

/// Best result under `metric`, first-encountered wins on ties.
///
/// Sequential strictly-greater scan over trial order keeps the winner
/// deterministic regardless of how the trials were parallelized.
pub fn best_result<'a>(
    results: &'a [OptimizationResult],
    metric: Metric,
) -> Option<&'a OptimizationResult> {
    let mut best: Option<&OptimizationResult> = None;
    for result in results {
        let improved = match best {
            Some(b) => metric.score(&result.metrics) > metric.score(&b.metrics),
            None => true,
        };
        if improved {
            best = Some(result);
        }
    }
    best
}

/// Sort results by `metric` descending, stable so grid order breaks ties
pub fn sort_results(results: &mut [OptimizationResult], metric: Metric) {
    results.sort_by(|a, b| {
        metric
            .score(&b.metrics)
            .partial_cmp(&metric.score(&a.metrics))
            .unwrap_or(std::cmp::Ordering::Equal)
    });
}

/// Best result per take-profit mode, each capped at the same trial count
pub fn compare_tp_modes(
    bars: &[Bar],
    ticker: &Ticker,
    grid: &ParamGrid,
    base: &BacktestParams,
    config: &BacktestConfig,
    metric: Metric,
    seed: u64,
) -> Vec<(TpMode, OptimizationResult)> {
    const TRIES_PER_MODE: usize = 200;

    TpMode::ALL
        .iter()
        .filter_map(|&mode| {
            let mode_grid = grid.clone().with_tp_mode(mode);
            let results = optimize(
                bars,
                ticker,
                &mode_grid,
                base,
                config,
                Some(TRIES_PER_MODE),
                seed,
            );
            best_result(&results, metric).cloned().map(|r| (mode, r))
        })
        .collect()
}

/// Best score per (RVOL threshold, retrace %) cell, for a quick sensitivity
/// view of the two dominant dimensions
#[derive(Debug)]
pub struct Heatmap {
    pub rvols: Vec<f64>,
    pub retraces: Vec<f64>,
    /// cells[rvol_idx][retrace_idx], `None` where no trial landed
    pub cells: Vec<Vec<Option<f64>>>,
}

impl Heatmap {
    pub fn from_results(results: &[OptimizationResult], grid: &ParamGrid, metric: Metric) -> Self {
        let rvols = grid.rvol_thresholds.clone();
        let retraces = grid.retrace_pcts.clone();
        let mut cells = vec![vec![None; retraces.len()]; rvols.len()];

        for result in results {
            let ri = rvols
                .iter()
                .position(|&v| v == result.params.screen.rvol_threshold);
            let ci = retraces
                .iter()
                .position(|&v| v == result.params.strategy.retrace_pct);
            if let (Some(ri), Some(ci)) = (ri, ci) {
                let score = metric.score(&result.metrics);
                let cell = &mut cells[ri][ci];
                if cell.map_or(true, |prev| score > prev) {
                    *cell = Some(score);
                }
            }
        }

        Heatmap {
            rvols,
            retraces,
            cells,
        }
    }

    /// Plain-text table, RVOL rows by retrace columns
    pub fn render(&self, metric: Metric) -> String {
        let mut out = format!("{} by RVOL (rows) x retrace% (cols)\n", metric.label());
        out.push_str("rvol\\ret ");
        for r in &self.retraces {
            out.push_str(&format!("{:>10.1}", r));
        }
        out.push('\n');

        for (ri, rvol) in self.rvols.iter().enumerate() {
            out.push_str(&format!("{:<9.1}", rvol));
            for cell in &self.cells[ri] {
                match cell {
                    Some(v) => out.push_str(&format!("{:>10.2}", v)),
                    None => out.push_str(&format!("{:>10}", "-")),
                }
            }
            out.push('\n');
        }

        out
    }
}
