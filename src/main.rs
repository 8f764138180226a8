//! IDX volume-spike screener - main entry point
//!
//! This binary provides four subcommands:
//! - daily: nightly full-market scan with Telegram report
//! - intraday: frequent signal check for monitored tickers
//! - backtest: replay the strategy over historical bars
//! - optimize: grid-search strategy parameters

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;

#[derive(Parser, Debug)]
#[command(name = "idx-spike")]
#[command(about = "IDX volume-spike screener with retracement entries, backtesting, and optimization", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to JSON configuration file (defaults used when omitted)
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Nightly scan: refresh tickers, detect spikes, report near-entry stocks
    Daily {
        /// Force a refresh of the ticker list from the IDX website
        #[arg(long)]
        refresh_tickers: bool,

        /// Only report spikes within this many days of the latest bar
        #[arg(long, default_value = "5")]
        lookback: u64,
    },

    /// Intraday check: entry/exit signals for spiked and held tickers
    Intraday,

    /// Backtest the strategy over one or more tickers
    Backtest {
        /// IDX ticker codes (e.g. BBCA TLKM)
        #[arg(required = true)]
        tickers: Vec<String>,

        /// History length in days
        #[arg(long, default_value = "365")]
        days: u32,

        /// Load bars from a local CSV instead of fetching
        #[arg(long)]
        csv: Option<String>,

        /// Print each trade's entry and exit
        #[arg(long)]
        trades: bool,
    },

    /// Grid-search strategy parameters
    Optimize {
        /// IDX ticker codes (e.g. BBCA TLKM)
        #[arg(required = true)]
        tickers: Vec<String>,

        /// History length in days
        #[arg(long, default_value = "365")]
        days: u32,

        /// Grid size (quick or full)
        #[arg(short, long, default_value = "quick")]
        mode: String,

        /// Metric to maximize (final_equity, return, win_rate, sharpe, max_drawdown)
        #[arg(long, default_value = "final_equity")]
        metric: String,

        /// Cap on randomly sampled combinations (0 = exhaustive)
        #[arg(long, default_value = "500")]
        max_tries: usize,

        /// RNG seed for grid subsampling
        #[arg(long, default_value = "42")]
        seed: u64,

        /// Number of top results to show
        #[arg(short, long, default_value = "10")]
        top: usize,

        /// Compare the best result of each take-profit mode
        #[arg(long)]
        compare: bool,

        /// Print an RVOL x retrace sensitivity heatmap
        #[arg(long)]
        heatmap: bool,
    },
}

fn setup_logging(verbose: bool, command_name: &str, file_only: bool) -> Result<()> {
    std::fs::create_dir_all("logs")?;

    let log_filename = format!(
        "{}_{}.log",
        command_name,
        chrono::Local::now().format("%Y-%m-%d_%H-%M-%S")
    );
    let log_path = PathBuf::from("logs").join(&log_filename);

    let level = if verbose { "debug" } else { "info" };
    let filter_str = format!("{level},hyper=warn,hyper_util=warn,reqwest=warn,rustls=warn,h2=warn");
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&filter_str));

    let file_appender = tracing_appender::rolling::never("logs", &log_filename);

    if file_only {
        // keep the console clean for the optimizer's progress bar
        let file_layer = tracing_subscriber::fmt::layer()
            .with_writer(file_appender)
            .with_target(true)
            .with_ansi(false);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(file_layer)
            .init();
    } else {
        let console_layer = tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_ansi(true);

        let file_layer = tracing_subscriber::fmt::layer()
            .with_writer(file_appender)
            .with_target(true)
            .with_ansi(false);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .with(file_layer)
            .init();

        info!("Log file: {}", log_path.display());
    }

    Ok(())
}

fn load_config(path: Option<String>) -> Result<idx_spike::Config> {
    match path {
        Some(path) => {
            let config = idx_spike::Config::from_file(&path)?;
            info!("Loaded configuration from: {}", path);
            Ok(config)
        }
        None => Ok(idx_spike::Config::from_env()),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let (command_name, file_only) = match &cli.command {
        Commands::Daily { .. } => ("daily", false),
        Commands::Intraday => ("intraday", false),
        Commands::Backtest { .. } => ("backtest", false),
        Commands::Optimize { .. } => ("optimize", true), // file-only for clean progress bar
    };

    setup_logging(cli.verbose, command_name, file_only)?;
    let config = load_config(cli.config)?;

    match cli.command {
        Commands::Daily {
            refresh_tickers,
            lookback,
        } => commands::daily::run(&config, refresh_tickers, lookback),

        Commands::Intraday => commands::intraday::run(&config),

        Commands::Backtest {
            tickers,
            days,
            csv,
            trades,
        } => commands::backtest::run(&config, tickers, days, csv, trades),

        Commands::Optimize {
            tickers,
            days,
            mode,
            metric,
            max_tries,
            seed,
            top,
            compare,
            heatmap,
        } => commands::optimize::run(
            &config, tickers, days, mode, metric, max_tries, seed, top, compare, heatmap,
        ),
    }
}
