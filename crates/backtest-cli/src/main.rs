//! Backtest CLI — drives single backtests and parameter-grid/walk-forward
//! optimization runs against a JSON bar file (spec §6).

mod bars;
mod commands;
mod strategies;

use std::path::PathBuf;
use std::process::ExitCode;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;

use backtest_core::run::RunStatus;
use backtest_logging::LogConfig;

#[derive(Parser)]
#[command(name = "backtest")]
#[command(author, version, about = "Deterministic intraday backtesting core", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a single backtest.
    Run {
        /// Path to a JSON bar file (an array of `Bar` records).
        #[arg(long)]
        bars: PathBuf,

        /// Comma-separated ticker symbols.
        #[arg(long, value_delimiter = ',')]
        symbols: Vec<String>,

        /// Start date (YYYY-MM-DD).
        #[arg(long)]
        start: NaiveDate,

        /// End date (YYYY-MM-DD).
        #[arg(long)]
        end: NaiveDate,

        /// Comma-separated strategy ids to run.
        #[arg(long, value_delimiter = ',')]
        strategies: Vec<String>,

        /// Initial account capital.
        #[arg(long)]
        capital: Decimal,

        /// Risk fraction per trade, e.g. 0.01 for 1%.
        #[arg(long, default_value = "0.01")]
        risk: Decimal,

        /// Disable risk-based position sizing.
        #[arg(long, default_value_t = false)]
        unlimited: bool,

        /// Strategy parameter overrides, key=value, repeatable.
        #[arg(long = "strategy-param")]
        strategy_param: Vec<String>,
    },

    /// Report a run's status. No persistence backend is wired up in this
    /// build (spec §6 leaves storage unspecified), so this always reports
    /// that the run id is unknown; it exists to document the surface.
    Status {
        run_id: String,
    },

    /// Cancel a running backtest. Same caveat as `status`.
    Cancel {
        run_id: String,
    },

    /// Parameter-grid or walk-forward optimization.
    Optimize {
        #[command(subcommand)]
        command: OptimizeCommands,
    },
}

#[derive(Subcommand)]
enum OptimizeCommands {
    Run {
        #[arg(long)]
        bars: PathBuf,

        #[arg(long, value_delimiter = ',')]
        symbols: Vec<String>,

        #[arg(long)]
        start: NaiveDate,

        #[arg(long)]
        end: NaiveDate,

        #[arg(long, value_delimiter = ',')]
        strategies: Vec<String>,

        #[arg(long)]
        capital: Decimal,

        #[arg(long, default_value = "0.01")]
        risk: Decimal,

        /// axis=v1,v2,... repeatable.
        #[arg(long = "grid")]
        grid: Vec<String>,

        /// TOML file of axis = [values...] tables, merged with --grid.
        #[arg(long = "grid-file")]
        grid_file: Option<PathBuf>,

        /// Metric to rank by: net_profit, profit_factor, expectancy,
        /// win_rate, or avg_r_multiple.
        #[arg(long, default_value = "net_profit")]
        metric: String,

        #[arg(long, default_value_t = false)]
        walk_forward: bool,
    },
}

fn main() -> ExitCode {
    let log_config = LogConfig::from_env();
    let _guard = backtest_logging::init_cli_logging(&log_config);

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            bars,
            symbols,
            start,
            end,
            strategies,
            capital,
            risk,
            unlimited,
            strategy_param,
        } => {
            match commands::run::run_command(bars, symbols, start, end, strategies, capital, risk, unlimited, strategy_param) {
                Ok(outcome) => {
                    println!("{}", commands::run::format_outcome(&outcome));
                    match outcome.run.status {
                        RunStatus::Completed => ExitCode::SUCCESS,
                        RunStatus::Cancelled => ExitCode::from(130),
                        _ => ExitCode::from(3),
                    }
                }
                Err(err) => {
                    eprintln!("error: {err:#}");
                    ExitCode::from(2)
                }
            }
        }

        Commands::Status { run_id } => {
            println!("run {run_id}: unknown (no persistence backend configured in this build)");
            ExitCode::SUCCESS
        }

        Commands::Cancel { run_id } => {
            println!("run {run_id}: cannot cancel — no persistence backend configured in this build");
            ExitCode::SUCCESS
        }

        Commands::Optimize { command } => match command {
            OptimizeCommands::Run {
                bars,
                symbols,
                start,
                end,
                strategies,
                capital,
                risk,
                grid,
                grid_file,
                metric,
                walk_forward,
            } => {
                match commands::optimize::optimize_command(bars, symbols, start, end, strategies, capital, risk, grid, grid_file, &metric, walk_forward) {
                    Ok(outcome) => {
                        println!("{}", commands::optimize::format_outcome(&outcome));
                        ExitCode::SUCCESS
                    }
                    Err(err) => {
                        eprintln!("error: {err:#}");
                        ExitCode::from(2)
                    }
                }
            }
        },
    }
}
