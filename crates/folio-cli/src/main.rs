mod commands;
mod input;
mod output;

use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use std::process;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use commands::analyze::AnalyzeArgs;
use commands::metrics::MetricsArgs;
use commands::moments::MomentsArgs;
use commands::project::ProjectArgs;

/// Portfolio construction and backtesting
#[derive(Parser)]
#[command(
    name = "folio",
    version,
    about = "Portfolio construction and backtesting",
    long_about = "Builds Black-Litterman, mean-variance and equal-weight allocations \
                  from historical prices and model return views, then backtests and \
                  scores each one (Sharpe, Sortino, Calmar, max drawdown)."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format
    #[arg(long, default_value = "json", global = true)]
    output: OutputFormat,

    /// Engine configuration file (YAML or JSON)
    #[arg(long, global = true)]
    config: Option<String>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full three-strategy analysis and backtest
    Analyze(AnalyzeArgs),
    /// Estimate annualised mean returns and covariance from prices
    Moments(MomentsArgs),
    /// Project raw weights onto the bounded, fully invested set
    Project(ProjectArgs),
    /// Score an equity curve
    Metrics(MetricsArgs),
    /// Print version information
    Version,
}

#[derive(Debug, Clone, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Csv,
    Minimal,
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        eprintln!("{}: logging already initialised", "warning".yellow());
    }
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = match input::file::read_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}: {}", "error".red().bold(), e);
            process::exit(1);
        }
    };

    let result: Result<serde_json::Value, Box<dyn std::error::Error>> = match cli.command {
        Commands::Analyze(args) => commands::analyze::run_analyze(args, config),
        Commands::Moments(args) => commands::moments::run_moments(args, &config),
        Commands::Project(args) => commands::project::run_project(args, &config),
        Commands::Metrics(args) => commands::metrics::run_metrics(args, &config),
        Commands::Version => {
            println!("folio {}", env!("CARGO_PKG_VERSION"));
            return;
        }
    };

    match result {
        Ok(value) => {
            output::format_output(&cli.output, &value);
            process::exit(0);
        }
        Err(e) => {
            eprintln!("{}: {}", "error".red().bold(), e);
            process::exit(1);
        }
    }
}
