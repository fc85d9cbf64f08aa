use anyhow::Result;
use clap::{Parser, Subcommand};
use log::info;
use signal_engine::{
    commands::{backtest, monitor, snapshot, sweep, RiskOverrides},
    context::AppContext,
};
use std::path::PathBuf;

const DEFAULT_BAR_FILE: &str = "data/bars.json";

#[derive(Parser)]
#[command(name = "signal-engine")]
#[command(about = "Backtests and live-monitors signal-labelled price bars")]
struct Cli {
    /// JSON object of settings; environment variables take precedence
    #[arg(long, global = true, value_name = "PATH")]
    settings: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a labelled bar series and report trades and performance
    Backtest {
        /// Path to the bar file (JSON or `.bin` snapshot)
        #[arg(long = "data-file", value_name = "PATH")]
        data_file: Option<PathBuf>,
        /// Write the full report as JSON
        #[arg(short, long = "output", value_name = "PATH")]
        output: Option<PathBuf>,
        #[command(flatten)]
        risk: RiskOverrides,
    },
    /// Backtest a grid of stop/target multipliers in parallel
    Sweep {
        /// Path to the bar file (JSON or `.bin` snapshot)
        #[arg(long = "data-file", value_name = "PATH")]
        data_file: Option<PathBuf>,
        #[command(flatten)]
        ranges: sweep::SweepRanges,
        #[command(flatten)]
        risk: RiskOverrides,
    },
    /// Poll a bar file and act on the newest two bars until interrupted
    Monitor {
        #[command(flatten)]
        args: monitor::MonitorArgs,
        #[command(flatten)]
        risk: RiskOverrides,
    },
    /// Convert a JSON bar file into a binary snapshot
    Snapshot {
        /// JSON bar file to read
        #[arg(long = "input", value_name = "PATH")]
        input: PathBuf,
        /// Destination for the snapshot
        #[arg(short, long = "output", value_name = "PATH")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let Cli { settings, command } = Cli::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let app_context = AppContext::initialize(settings.as_deref())?;

    info!("Starting signal engine. Simulated results only; not financial advice.");

    match command {
        Commands::Backtest {
            data_file,
            output,
            risk,
        } => {
            let data_path = resolve_bar_path(data_file);
            backtest::run(&app_context, &data_path, &risk, output.as_deref()).await?;
        }
        Commands::Sweep {
            data_file,
            ranges,
            risk,
        } => {
            let data_path = resolve_bar_path(data_file);
            sweep::run(&app_context, &data_path, &risk, &ranges).await?;
        }
        Commands::Monitor { args, risk } => {
            monitor::run(&app_context, &args, &risk).await?;
        }
        Commands::Snapshot { input, output } => {
            snapshot::run(&input, &output).await?;
        }
    }

    Ok(())
}

fn resolve_bar_path(cli_value: Option<PathBuf>) -> PathBuf {
    if let Some(path) = cli_value {
        return path;
    }

    PathBuf::from(DEFAULT_BAR_FILE)
}
