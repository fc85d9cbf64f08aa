use crate::commands::{load_bar_series, resolve_risk_config, RiskOverrides};
use crate::context::AppContext;
use crate::engine::Engine;
use crate::models::{BacktestReport, RunStatus};
use anyhow::{Context, Result};
use log::{info, warn};
use std::path::Path;

pub async fn run(
    app: &AppContext,
    data_file: &Path,
    overrides: &RiskOverrides,
    output: Option<&Path>,
) -> Result<BacktestReport> {
    let series = load_bar_series(data_file).await?;
    let config = resolve_risk_config(app, overrides)?;
    info!(
        "Backtesting {} bars (warm-up {}, risk {:.2}%, stop x{}, target x{}, max {} trades/day)",
        series.len(),
        config.warmup_bars,
        config.risk_percent,
        config.stop_multiplier,
        config.target_multiplier,
        config.max_trades_per_day
    );

    let report = Engine::new(config).backtest(series.bars());
    log_report(&report);

    if let Some(path) = output {
        write_report(&report, path)?;
        info!("Backtest report written to {}", path.display());
    }
    Ok(report)
}

fn log_report(report: &BacktestReport) {
    if report.status == RunStatus::NoTrades {
        warn!("No trades executed over the series");
        return;
    }

    let summary = &report.performance;
    for trade in &report.trades {
        info!(
            "{} {} @ {:.5} -> {} @ {:.5} ({}) pnl {:.2}",
            trade.position.direction,
            trade.position.entry_timestamp,
            trade.position.entry_price,
            trade.exit_timestamp,
            trade.exit_price,
            trade.exit_reason.label(),
            trade.pnl
        );
    }
    info!(
        "Trades: {} ({} won, {} lost), win rate {:.2}%, profit factor {:.2}",
        summary.total_trades,
        summary.winning_trades,
        summary.losing_trades,
        summary.win_rate,
        summary.profit_factor
    );
    info!(
        "Return {:.2}%, final capital {:.2}, max drawdown {:.2}%, Sharpe {:.2}",
        summary.total_return, summary.final_capital, summary.max_drawdown, summary.sharpe_ratio
    );
}

fn write_report(report: &BacktestReport, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create report directory {}", parent.display())
            })?;
        }
    }
    let encoded = serde_json::to_vec_pretty(report).context("Failed to encode backtest report")?;
    std::fs::write(path, encoded)
        .with_context(|| format!("Failed to write backtest report to {}", path.display()))
}
