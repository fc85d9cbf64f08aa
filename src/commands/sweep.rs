use crate::commands::{load_bar_series, resolve_risk_config, RiskOverrides};
use crate::context::AppContext;
use crate::sweep::{multiplier_steps, run_sweep, SweepGrid, SweepResult};
use anyhow::{Context, Result};
use clap::Args;
use log::info;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Multiplier ranges to sweep, each as inclusive min/max with a step.
#[derive(Args, Debug, Clone)]
pub struct SweepRanges {
    #[arg(long, default_value_t = 0.5)]
    pub stop_min: f64,
    #[arg(long, default_value_t = 2.0)]
    pub stop_max: f64,
    #[arg(long, default_value_t = 0.5)]
    pub stop_step: f64,
    #[arg(long, default_value_t = 1.0)]
    pub target_min: f64,
    #[arg(long, default_value_t = 3.0)]
    pub target_max: f64,
    #[arg(long, default_value_t = 0.5)]
    pub target_step: f64,
    /// Number of ranked results to log
    #[arg(long, default_value_t = 10)]
    pub top: usize,
    /// Write every ranked result to this JSON file
    #[arg(short, long = "output", value_name = "PATH")]
    pub output: Option<PathBuf>,
}

impl SweepRanges {
    pub fn grid(&self) -> Result<SweepGrid> {
        Ok(SweepGrid {
            stop_multipliers: multiplier_steps(self.stop_min, self.stop_max, self.stop_step)
                .context("Invalid stop multiplier range")?,
            target_multipliers: multiplier_steps(
                self.target_min,
                self.target_max,
                self.target_step,
            )
            .context("Invalid target multiplier range")?,
        })
    }
}

pub async fn run(
    app: &AppContext,
    data_file: &Path,
    overrides: &RiskOverrides,
    ranges: &SweepRanges,
) -> Result<Vec<SweepResult>> {
    let series = load_bar_series(data_file).await?;
    let base = resolve_risk_config(app, overrides)?;
    let grid = ranges.grid()?;
    info!(
        "Sweeping {} stop x {} target multipliers",
        grid.stop_multipliers.len(),
        grid.target_multipliers.len()
    );

    let bars = Arc::new(series.into_bars());
    let results =
        tokio::task::spawn_blocking(move || run_sweep(bars, &base, &grid, true)).await??;

    for (rank, result) in results.iter().take(ranges.top).enumerate() {
        let summary = &result.performance;
        info!(
            "#{} stop x{} target x{}: return {:.2}%, max DD {:.2}%, trades {}, win rate {:.2}%, PF {:.2}",
            rank + 1,
            result.variation.stop_multiplier,
            result.variation.target_multiplier,
            summary.total_return,
            summary.max_drawdown,
            summary.total_trades,
            summary.win_rate,
            summary.profit_factor
        );
    }

    if let Some(path) = &ranges.output {
        let encoded =
            serde_json::to_vec_pretty(&results).context("Failed to encode sweep results")?;
        std::fs::write(path, encoded)
            .with_context(|| format!("Failed to write sweep results to {}", path.display()))?;
        info!("Sweep results written to {}", path.display());
    }
    Ok(results)
}
