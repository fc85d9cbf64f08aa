pub mod backtest;
pub mod monitor;
pub mod snapshot;
pub mod sweep;

use crate::config::{slippage_from_pips, RiskConfig};
use crate::context::AppContext;
use crate::data::BarSeries;
use anyhow::{anyhow, Result};
use clap::Args;
use log::info;
use std::path::Path;
use tokio::fs;

/// Command-line overrides layered over the settings-derived risk config.
#[derive(Args, Debug, Clone, Default)]
pub struct RiskOverrides {
    /// Starting capital
    #[arg(long)]
    pub initial_capital: Option<f64>,
    /// Percent of capital risked per trade
    #[arg(long)]
    pub risk_percent: Option<f64>,
    /// Maximum entries per calendar day
    #[arg(long)]
    pub max_trades_per_day: Option<u32>,
    /// Stop distance in volatility units
    #[arg(long)]
    pub stop_multiplier: Option<f64>,
    /// Target distance in volatility units
    #[arg(long)]
    pub target_multiplier: Option<f64>,
    /// Slippage in pips (0.0001 price units each)
    #[arg(long, conflicts_with = "slippage")]
    pub slippage_pips: Option<f64>,
    /// Slippage as an absolute price offset
    #[arg(long)]
    pub slippage: Option<f64>,
    /// Flat commission per closed trade
    #[arg(long)]
    pub commission: Option<f64>,
    /// Leading bars excluded from trading
    #[arg(long)]
    pub warmup_bars: Option<usize>,
}

impl RiskOverrides {
    pub fn apply(&self, config: &mut RiskConfig) {
        if let Some(value) = self.initial_capital {
            config.initial_capital = value;
        }
        if let Some(value) = self.risk_percent {
            config.risk_percent = value;
        }
        if let Some(value) = self.max_trades_per_day {
            config.max_trades_per_day = value;
        }
        if let Some(value) = self.stop_multiplier {
            config.stop_multiplier = value;
        }
        if let Some(value) = self.target_multiplier {
            config.target_multiplier = value;
        }
        if let Some(pips) = self.slippage_pips {
            config.slippage = slippage_from_pips(pips);
        }
        if let Some(value) = self.slippage {
            config.slippage = value;
        }
        if let Some(value) = self.commission {
            config.commission = value;
        }
        if let Some(value) = self.warmup_bars {
            config.warmup_bars = value;
        }
    }
}

pub(crate) fn resolve_risk_config(
    app: &AppContext,
    overrides: &RiskOverrides,
) -> Result<RiskConfig> {
    let mut config = app.risk_config()?;
    overrides.apply(&mut config);
    config.validate()?;
    Ok(config)
}

pub(crate) async fn load_bar_series(path: &Path) -> Result<BarSeries> {
    if fs::metadata(path).await.is_err() {
        return Err(anyhow!(
            "Bar file not found at {}. Export labelled bars as JSON or convert them with `snapshot`.",
            path.display()
        ));
    }

    let owned = path.to_path_buf();
    let series = tokio::task::spawn_blocking(move || BarSeries::load_from_file(owned)).await??;
    info!(
        "Loaded {} bar(s){} from {}",
        series.len(),
        series
            .symbol()
            .map(|symbol| format!(" for {}", symbol))
            .unwrap_or_default(),
        path.display()
    );
    Ok(series)
}
