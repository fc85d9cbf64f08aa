use crate::config::RiskConfig;
use crate::engine::Engine;
use crate::models::{PerformanceSummary, PriceBar, RunStatus};
use anyhow::{anyhow, ensure, Result};
use crossbeam_channel::{bounded, Receiver, Sender};
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn};
use serde::Serialize;
use std::cmp::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::Instant;

const MAX_GRID_STEPS: usize = 1_000;

/// Stop/target multiplier pairs to replay against one series.
#[derive(Debug, Clone, PartialEq)]
pub struct SweepGrid {
    pub stop_multipliers: Vec<f64>,
    pub target_multipliers: Vec<f64>,
}

impl SweepGrid {
    pub fn variations(&self) -> Vec<SweepVariation> {
        let mut variations = Vec::with_capacity(self.len());
        for &stop_multiplier in &self.stop_multipliers {
            for &target_multiplier in &self.target_multipliers {
                variations.push(SweepVariation {
                    id: variations.len(),
                    stop_multiplier,
                    target_multiplier,
                });
            }
        }
        variations
    }

    pub fn len(&self) -> usize {
        self.stop_multipliers.len() * self.target_multipliers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Inclusive `min..=max` in `step` increments, rounded to 4 decimals.
pub fn multiplier_steps(min: f64, max: f64, step: f64) -> Result<Vec<f64>> {
    ensure!(
        min.is_finite() && max.is_finite() && step.is_finite(),
        "Multiplier range must be finite"
    );
    ensure!(min > 0.0, "Multiplier range must start above 0 (min: {})", min);
    ensure!(max >= min, "Multiplier range max {} is below min {}", max, min);
    ensure!(step > 0.0, "Multiplier step must be positive (step: {})", step);

    let count = ((max - min) / step + 1e-9).floor() as usize + 1;
    ensure!(
        count <= MAX_GRID_STEPS,
        "Multiplier range yields {} steps (limit {})",
        count,
        MAX_GRID_STEPS
    );
    Ok((0..count)
        .map(|i| ((min + step * i as f64) * 10_000.0).round() / 10_000.0)
        .collect())
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepVariation {
    pub id: usize,
    pub stop_multiplier: f64,
    pub target_multiplier: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepResult {
    #[serde(flatten)]
    pub variation: SweepVariation,
    pub status: RunStatus,
    pub performance: PerformanceSummary,
}

/// Best total return first; drawdown breaks ties, then grid order.
fn rank(a: &SweepResult, b: &SweepResult) -> Ordering {
    b.performance
        .total_return
        .partial_cmp(&a.performance.total_return)
        .unwrap_or(Ordering::Equal)
        .then_with(|| {
            a.performance
                .max_drawdown
                .partial_cmp(&b.performance.max_drawdown)
                .unwrap_or(Ordering::Equal)
        })
        .then_with(|| a.variation.id.cmp(&b.variation.id))
}

/// Backtests every grid variation on a thread pool and returns them ranked.
pub fn run_sweep(
    bars: Arc<Vec<PriceBar>>,
    base: &RiskConfig,
    grid: &SweepGrid,
    show_progress: bool,
) -> Result<Vec<SweepResult>> {
    let variations = grid.variations();
    if variations.is_empty() {
        return Ok(Vec::new());
    }
    base.validate()?;

    let variation_count = variations.len();
    let num_workers = std::cmp::min(variation_count, std::cmp::max(1, num_cpus::get()));
    info!(
        "Running {} backtests over {} bars using {} worker threads",
        variation_count,
        bars.len(),
        num_workers
    );

    let (tx, rx): (Sender<SweepVariation>, Receiver<SweepVariation>) = bounded(variation_count);
    let (result_tx, result_rx): (Sender<SweepResult>, Receiver<SweepResult>) =
        bounded(variation_count);

    let mut handles = Vec::new();
    for _ in 0..num_workers {
        let rx = rx.clone();
        let result_tx = result_tx.clone();
        let bars = Arc::clone(&bars);
        let base = base.clone();

        let handle = thread::spawn(move || {
            while let Ok(variation) = rx.recv() {
                let config = RiskConfig {
                    stop_multiplier: variation.stop_multiplier,
                    target_multiplier: variation.target_multiplier,
                    ..base.clone()
                };
                let report = Engine::new(config).backtest(bars.as_slice());
                let result = SweepResult {
                    variation,
                    status: report.status,
                    performance: report.performance,
                };
                if result_tx.send(result).is_err() {
                    break;
                }
            }
        });
        handles.push(handle);
    }
    drop(result_tx);

    for variation in variations {
        tx.send(variation)?;
    }
    drop(tx);

    let started = Instant::now();
    let pb = if show_progress {
        ProgressBar::new(variation_count as u64)
    } else {
        ProgressBar::hidden()
    };
    pb.set_style(
        ProgressStyle::default_bar()
            .template(
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})",
            )
            .map_err(|err| anyhow!("Invalid progress template: {}", err))?
            .progress_chars("#>-"),
    );

    let mut results = Vec::with_capacity(variation_count);
    for result in result_rx.iter() {
        results.push(result);
        pb.set_position(results.len() as u64);
    }

    if results.len() < variation_count {
        warn!(
            "Sweep finished with {} of {} results",
            results.len(),
            variation_count
        );
        pb.finish_with_message("Sweep completed with missing results");
    } else {
        pb.finish_with_message("Sweep completed");
    }

    for handle in handles {
        handle
            .join()
            .map_err(|_| anyhow!("Sweep worker thread panicked"))?;
    }

    results.sort_by(rank);
    info!(
        "Sweep of {} variations finished in {:.1}s",
        results.len(),
        started.elapsed().as_secs_f64()
    );
    Ok(results)
}
