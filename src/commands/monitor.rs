use crate::commands::{resolve_risk_config, RiskOverrides};
use crate::config::{MonitorConfig, MonitorRuntimeSettings};
use crate::context::AppContext;
use crate::data::FileBarSource;
use crate::monitor::{spawn_monitor, spawn_scheduler, TickOutcome};
use crate::notify::MonitorNotifier;
use crate::store::{JsonFileStore, MemoryStore, StateStore};
use anyhow::{Context, Result};
use clap::Args;
use log::{debug, info, warn};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Args, Debug, Clone)]
pub struct MonitorArgs {
    /// Bar file re-read on every tick (JSON or `.bin` snapshot)
    #[arg(long = "data-file", value_name = "PATH")]
    pub data_file: PathBuf,
    /// Instrument being watched
    #[arg(long)]
    pub symbol: String,
    /// Bar interval label, e.g. 1h
    #[arg(long, default_value = "1h")]
    pub timeframe: String,
    /// Name of the strategy that labelled the bars
    #[arg(long, default_value = "trend_following")]
    pub strategy: String,
    /// Overrides POLL_INTERVAL_SECS
    #[arg(long)]
    pub poll_interval_secs: Option<u64>,
    /// Overrides MONITOR_STATE_FILE
    #[arg(long, value_name = "PATH")]
    pub state_file: Option<PathBuf>,
    /// Discard any stored session instead of resuming it
    #[arg(long)]
    pub reset: bool,
}

pub async fn run(app: &AppContext, args: &MonitorArgs, overrides: &RiskOverrides) -> Result<()> {
    let mut runtime = app.monitor_runtime()?;
    if let Some(secs) = args.poll_interval_secs {
        runtime.poll_interval = std::time::Duration::from_secs(secs.max(1));
    }
    if let Some(path) = &args.state_file {
        runtime.state_file = Some(path.clone());
    }

    let config = MonitorConfig {
        symbol: args.symbol.clone(),
        timeframe: args.timeframe.clone(),
        strategy: args.strategy.clone(),
        risk: resolve_risk_config(app, overrides)?,
    };

    match runtime.state_file.clone() {
        Some(path) => {
            info!("Persisting monitor state to {}", path.display());
            run_with_store(args, config, &runtime, JsonFileStore::new(path)).await
        }
        None => {
            warn!("MONITOR_STATE_FILE not set; monitor state will not survive a restart");
            run_with_store(args, config, &runtime, MemoryStore::new()).await
        }
    }
}

async fn run_with_store<P: StateStore>(
    args: &MonitorArgs,
    config: MonitorConfig,
    runtime: &MonitorRuntimeSettings,
    store: P,
) -> Result<()> {
    let notifier = MonitorNotifier::new(runtime.webhook_url.as_deref())?;
    if runtime.webhook_url.is_none() {
        info!("DISCORD_WEBHOOK_URL not set; events are only logged");
    }

    if args.reset {
        store.clear().await?;
        info!("Stored monitor session discarded");
    }

    let source = FileBarSource::new(args.data_file.clone());
    let (handle, worker) = spawn_monitor(source, notifier, store);
    let started = handle.start(config).await?;
    info!(
        "Polling {} every {}s",
        args.data_file.display(),
        runtime.poll_interval.as_secs()
    );

    let scheduler = spawn_scheduler(
        handle.clone(),
        runtime.poll_interval,
        Arc::new(|outcome: &TickOutcome| {
            if let TickOutcome::NoOp(reason) = outcome {
                debug!("Tick finished without an event: {:?}", reason);
            }
        }),
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!(
        "Shutdown requested; session {} stays stored for the next start",
        started.session_id
    );

    scheduler.abort();
    let _ = scheduler.await;
    let status = handle.status().await?;
    info!(
        "Monitor exiting after {} tick(s); capital {:.2}, position {}",
        status.ticks,
        status.capital.unwrap_or_default(),
        status
            .position
            .as_ref()
            .map(|position| format!("{} from {}", position.direction, position.entry_timestamp))
            .unwrap_or_else(|| "flat".to_string())
    );

    drop(handle);
    worker.await.context("Monitor worker failed")?;
    Ok(())
}
