use anyhow::{anyhow, ensure, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Price units per pip for slippage quoted in pips.
pub const PIP_SIZE: f64 = 0.0001;

pub const DEFAULT_INITIAL_CAPITAL: f64 = 10_000.0;
pub const DEFAULT_RISK_PERCENT: f64 = 1.0;
pub const DEFAULT_MAX_TRADES_PER_DAY: u32 = 3;
pub const DEFAULT_STOP_MULTIPLIER: f64 = 1.0;
pub const DEFAULT_TARGET_MULTIPLIER: f64 = 1.5;
pub const DEFAULT_SLIPPAGE_PIPS: f64 = 1.5;
pub const DEFAULT_COMMISSION: f64 = 4.0;
pub const DEFAULT_WARMUP_BARS: usize = 50;
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 60;

/// Risk and execution parameters for one simulation run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskConfig {
    pub initial_capital: f64,
    pub risk_percent: f64,
    pub max_trades_per_day: u32,
    pub stop_multiplier: f64,
    pub target_multiplier: f64,
    /// Fixed price offset applied against every fill.
    pub slippage: f64,
    /// Flat fee charged once per closed trade.
    pub commission: f64,
    pub warmup_bars: usize,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            initial_capital: DEFAULT_INITIAL_CAPITAL,
            risk_percent: DEFAULT_RISK_PERCENT,
            max_trades_per_day: DEFAULT_MAX_TRADES_PER_DAY,
            stop_multiplier: DEFAULT_STOP_MULTIPLIER,
            target_multiplier: DEFAULT_TARGET_MULTIPLIER,
            slippage: DEFAULT_SLIPPAGE_PIPS * PIP_SIZE,
            commission: DEFAULT_COMMISSION,
            warmup_bars: DEFAULT_WARMUP_BARS,
        }
    }
}

impl RiskConfig {
    /// Builds a config from string settings; absent keys keep their defaults.
    pub fn from_settings_map(settings: &HashMap<String, String>) -> Result<Self> {
        let defaults = Self::default();

        let slippage = match optional_setting_f64(settings, "SLIPPAGE", Some(0.0), None)? {
            Some(value) => value,
            None => optional_setting_f64(settings, "SLIPPAGE_PIPS", Some(0.0), None)?
                .map(slippage_from_pips)
                .unwrap_or(defaults.slippage),
        };

        let config = Self {
            initial_capital: optional_setting_f64(settings, "INITIAL_CAPITAL", Some(0.0), None)?
                .unwrap_or(defaults.initial_capital),
            risk_percent: optional_setting_f64(settings, "RISK_PERCENT", Some(0.0), Some(100.0))?
                .unwrap_or(defaults.risk_percent),
            max_trades_per_day: optional_setting_usize(settings, "MAX_TRADES_PER_DAY", 1)?
                .map(|value| value as u32)
                .unwrap_or(defaults.max_trades_per_day),
            stop_multiplier: optional_setting_f64(settings, "STOP_MULTIPLIER", Some(0.0), None)?
                .unwrap_or(defaults.stop_multiplier),
            target_multiplier: optional_setting_f64(settings, "TARGET_MULTIPLIER", Some(0.0), None)?
                .unwrap_or(defaults.target_multiplier),
            slippage,
            commission: optional_setting_f64(settings, "COMMISSION", Some(0.0), None)?
                .unwrap_or(defaults.commission),
            warmup_bars: optional_setting_usize(settings, "WARMUP_BARS", 0)?
                .unwrap_or(defaults.warmup_bars),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.initial_capital.is_finite() && self.initial_capital > 0.0,
            "Initial capital must be a positive number (value: {})",
            self.initial_capital
        );
        ensure!(
            self.risk_percent.is_finite() && self.risk_percent > 0.0 && self.risk_percent <= 100.0,
            "Risk percent must be in (0, 100] (value: {})",
            self.risk_percent
        );
        ensure!(
            self.max_trades_per_day >= 1,
            "Max trades per day must be at least 1"
        );
        ensure!(
            self.stop_multiplier.is_finite() && self.stop_multiplier > 0.0,
            "Stop multiplier must be positive (value: {})",
            self.stop_multiplier
        );
        ensure!(
            self.target_multiplier.is_finite() && self.target_multiplier > 0.0,
            "Target multiplier must be positive (value: {})",
            self.target_multiplier
        );
        ensure!(
            self.slippage.is_finite() && self.slippage >= 0.0,
            "Slippage must be >= 0 (value: {})",
            self.slippage
        );
        ensure!(
            self.commission.is_finite() && self.commission >= 0.0,
            "Commission must be >= 0 (value: {})",
            self.commission
        );
        Ok(())
    }
}

pub fn slippage_from_pips(pips: f64) -> f64 {
    pips * PIP_SIZE
}

/// What the live monitor watches and how often
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorConfig {
    pub symbol: String,
    pub timeframe: String,
    pub strategy: String,
    pub risk: RiskConfig,
}

impl MonitorConfig {
    pub fn strategy_label(&self) -> String {
        self.strategy
            .split('_')
            .filter(|part| !part.is_empty())
            .map(|part| {
                let mut chars = part.chars();
                match chars.next() {
                    Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                    None => String::new(),
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Process-level settings for the monitor command
#[derive(Debug, Clone)]
pub struct MonitorRuntimeSettings {
    pub poll_interval: Duration,
    pub webhook_url: Option<String>,
    pub state_file: Option<PathBuf>,
}

impl MonitorRuntimeSettings {
    pub fn from_settings_map(settings: &HashMap<String, String>) -> Result<Self> {
        let poll_interval_secs = optional_setting_usize(settings, "POLL_INTERVAL_SECS", 1)?
            .map(|value| value as u64)
            .unwrap_or(DEFAULT_POLL_INTERVAL_SECS);
        Ok(Self {
            poll_interval: Duration::from_secs(poll_interval_secs),
            webhook_url: optional_setting(settings, "DISCORD_WEBHOOK_URL").map(str::to_string),
            state_file: optional_setting(settings, "MONITOR_STATE_FILE").map(PathBuf::from),
        })
    }
}

fn optional_setting<'a>(settings: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    settings
        .get(key)
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
}

fn optional_setting_f64(
    settings: &HashMap<String, String>,
    key: &str,
    min: Option<f64>,
    max: Option<f64>,
) -> Result<Option<f64>> {
    let Some(raw) = optional_setting(settings, key) else {
        return Ok(None);
    };
    let value = raw
        .parse::<f64>()
        .map_err(|_| anyhow!("Setting {} must be a number (value: {})", key, raw))?;
    if !value.is_finite() {
        return Err(anyhow!("Setting {} must be finite (value: {})", key, raw));
    }
    if let Some(min_value) = min {
        if value < min_value {
            return Err(anyhow!(
                "Setting {} must be >= {} (value: {})",
                key,
                min_value,
                raw
            ));
        }
    }
    if let Some(max_value) = max {
        if value > max_value {
            return Err(anyhow!(
                "Setting {} must be <= {} (value: {})",
                key,
                max_value,
                raw
            ));
        }
    }
    Ok(Some(value))
}

fn optional_setting_usize(
    settings: &HashMap<String, String>,
    key: &str,
    min: usize,
) -> Result<Option<usize>> {
    let Some(raw) = optional_setting(settings, key) else {
        return Ok(None);
    };
    let value = raw
        .parse::<f64>()
        .map_err(|_| anyhow!("Setting {} must be a number (value: {})", key, raw))?;
    if !value.is_finite() {
        return Err(anyhow!("Setting {} must be finite (value: {})", key, raw));
    }
    if value.fract() != 0.0 {
        return Err(anyhow!(
            "Setting {} must be an integer (value: {})",
            key,
            raw
        ));
    }
    if value < min as f64 {
        return Err(anyhow!(
            "Setting {} must be >= {} (value: {})",
            key,
            min,
            raw
        ));
    }
    Ok(Some(value as usize))
}
