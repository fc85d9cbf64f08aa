use crate::config::{MonitorRuntimeSettings, RiskConfig};
use anyhow::{anyhow, Context, Result};
use log::{debug, info};
use serde_json::Value;
use std::collections::HashMap;
use std::env;
use std::path::Path;

/// Settings recognised from the environment and the optional settings file.
pub const SETTING_KEYS: &[&str] = &[
    "INITIAL_CAPITAL",
    "RISK_PERCENT",
    "MAX_TRADES_PER_DAY",
    "STOP_MULTIPLIER",
    "TARGET_MULTIPLIER",
    "SLIPPAGE",
    "SLIPPAGE_PIPS",
    "COMMISSION",
    "WARMUP_BARS",
    "POLL_INTERVAL_SECS",
    "DISCORD_WEBHOOK_URL",
    "MONITOR_STATE_FILE",
];

#[derive(Clone, Debug, Default)]
pub struct AppContext {
    settings: HashMap<String, String>,
}

impl AppContext {
    /// Loads the settings file (if any), then lets environment variables override it.
    pub fn initialize(settings_file: Option<&Path>) -> Result<Self> {
        let mut settings = match settings_file {
            Some(path) => load_settings_file(path)?,
            None => HashMap::new(),
        };

        for key in SETTING_KEYS {
            if let Ok(value) = env::var(key) {
                debug!("Setting {} taken from the environment", key);
                settings.insert((*key).to_string(), value);
            }
        }

        Ok(Self { settings })
    }

    pub fn from_settings(settings: HashMap<String, String>) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &HashMap<String, String> {
        &self.settings
    }

    pub fn risk_config(&self) -> Result<RiskConfig> {
        RiskConfig::from_settings_map(&self.settings)
    }

    pub fn monitor_runtime(&self) -> Result<MonitorRuntimeSettings> {
        MonitorRuntimeSettings::from_settings_map(&self.settings)
    }
}

fn load_settings_file(path: &Path) -> Result<HashMap<String, String>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read settings file {}", path.display()))?;
    let parsed: HashMap<String, Value> = serde_json::from_str(&raw)
        .with_context(|| format!("Settings file {} must be a JSON object", path.display()))?;

    let mut settings = HashMap::with_capacity(parsed.len());
    for (key, value) in parsed {
        let text = match value {
            Value::String(text) => text,
            Value::Number(number) => number.to_string(),
            Value::Bool(flag) => flag.to_string(),
            Value::Null => continue,
            other => {
                return Err(anyhow!(
                    "Setting {} in {} must be a scalar (value: {})",
                    key,
                    path.display(),
                    other
                ))
            }
        };
        settings.insert(key, text);
    }
    info!(
        "Loaded {} setting(s) from {}",
        settings.len(),
        path.display()
    );
    Ok(settings)
}
