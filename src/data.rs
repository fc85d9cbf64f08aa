use crate::config::MonitorConfig;
use crate::error::CollaboratorError;
use crate::models::PriceBar;
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::future::Future;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

const BAR_SNAPSHOT_VERSION: u32 = 1;
const SNAPSHOT_EXTENSION: &str = "bin";

#[derive(Serialize, Deserialize)]
struct BarSnapshot {
    version: u32,
    generated_at: DateTime<Utc>,
    symbol: Option<String>,
    bars: Vec<PriceBar>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum BarFile {
    Series {
        #[serde(default)]
        symbol: Option<String>,
        bars: Vec<PriceBar>,
    },
    Bars(Vec<PriceBar>),
}

/// A validated, timestamp-ordered series of labelled bars.
#[derive(Debug, Clone, PartialEq)]
pub struct BarSeries {
    symbol: Option<String>,
    bars: Vec<PriceBar>,
}

impl BarSeries {
    pub fn new(symbol: Option<String>, bars: Vec<PriceBar>) -> Result<Self> {
        validate_bars(&bars)?;
        Ok(Self { symbol, bars })
    }

    /// Reads a bincode snapshot (`.bin`) or a JSON file holding either a bar
    /// array or `{ "symbol": ..., "bars": [...] }`.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if is_snapshot_path(path) {
            let file = File::open(path)
                .with_context(|| format!("Failed to open bar snapshot at {}", path.display()))?;
            let reader = BufReader::new(file);
            let snapshot: BarSnapshot =
                bincode::deserialize_from(reader).context("Snapshot decode failed")?;
            return Self::from_snapshot(snapshot);
        }

        let raw = fs::read(path)
            .with_context(|| format!("Failed to read bar file at {}", path.display()))?;
        Self::from_json_slice(&raw)
            .with_context(|| format!("Invalid bar file at {}", path.display()))
    }

    pub fn from_json_slice(raw: &[u8]) -> Result<Self> {
        let parsed: BarFile = serde_json::from_slice(raw).context("Bar JSON decode failed")?;
        match parsed {
            BarFile::Series { symbol, bars } => Self::new(symbol, bars),
            BarFile::Bars(bars) => Self::new(None, bars),
        }
    }

    fn from_snapshot(snapshot: BarSnapshot) -> Result<Self> {
        if snapshot.version != BAR_SNAPSHOT_VERSION {
            return Err(anyhow!(
                "Bar snapshot version mismatch (found {}, expected {})",
                snapshot.version,
                BAR_SNAPSHOT_VERSION
            ));
        }
        Self::new(snapshot.symbol, snapshot.bars)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create snapshot directory {}", parent.display())
                })?;
            }
        }

        let file = File::create(path)
            .with_context(|| format!("Unable to create bar snapshot at {}", path.display()))?;
        let mut writer = BufWriter::new(file);
        let snapshot = BarSnapshot {
            version: BAR_SNAPSHOT_VERSION,
            generated_at: Utc::now(),
            symbol: self.symbol.clone(),
            bars: self.bars.clone(),
        };
        bincode::serialize_into(&mut writer, &snapshot)
            .context("Failed to serialize bar snapshot")?;
        writer
            .flush()
            .context("Failed to flush bar snapshot to disk")?;
        Ok(())
    }

    pub fn symbol(&self) -> Option<&str> {
        self.symbol.as_deref()
    }

    pub fn bars(&self) -> &[PriceBar] {
        &self.bars
    }

    pub fn into_bars(self) -> Vec<PriceBar> {
        self.bars
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }
}

fn is_snapshot_path(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case(SNAPSHOT_EXTENSION))
        .unwrap_or(false)
}

/// Timestamps strictly increasing, prices finite, `high >= low`.
pub fn validate_bars(bars: &[PriceBar]) -> Result<()> {
    for (index, bar) in bars.iter().enumerate() {
        if ![bar.open, bar.high, bar.low, bar.close]
            .iter()
            .all(|value| value.is_finite())
        {
            return Err(anyhow!(
                "Bar {} at {} has non-finite prices",
                index,
                bar.timestamp
            ));
        }
        if bar.high < bar.low {
            return Err(anyhow!(
                "Bar {} at {} has high {} below low {}",
                index,
                bar.timestamp,
                bar.high,
                bar.low
            ));
        }
        if index > 0 && bars[index - 1].timestamp >= bar.timestamp {
            return Err(anyhow!(
                "Bar timestamps must be strictly increasing ({} follows {})",
                bar.timestamp,
                bars[index - 1].timestamp
            ));
        }
    }
    Ok(())
}

/// Source of fresh labelled bars for the live monitor.
pub trait BarSource: Send + Sync + 'static {
    fn fetch_bars(
        &self,
        config: &MonitorConfig,
    ) -> impl Future<Output = Result<Vec<PriceBar>, CollaboratorError>> + Send;
}

/// Re-reads a bar file on every fetch; whatever writes the file owns the feed.
pub struct FileBarSource {
    path: PathBuf,
}

impl FileBarSource {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }
}

impl BarSource for FileBarSource {
    async fn fetch_bars(&self, config: &MonitorConfig) -> Result<Vec<PriceBar>, CollaboratorError> {
        let path = self.path.clone();
        let series = tokio::task::spawn_blocking(move || BarSeries::load_from_file(&path))
            .await
            .map_err(|err| CollaboratorError::DataSource(err.to_string()))?
            .map_err(|err| CollaboratorError::DataSource(format!("{:#}", err)))?;

        if let Some(symbol) = series.symbol() {
            if !symbol.eq_ignore_ascii_case(&config.symbol) {
                return Err(CollaboratorError::DataSource(format!(
                    "bar file holds {} but the monitor watches {}",
                    symbol, config.symbol
                )));
            }
        }
        Ok(series.into_bars())
    }
}
