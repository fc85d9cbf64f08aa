use crate::config::MonitorConfig;
use crate::engine::LiveState;
use crate::error::CollaboratorError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Everything needed to resume a monitoring session after a restart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedLiveState {
    pub session_id: Uuid,
    pub config: MonitorConfig,
    pub state: LiveState,
    pub saved_at: DateTime<Utc>,
}

pub trait StateStore: Send + Sync + 'static {
    fn load(
        &self,
    ) -> impl Future<Output = Result<Option<PersistedLiveState>, CollaboratorError>> + Send;

    fn save(
        &self,
        snapshot: &PersistedLiveState,
    ) -> impl Future<Output = Result<(), CollaboratorError>> + Send;

    fn clear(&self) -> impl Future<Output = Result<(), CollaboratorError>> + Send;
}

/// Single JSON document on disk, replaced atomically on every save.
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|name| name.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

fn persistence_error(
    action: &str,
    path: &std::path::Path,
    err: impl std::fmt::Display,
) -> CollaboratorError {
    CollaboratorError::Persistence(format!("{} {}: {}", action, path.display(), err))
}

impl StateStore for JsonFileStore {
    async fn load(&self) -> Result<Option<PersistedLiveState>, CollaboratorError> {
        let raw = match tokio::fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(persistence_error("read", &self.path, err)),
        };
        serde_json::from_slice(&raw)
            .map(Some)
            .map_err(|err| persistence_error("decode", &self.path, err))
    }

    async fn save(&self, snapshot: &PersistedLiveState) -> Result<(), CollaboratorError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|err| persistence_error("create directory for", &self.path, err))?;
            }
        }
        let encoded = serde_json::to_vec_pretty(snapshot)
            .map_err(|err| persistence_error("encode", &self.path, err))?;
        let temp = self.temp_path();
        tokio::fs::write(&temp, encoded)
            .await
            .map_err(|err| persistence_error("write", &temp, err))?;
        tokio::fs::rename(&temp, &self.path)
            .await
            .map_err(|err| persistence_error("replace", &self.path, err))
    }

    async fn clear(&self) -> Result<(), CollaboratorError> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(persistence_error("remove", &self.path, err)),
        }
    }
}

/// In-process store; clones share the same slot.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    slot: Arc<Mutex<Option<PersistedLiveState>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Option<PersistedLiveState> {
        self.slot.lock().ok().and_then(|slot| slot.clone())
    }

    fn with_slot<T>(
        &self,
        f: impl FnOnce(&mut Option<PersistedLiveState>) -> T,
    ) -> Result<T, CollaboratorError> {
        let mut guard = self
            .slot
            .lock()
            .map_err(|_| CollaboratorError::Persistence("memory store lock poisoned".to_string()))?;
        Ok(f(&mut guard))
    }
}

impl StateStore for MemoryStore {
    async fn load(&self) -> Result<Option<PersistedLiveState>, CollaboratorError> {
        self.with_slot(|slot| slot.clone())
    }

    async fn save(&self, snapshot: &PersistedLiveState) -> Result<(), CollaboratorError> {
        self.with_slot(|slot| *slot = Some(snapshot.clone()))
    }

    async fn clear(&self) -> Result<(), CollaboratorError> {
        self.with_slot(|slot| *slot = None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RiskConfig;
    use crate::models::{Direction, Position};
    use chrono::TimeZone;

    fn snapshot() -> PersistedLiveState {
        let ts = Utc.with_ymd_and_hms(2024, 4, 2, 9, 0, 0).unwrap();
        let mut state = LiveState::new(5_000.0);
        state.position =
            Some(Position::open(Direction::Long, ts, 1.25, 1.24, 1.265, 2_500.0).unwrap());
        state.trades_today.increment(ts.date_naive());
        state.last_entry_bar = Some(ts);
        PersistedLiveState {
            session_id: Uuid::new_v4(),
            config: MonitorConfig {
                symbol: "GBPUSD=X".to_string(),
                timeframe: "1h".to_string(),
                strategy: "breakout".to_string(),
                risk: RiskConfig::default(),
            },
            state,
            saved_at: ts,
        }
    }

    #[tokio::test]
    async fn file_store_persists_and_clears() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("state").join("monitor.json"));
        assert_eq!(store.load().await.unwrap(), None);

        let saved = snapshot();
        store.save(&saved).await.unwrap();
        assert_eq!(store.load().await.unwrap(), Some(saved));

        store.clear().await.unwrap();
        assert_eq!(store.load().await.unwrap(), None);
        store.clear().await.unwrap();
    }

    #[tokio::test]
    async fn corrupt_file_is_a_persistence_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("monitor.json");
        std::fs::write(&path, b"{not json").unwrap();
        let store = JsonFileStore::new(path);
        assert!(matches!(
            store.load().await,
            Err(CollaboratorError::Persistence(_))
        ));
    }

    #[tokio::test]
    async fn memory_store_clones_share_state() {
        let store = MemoryStore::new();
        let observer = store.clone();
        store.save(&snapshot()).await.unwrap();
        assert!(observer.snapshot().is_some());
        observer.clear().await.unwrap();
        assert!(store.load().await.unwrap().is_none());
    }
}
