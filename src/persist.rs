//! Persisted local state
//!
//! Engine settings and the single position record survive restarts. The file
//! is read at startup and rewritten after every state-affecting mutation.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::config::{Config, ProfitTargetConfig};
use crate::error::{Error, Result};
use crate::position::Position;
use crate::strategy::SelectionMode;

/// Runtime settings that override the file configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    pub enabled: bool,
    pub selection_mode: SelectionMode,
    /// Decision tick period
    pub poll_ms: u64,
    pub buy_fraction: f64,
    /// Trigger threshold: minimum score slope per minute
    pub min_score_slope: f64,
    pub profit_target: ProfitTargetConfig,
}

impl Settings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            enabled: config.engine.enabled,
            selection_mode: config.selection.mode,
            poll_ms: config.engine.tick_ms,
            buy_fraction: config.trading.buy_fraction,
            min_score_slope: config.trigger.min_score_slope,
            profit_target: config.profit_target.clone(),
        }
    }
}

/// Everything written to the state file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PersistedState {
    #[serde(default)]
    pub settings: Option<Settings>,
    #[serde(default)]
    pub position: Option<Position>,
}

/// JSON state file with atomic replace on write
pub struct StateStore {
    path: Option<PathBuf>,
    state: Mutex<PersistedState>,
}

impl StateStore {
    /// Open a store at `path`, loading any existing state
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let state = if path.exists() {
            let data = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| Error::Persistence(e.to_string()))?;
            let state: PersistedState =
                serde_json::from_str(&data).map_err(|e| Error::Persistence(e.to_string()))?;
            info!(
                path = %path.display(),
                has_position = state.position.is_some(),
                "Loaded persisted state"
            );
            state
        } else {
            PersistedState::default()
        };

        Ok(Self {
            path: Some(path),
            state: Mutex::new(state),
        })
    }

    /// A store that never touches disk
    pub fn in_memory() -> Self {
        Self {
            path: None,
            state: Mutex::new(PersistedState::default()),
        }
    }

    pub async fn snapshot(&self) -> PersistedState {
        self.state.lock().await.clone()
    }

    pub async fn settings(&self) -> Option<Settings> {
        self.state.lock().await.settings.clone()
    }

    pub async fn position(&self) -> Option<Position> {
        self.state.lock().await.position.clone()
    }

    pub async fn save_settings(&self, settings: Settings) -> Result<()> {
        let mut state = self.state.lock().await;
        state.settings = Some(settings);
        self.write(&state).await
    }

    pub async fn save_position(&self, position: Option<Position>) -> Result<()> {
        let mut state = self.state.lock().await;
        state.position = position;
        self.write(&state).await
    }

    async fn write(&self, state: &PersistedState) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let data =
            serde_json::to_string_pretty(state).map_err(|e| Error::Persistence(e.to_string()))?;

        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, data)
            .await
            .map_err(|e| Error::Persistence(e.to_string()))?;
        tokio::fs::rename(&tmp, path)
            .await
            .map_err(|e| Error::Persistence(e.to_string()))?;

        debug!(path = %path.display(), "Saved state");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::EntryMode;
    use chrono::Utc;

    #[tokio::test]
    async fn test_state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        let config = Config::default();
        let store = StateStore::open(&path).await.unwrap();
        let mut settings = Settings::from_config(&config);
        settings.buy_fraction = 0.4;
        store.save_settings(settings.clone()).await.unwrap();

        let position = Position::provisional("MintA", 0.5, 1000.0, 6, EntryMode::Momentum, Utc::now());
        store.save_position(Some(position)).await.unwrap();

        let reopened = StateStore::open(&path).await.unwrap();
        assert_eq!(reopened.settings().await, Some(settings));
        let restored = reopened.position().await.unwrap();
        assert_eq!(restored.mint, "MintA");
        assert!(restored.awaiting_size_sync);
    }

    #[tokio::test]
    async fn test_clearing_position() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let store = StateStore::open(&path).await.unwrap();

        let position = Position::provisional("MintA", 0.5, 1000.0, 6, EntryMode::Momentum, Utc::now());
        store.save_position(Some(position)).await.unwrap();
        store.save_position(None).await.unwrap();

        let reopened = StateStore::open(&path).await.unwrap();
        assert!(reopened.position().await.is_none());
    }

    #[tokio::test]
    async fn test_in_memory_store() {
        let store = StateStore::in_memory();
        store
            .save_settings(Settings::from_config(&Config::default()))
            .await
            .unwrap();
        assert!(store.settings().await.is_some());
    }
}
