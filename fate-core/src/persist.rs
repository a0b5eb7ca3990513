//! Save/load of game state and settings.
//!
//! Records live in a [`SaveStore`], an async key-value medium. The
//! [`Persistence`] gateway wraps a store with versioning and structural
//! validation: a save that fails either check is discarded on load.

use crate::settings::Settings;
use crate::validate::check_game_state;
use crate::world::GameState;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;
use tokio::fs;
use tracing::{debug, warn};

/// Errors from persistence operations.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Save store is unavailable")]
    Unavailable,

    #[error("Record {key:?} is not valid UTF-8")]
    Encoding { key: String },
}

/// Current save format version.
pub const SAVE_VERSION: u32 = 2;

/// Key the game state is stored under.
pub const GAME_STATE_KEY: &str = "fate-game-state";

/// Key the settings are stored under.
pub const SETTINGS_KEY: &str = "fate-settings";

// ============================================================================
// Stores
// ============================================================================

/// An abstract key-value medium for serialized records.
#[async_trait]
pub trait SaveStore: Send + Sync {
    async fn save(&self, key: &str, value: String) -> Result<(), PersistError>;
    async fn load(&self, key: &str) -> Result<Option<String>, PersistError>;
    async fn exists(&self, key: &str) -> Result<bool, PersistError>;
    async fn clear(&self, key: &str) -> Result<(), PersistError>;
}

/// In-memory store, mostly for tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SaveStore for MemoryStore {
    async fn save(&self, key: &str, value: String) -> Result<(), PersistError> {
        let mut records = self.records.lock().map_err(|_| PersistError::Unavailable)?;
        records.insert(key.to_string(), value);
        Ok(())
    }

    async fn load(&self, key: &str) -> Result<Option<String>, PersistError> {
        let records = self.records.lock().map_err(|_| PersistError::Unavailable)?;
        Ok(records.get(key).cloned())
    }

    async fn exists(&self, key: &str) -> Result<bool, PersistError> {
        let records = self.records.lock().map_err(|_| PersistError::Unavailable)?;
        Ok(records.contains_key(key))
    }

    async fn clear(&self, key: &str) -> Result<(), PersistError> {
        let mut records = self.records.lock().map_err(|_| PersistError::Unavailable)?;
        records.remove(key);
        Ok(())
    }
}

/// One JSON file per key inside a directory.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    /// File backing `key`. Anything but alphanumerics, `-` and `_` becomes `_`.
    pub fn path_for(&self, key: &str) -> PathBuf {
        let sanitized = key
            .chars()
            .map(|c| {
                if c.is_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect::<String>();
        self.dir.join(format!("{sanitized}.json"))
    }
}

#[async_trait]
impl SaveStore for JsonFileStore {
    async fn save(&self, key: &str, value: String) -> Result<(), PersistError> {
        fs::create_dir_all(&self.dir).await?;
        fs::write(self.path_for(key), value).await?;
        Ok(())
    }

    async fn load(&self, key: &str) -> Result<Option<String>, PersistError> {
        match fs::read(self.path_for(key)).await {
            Ok(bytes) => String::from_utf8(bytes)
                .map(Some)
                .map_err(|_| PersistError::Encoding {
                    key: key.to_string(),
                }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool, PersistError> {
        Ok(fs::try_exists(self.path_for(key)).await?)
    }

    async fn clear(&self, key: &str) -> Result<(), PersistError> {
        match fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

// ============================================================================
// Saved Game
// ============================================================================

/// A versioned game-state record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedGame {
    pub version: u32,
    /// Seconds since the Unix epoch.
    pub saved_at: u64,
    pub state: GameState,
}

impl SavedGame {
    pub fn new(state: GameState) -> Self {
        Self {
            version: SAVE_VERSION,
            saved_at: unix_now(),
            state,
        }
    }
}

fn unix_now() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};

    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Only the version, so an old record can be recognized before its state
/// fails to deserialize.
#[derive(Deserialize)]
struct VersionProbe {
    version: u32,
}

// ============================================================================
// Persistence Gateway
// ============================================================================

/// Versioned, validated save/load over a [`SaveStore`].
pub struct Persistence {
    store: Box<dyn SaveStore>,
}

impl Persistence {
    pub fn new(store: impl SaveStore + 'static) -> Self {
        Self {
            store: Box::new(store),
        }
    }

    /// Backed by a fresh [`MemoryStore`].
    pub fn in_memory() -> Self {
        Self::new(MemoryStore::new())
    }

    pub async fn save(&self, state: &GameState) -> Result<(), PersistError> {
        let record = serde_json::to_string(&SavedGame::new(state.clone()))?;
        self.store.save(GAME_STATE_KEY, record).await?;
        debug!(entries = state.story_log.len(), "Game saved");
        Ok(())
    }

    /// Load the saved game.
    ///
    /// A record from another version, one that does not parse, or one that
    /// breaks a state invariant is cleared and reported as absent.
    pub async fn load(&self) -> Result<Option<GameState>, PersistError> {
        let Some(text) = self.load_record(GAME_STATE_KEY).await? else {
            return Ok(None);
        };

        match decode_saved_game(&text) {
            Ok(saved) => Ok(Some(saved.state)),
            Err(reason) => {
                warn!(%reason, "Discarding saved game");
                self.store.clear(GAME_STATE_KEY).await?;
                Ok(None)
            }
        }
    }

    pub async fn exists(&self) -> Result<bool, PersistError> {
        self.store.exists(GAME_STATE_KEY).await
    }

    pub async fn clear(&self) -> Result<(), PersistError> {
        self.store.clear(GAME_STATE_KEY).await
    }

    pub async fn save_settings(&self, settings: &Settings) -> Result<(), PersistError> {
        let record = serde_json::to_string(settings)?;
        self.store.save(SETTINGS_KEY, record).await
    }

    /// Saved settings, falling back to defaults field by field.
    pub async fn load_settings(&self) -> Result<Settings, PersistError> {
        Ok(self
            .load_record(SETTINGS_KEY)
            .await?
            .map(|text| Settings::from_json(&text))
            .unwrap_or_default())
    }

    /// Raw record text. An unreadable encoding counts as no record, and the
    /// record is cleared.
    async fn load_record(&self, key: &str) -> Result<Option<String>, PersistError> {
        match self.store.load(key).await {
            Err(PersistError::Encoding { .. }) => {
                warn!(key, "Discarding record with invalid encoding");
                self.store.clear(key).await?;
                Ok(None)
            }
            other => other,
        }
    }
}

fn decode_saved_game(text: &str) -> Result<SavedGame, String> {
    let probe: VersionProbe = serde_json::from_str(text).map_err(|e| e.to_string())?;
    if probe.version != SAVE_VERSION {
        return Err(format!(
            "version mismatch: expected {SAVE_VERSION}, found {}",
            probe.version
        ));
    }
    let saved: SavedGame = serde_json::from_str(text).map_err(|e| e.to_string())?;
    check_game_state(&saved.state).map_err(|e| e.to_string())?;
    Ok(saved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::{Difficulty, ImageFrequency};
    use crate::world::{create_sample_character, create_sample_scene, LogEntry};
    use tempfile::TempDir;

    fn sample_state() -> GameState {
        let mut state = GameState::new(create_sample_character("Aldric"), create_sample_scene());
        state.log(LogEntry::narration("The fog thickens."));
        state
    }

    #[tokio::test]
    async fn test_memory_round_trip() {
        let persistence = Persistence::in_memory();
        assert!(!persistence.exists().await.unwrap());

        let state = sample_state();
        persistence.save(&state).await.unwrap();
        assert!(persistence.exists().await.unwrap());
        assert_eq!(persistence.load().await.unwrap(), Some(state));
    }

    #[tokio::test]
    async fn test_version_mismatch_clears_record() {
        let store = MemoryStore::new();
        let mut saved = serde_json::to_value(SavedGame::new(sample_state())).unwrap();
        saved["version"] = 1.into();
        store
            .save(GAME_STATE_KEY, saved.to_string())
            .await
            .unwrap();

        let persistence = Persistence::new(store);
        assert_eq!(persistence.load().await.unwrap(), None);
        assert!(!persistence.exists().await.unwrap());
    }

    #[tokio::test]
    async fn test_broken_invariant_clears_record() {
        let mut state = sample_state();
        state.character.physical_stress.marked.push(true);
        let store = MemoryStore::new();
        store
            .save(GAME_STATE_KEY, serde_json::to_string(&SavedGame::new(state)).unwrap())
            .await
            .unwrap();

        let persistence = Persistence::new(store);
        assert_eq!(persistence.load().await.unwrap(), None);
        assert!(!persistence.exists().await.unwrap());
    }

    #[tokio::test]
    async fn test_garbage_clears_record() {
        let store = MemoryStore::new();
        store
            .save(GAME_STATE_KEY, "{\"character\": 12".to_string())
            .await
            .unwrap();
        let persistence = Persistence::new(store);
        assert_eq!(persistence.load().await.unwrap(), None);
        assert!(!persistence.exists().await.unwrap());
    }

    #[tokio::test]
    async fn test_invalid_utf8_clears_record() {
        let temp_dir = TempDir::new().unwrap();
        let store = JsonFileStore::new(temp_dir.path());
        std::fs::write(store.path_for(GAME_STATE_KEY), [0xff, 0xfe, 0x7b]).unwrap();
        std::fs::write(store.path_for(SETTINGS_KEY), [0xc3, 0x28]).unwrap();
        assert!(matches!(
            store.load(GAME_STATE_KEY).await,
            Err(PersistError::Encoding { .. })
        ));

        let persistence = Persistence::new(store.clone());
        assert_eq!(persistence.load().await.unwrap(), None);
        assert!(!persistence.exists().await.unwrap());

        assert_eq!(persistence.load_settings().await.unwrap(), Settings::default());
        assert!(!store.exists(SETTINGS_KEY).await.unwrap());
    }

    #[tokio::test]
    async fn test_settings_tolerant_load() {
        let store = MemoryStore::new();
        store
            .save(
                SETTINGS_KEY,
                r#"{"difficulty": "hard", "language": "klingon", "enableImageGeneration": false}"#
                    .to_string(),
            )
            .await
            .unwrap();

        let settings = Persistence::new(store).load_settings().await.unwrap();
        assert_eq!(settings.difficulty, Difficulty::Hard);
        assert_eq!(settings.language, Default::default());
        assert_eq!(settings.image_frequency, ImageFrequency::None);
    }

    #[tokio::test]
    async fn test_missing_settings_default() {
        let settings = Persistence::in_memory().load_settings().await.unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[tokio::test]
    async fn test_json_file_store() {
        let temp_dir = TempDir::new().unwrap();
        let store = JsonFileStore::new(temp_dir.path().join("saves"));
        assert!(store
            .path_for("a/b c")
            .ends_with("a_b_c.json"));

        let persistence = Persistence::new(store.clone());
        let state = sample_state();
        persistence.save(&state).await.unwrap();
        assert!(store.path_for(GAME_STATE_KEY).exists());
        assert_eq!(persistence.load().await.unwrap(), Some(state));

        persistence.clear().await.unwrap();
        assert!(!persistence.exists().await.unwrap());
        // Clearing twice is fine.
        persistence.clear().await.unwrap();
    }
}
