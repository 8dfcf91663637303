//! The user's duck/pause preference and where it is kept.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::warn;

/// Storage key of the preference, shared with the bridge's storage backend.
pub const MODE_STORAGE_KEY: &str = "duckMode";

/// What happens to the player while a video is playing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Lower the player's volume.
    #[default]
    Duck,
    /// Pause the player outright.
    Pause,
}

impl Mode {
    /// Unknown or missing stored values fall back to `Duck`.
    pub fn from_stored(value: Option<&str>) -> Self {
        value.and_then(Self::parse).unwrap_or_default()
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "duck" => Some(Mode::Duck),
            "pause" => Some(Mode::Pause),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Duck => "duck",
            Mode::Pause => "pause",
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persistence for the mode preference.
pub trait ModeStore: Send + Sync {
    fn load(&self) -> Mode;
    fn save(&self, mode: Mode) -> anyhow::Result<()>;
}

/// JSON file holding `{"duckMode": "..."}`.
pub struct FileModeStore {
    path: PathBuf,
}

impl FileModeStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl ModeStore for FileModeStore {
    fn load(&self) -> Mode {
        if let Ok(content) = std::fs::read_to_string(&self.path) {
            match serde_json::from_str::<Value>(&content) {
                Ok(stored) => {
                    return Mode::from_stored(stored.get(MODE_STORAGE_KEY).and_then(Value::as_str))
                }
                Err(e) => warn!("Ignoring unreadable mode file {}: {}", self.path.display(), e),
            }
        }
        Mode::default()
    }

    fn save(&self, mode: Mode) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut stored = Map::new();
        stored.insert(MODE_STORAGE_KEY.to_string(), Value::from(mode.as_str()));
        std::fs::write(&self.path, serde_json::to_string_pretty(&stored)?)?;
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryModeStore {
    mode: Mutex<Mode>,
}

impl MemoryModeStore {
    pub fn new(mode: Mode) -> Self {
        Self {
            mode: Mutex::new(mode),
        }
    }
}

impl ModeStore for MemoryModeStore {
    fn load(&self) -> Mode {
        self.mode.lock().map(|m| *m).unwrap_or_default()
    }

    fn save(&self, mode: Mode) -> anyhow::Result<()> {
        let mut guard = self
            .mode
            .lock()
            .map_err(|_| anyhow::anyhow!("mode store lock poisoned"))?;
        *guard = mode;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stored_values() {
        assert_eq!(Mode::from_stored(Some("pause")), Mode::Pause);
        assert_eq!(Mode::from_stored(Some("duck")), Mode::Duck);
        assert_eq!(Mode::from_stored(Some("PAUSE")), Mode::Duck);
        assert_eq!(Mode::from_stored(None), Mode::Duck);
    }

    #[test]
    fn test_file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sub").join("mode.json");
        let store = FileModeStore::new(path.clone());

        assert_eq!(store.load(), Mode::Duck);
        store.save(Mode::Pause).unwrap();
        assert_eq!(store.load(), Mode::Pause);

        let raw = std::fs::read_to_string(&path).unwrap();
        let stored: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(stored[MODE_STORAGE_KEY], "pause");
    }

    #[test]
    fn test_file_store_ignores_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mode.json");
        std::fs::write(&path, "{\"duckMode\": 42}").unwrap();
        assert_eq!(FileModeStore::new(path.clone()).load(), Mode::Duck);
        std::fs::write(&path, "{\"duckMode\": \"mute\"}").unwrap();
        assert_eq!(FileModeStore::new(path.clone()).load(), Mode::Duck);
        std::fs::write(&path, "not json").unwrap();
        assert_eq!(FileModeStore::new(path).load(), Mode::Duck);
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryModeStore::new(Mode::Pause);
        assert_eq!(store.load(), Mode::Pause);
        store.save(Mode::Duck).unwrap();
        assert_eq!(store.load(), Mode::Duck);
    }
}
