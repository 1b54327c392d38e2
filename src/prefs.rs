use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use directories::BaseDirs;
use thiserror::Error;
use tracing::{debug, warn};

pub const CONFIG_HOME_ENV: &str = "FRAUDSCOPE_CONFIG_HOME";
pub const APP_DIR_NAME: &str = "fraudscope";
pub const PREFS_FILE_NAME: &str = "preferences.toml";

pub const DEFAULT_MODEL_PREF: &str = "default_model";
pub const THEME_PREF: &str = "theme";
pub const FALLBACK_MODEL: &str = "xgb";

#[derive(Debug, Error)]
pub enum PrefsError {
    #[error("No suitable config directory available for preferences")]
    NoConfigDir,
    #[error("Failed to read preferences at {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Preferences file {path} is malformed: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Failed to encode preferences: {0}")]
    Encode(#[from] toml::ser::Error),
    #[error("Failed to write preferences at {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Unknown theme '{0}', expected 'light' or 'dark'")]
    UnknownTheme(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Theme {
    #[default]
    Light,
    Dark,
}

impl Theme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Theme::Light => "light",
            Theme::Dark => "dark",
        }
    }

    pub fn parse(value: &str) -> Result<Self, PrefsError> {
        match value.trim().to_lowercase().as_str() {
            "light" => Ok(Theme::Light),
            "dark" => Ok(Theme::Dark),
            _ => Err(PrefsError::UnknownTheme(value.to_string())),
        }
    }

    pub fn toggled(&self) -> Self {
        match self {
            Theme::Light => Theme::Dark,
            Theme::Dark => Theme::Light,
        }
    }
}

/// Where preference values are kept between runs.
pub trait PreferenceBackend: Send + Sync {
    fn load_all(&self) -> Result<BTreeMap<String, String>, PrefsError>;
    fn store(&self, name: &str, value: &str) -> Result<(), PrefsError>;
}

/// `preferences.toml` in the application config directory.
pub fn default_prefs_path() -> Result<PathBuf, PrefsError> {
    let base = match std::env::var(CONFIG_HOME_ENV) {
        Ok(path) if !path.trim().is_empty() => PathBuf::from(path),
        _ => BaseDirs::new()
            .map(|dirs| dirs.config_dir().join(APP_DIR_NAME))
            .ok_or(PrefsError::NoConfigDir)?,
    };
    Ok(base.join(PREFS_FILE_NAME))
}

/// Flat `name = "value"` TOML table on disk.
pub struct FileBackend {
    path: PathBuf,
}

impl FileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FileBackend { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PreferenceBackend for FileBackend {
    fn load_all(&self) -> Result<BTreeMap<String, String>, PrefsError> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(source) => {
                return Err(PrefsError::Read {
                    path: self.path.clone(),
                    source,
                });
            }
        };
        toml::from_str(&text).map_err(|source| PrefsError::Parse {
            path: self.path.clone(),
            source,
        })
    }

    fn store(&self, name: &str, value: &str) -> Result<(), PrefsError> {
        let mut values = self.load_all()?;
        values.insert(name.to_string(), value.to_string());
        let text = toml::to_string(&values)?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| PrefsError::Write {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        std::fs::write(&self.path, text).map_err(|source| PrefsError::Write {
            path: self.path.clone(),
            source,
        })
    }
}

/// Process-local backend for tests and ephemeral sessions.
#[derive(Default)]
pub struct MemoryBackend {
    values: Mutex<BTreeMap<String, String>>,
}

impl PreferenceBackend for MemoryBackend {
    fn load_all(&self) -> Result<BTreeMap<String, String>, PrefsError> {
        Ok(self
            .values
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone())
    }

    fn store(&self, name: &str, value: &str) -> Result<(), PrefsError> {
        self.values
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(name.to_string(), value.to_string());
        Ok(())
    }
}

fn fallback_for(name: &str) -> &'static str {
    match name {
        DEFAULT_MODEL_PREF => FALLBACK_MODEL,
        THEME_PREF => Theme::default().as_str(),
        _ => "",
    }
}

/// The single entry point for reading and writing preferences.
pub struct PreferenceStore {
    backend: Box<dyn PreferenceBackend>,
    values: BTreeMap<String, String>,
}

impl PreferenceStore {
    /// Read everything once. An unreadable backend starts empty, so every
    /// `get` falls back to its default.
    pub fn open(backend: Box<dyn PreferenceBackend>) -> Self {
        let values = backend.load_all().unwrap_or_else(|err| {
            warn!(error = %err, "preferences unavailable, using defaults");
            BTreeMap::new()
        });
        PreferenceStore { backend, values }
    }

    pub fn open_default() -> Result<Self, PrefsError> {
        let path = default_prefs_path()?;
        debug!(path = %path.display(), "opening preferences");
        Ok(Self::open(Box::new(FileBackend::new(path))))
    }

    pub fn get(&self, name: &str) -> String {
        self.values
            .get(name)
            .cloned()
            .unwrap_or_else(|| fallback_for(name).to_string())
    }

    /// Persist immediately; later `get` calls see the new value. The value
    /// is not checked against anything.
    pub fn set(&mut self, name: &str, value: &str) -> Result<(), PrefsError> {
        self.backend.store(name, value)?;
        self.values.insert(name.to_string(), value.to_string());
        debug!(name, value, "preference saved");
        Ok(())
    }

    pub fn default_model(&self) -> String {
        self.get(DEFAULT_MODEL_PREF)
    }

    pub fn set_default_model(&mut self, model_key: &str) -> Result<(), PrefsError> {
        self.set(DEFAULT_MODEL_PREF, model_key)
    }

    /// Stored theme; an unrecognised value reads as the default.
    pub fn theme(&self) -> Theme {
        Theme::parse(&self.get(THEME_PREF)).unwrap_or_default()
    }

    pub fn set_theme(&mut self, theme: Theme) -> Result<(), PrefsError> {
        self.set(THEME_PREF, theme.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn defaults_apply_when_never_set() {
        let store = PreferenceStore::open(Box::new(MemoryBackend::default()));
        assert_eq!(store.default_model(), "xgb");
        assert_eq!(store.theme(), Theme::Light);
        assert_eq!(store.get("unknown"), "");
    }

    #[test]
    fn set_is_visible_immediately_and_after_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join(PREFS_FILE_NAME);

        let mut store = PreferenceStore::open(Box::new(FileBackend::new(&path)));
        store.set_default_model("cat").unwrap();
        store.set_theme(Theme::Dark).unwrap();
        assert_eq!(store.default_model(), "cat");

        let reloaded = PreferenceStore::open(Box::new(FileBackend::new(&path)));
        assert_eq!(reloaded.default_model(), "cat");
        assert_eq!(reloaded.theme(), Theme::Dark);
    }

    #[test]
    fn unknown_model_keys_are_stored_as_given() {
        let mut store = PreferenceStore::open(Box::new(MemoryBackend::default()));
        store.set_default_model("not-a-model").unwrap();
        assert_eq!(store.default_model(), "not-a-model");
    }

    #[test]
    fn malformed_file_falls_back_to_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(PREFS_FILE_NAME);
        std::fs::write(&path, "default_model = [").unwrap();
        let store = PreferenceStore::open(Box::new(FileBackend::new(&path)));
        assert_eq!(store.default_model(), "xgb");
        assert!(matches!(
            FileBackend::new(&path).load_all(),
            Err(PrefsError::Parse { .. })
        ));
    }

    #[test]
    fn theme_parsing() {
        assert_eq!(Theme::parse(" Dark ").unwrap(), Theme::Dark);
        assert!(Theme::parse("sepia").is_err());
        assert_eq!(Theme::Light.toggled(), Theme::Dark);
    }
}
