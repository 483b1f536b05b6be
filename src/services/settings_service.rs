use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::AppError;

pub const SETTINGS_FILE_NAME: &str = "settings.json";
pub const SETTINGS_VERSION: &str = "1";

#[derive(Debug, Default, Serialize, Deserialize)]
struct SettingsFile {
    version: Option<String>,
    open_collections: Option<Vec<PathBuf>>,
}

/// Process-level settings: the ordered list of collection roots that were
/// open when the engine last ran.
#[derive(Debug)]
pub struct SettingsStore {
    path: PathBuf,
    open_collections: Mutex<Vec<PathBuf>>,
}

impl SettingsStore {
    pub fn load(data_dir: &Path) -> Result<Self, AppError> {
        fs::create_dir_all(data_dir)?;
        let path = data_dir.join(SETTINGS_FILE_NAME);

        let stored = if path.exists() {
            serde_json::from_str::<SettingsFile>(&fs::read_to_string(&path)?)?
        } else {
            info!(path = %path.display(), "creating settings file");
            SettingsFile::default()
        };

        if let Some(found) = &stored.version {
            if found != SETTINGS_VERSION {
                return Err(AppError::SettingsVersionMismatch {
                    found: found.clone(),
                    expected: SETTINGS_VERSION.to_string(),
                });
            }
        }

        let needs_rewrite = stored.version.is_none() || stored.open_collections.is_none();
        let store = Self {
            path,
            open_collections: Mutex::new(stored.open_collections.unwrap_or_default()),
        };
        if needs_rewrite {
            let paths = store.open_collections();
            store.write(&paths)?;
        }
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn open_collections(&self) -> Vec<PathBuf> {
        self.open_collections
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Replaces the stored list and rewrites the settings file.
    pub fn set_open_collections(&self, paths: &[PathBuf]) -> Result<(), AppError> {
        let mut current = self
            .open_collections
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        self.write(paths)?;
        *current = paths.to_vec();
        Ok(())
    }

    fn write(&self, paths: &[PathBuf]) -> Result<(), AppError> {
        let file = SettingsFile {
            version: Some(SETTINGS_VERSION.to_string()),
            open_collections: Some(paths.to_vec()),
        };
        // Replace by rename so a crash mid-write never leaves a truncated file.
        let staging = self.path.with_extension("json.tmp");
        fs::write(&staging, serde_json::to_string_pretty(&file)?)?;
        fs::rename(&staging, &self.path)?;
        debug!(path = %self.path.display(), count = paths.len(), "settings written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_json(path: &Path) -> serde_json::Value {
        serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap()
    }

    #[test]
    fn test_load_creates_settings_file() {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().join("data");

        let store = SettingsStore::load(&data_dir).unwrap();

        assert!(store.open_collections().is_empty());
        let json = read_json(&data_dir.join(SETTINGS_FILE_NAME));
        assert_eq!(json["version"], SETTINGS_VERSION);
        assert_eq!(json["open_collections"], serde_json::json!([]));
    }

    #[test]
    fn test_open_collections_round_trip_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::load(dir.path()).unwrap();
        let paths = vec![PathBuf::from("/srv/media"), PathBuf::from("/srv/photos")];

        store.set_open_collections(&paths).unwrap();
        assert_eq!(store.open_collections(), paths);

        let reloaded = SettingsStore::load(dir.path()).unwrap();
        assert_eq!(reloaded.open_collections(), paths);
    }

    #[test]
    fn test_missing_list_is_rewritten() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SETTINGS_FILE_NAME);
        fs::write(&path, format!(r#"{{"version": "{SETTINGS_VERSION}"}}"#)).unwrap();

        let store = SettingsStore::load(dir.path()).unwrap();

        assert!(store.open_collections().is_empty());
        assert_eq!(read_json(&path)["open_collections"], serde_json::json!([]));
    }

    #[test]
    fn test_version_mismatch_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join(SETTINGS_FILE_NAME),
            r#"{"version": "0", "open_collections": []}"#,
        )
        .unwrap();

        let err = SettingsStore::load(dir.path()).unwrap_err();
        assert!(matches!(err, AppError::SettingsVersionMismatch { .. }));
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(SETTINGS_FILE_NAME), "not json").unwrap();

        let err = SettingsStore::load(dir.path()).unwrap_err();
        assert!(matches!(err, AppError::Serde(_)));
    }

    #[test]
    fn test_write_replaces_file_through_staging_copy() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::load(dir.path()).unwrap();
        let staging = dir.path().join("settings.json.tmp");

        // Leftover of an interrupted write.
        fs::write(&staging, "{\"version\": \"1\", \"open_coll").unwrap();
        let reloaded = SettingsStore::load(dir.path()).unwrap();
        assert!(reloaded.open_collections().is_empty());

        let paths = vec![PathBuf::from("/srv/media")];
        store.set_open_collections(&paths).unwrap();

        assert!(!staging.exists());
        assert_eq!(SettingsStore::load(dir.path()).unwrap().open_collections(), paths);
    }
}
