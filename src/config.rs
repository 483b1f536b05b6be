use std::path::PathBuf;

use serde::Deserialize;

use crate::error::AppError;

const DATA_DIR_ENV: &str = "TROVE_DATA_DIR";
const FFMPEG_ENV: &str = "TROVE_FFMPEG";
const FFPROBE_ENV: &str = "TROVE_FFPROBE";
const THUMB_WIDTH_ENV: &str = "TROVE_THUMB_WIDTH";
const DEBUG_ENV: &str = "TROVE_DEBUG";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Holds `settings.json`.
    pub data_dir: PathBuf,
    pub ffmpeg_path: PathBuf,
    pub ffprobe_path: PathBuf,
    pub thumbnail_width: u32,
    /// Passed to ffmpeg as `-q:v`; lower is better.
    pub thumbnail_quality: u8,
    pub debug: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            ffmpeg_path: PathBuf::from("ffmpeg"),
            ffprobe_path: PathBuf::from("ffprobe"),
            thumbnail_width: 300,
            thumbnail_quality: 10,
            debug: false,
        }
    }
}

fn default_data_dir() -> PathBuf {
    directories::BaseDirs::new()
        .map(|dirs| dirs.home_dir().join(".trove"))
        .unwrap_or_else(|| std::env::temp_dir().join("trove"))
}

impl EngineConfig {
    pub fn from_env() -> Result<Self, AppError> {
        Self::default().with_overrides(|key| std::env::var(key).ok())
    }

    fn with_overrides<F>(mut self, lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(dir) = lookup(DATA_DIR_ENV) {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(path) = lookup(FFMPEG_ENV) {
            self.ffmpeg_path = PathBuf::from(path);
        }
        if let Some(path) = lookup(FFPROBE_ENV) {
            self.ffprobe_path = PathBuf::from(path);
        }
        if let Some(raw) = lookup(THUMB_WIDTH_ENV) {
            self.thumbnail_width = raw.trim().parse().map_err(|_| {
                AppError::General(format!("{THUMB_WIDTH_ENV} is not a number: {raw}"))
            })?;
        }
        if let Some(raw) = lookup(DEBUG_ENV) {
            self.debug = matches!(raw.trim(), "1" | "true" | "yes");
        }
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        let dir = self.data_dir.to_string_lossy();
        if dir.contains('~') {
            return Err(AppError::General(format!(
                "data directory contains a tilde, which is not expanded; use a full path: {dir}"
            )));
        }
        if !self.data_dir.is_absolute() {
            return Err(AppError::General(format!(
                "data directory must be an absolute path: {dir}"
            )));
        }
        if self.thumbnail_width == 0 {
            return Err(AppError::General(
                "thumbnail width must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn defaults_are_usable() {
        let config = EngineConfig::default();
        assert_eq!(config.thumbnail_width, 300);
        assert_eq!(config.thumbnail_quality, 10);
        assert!(config.data_dir.ends_with(".trove") || config.data_dir.ends_with("trove"));
    }

    #[test]
    fn overrides_replace_defaults() {
        let vars = env(&[
            (DATA_DIR_ENV, "/srv/trove"),
            (FFMPEG_ENV, "/opt/ffmpeg/bin/ffmpeg"),
            (THUMB_WIDTH_ENV, "480"),
            (DEBUG_ENV, "true"),
            (FFPROBE_ENV, "  "),
        ]);
        let config = EngineConfig::default()
            .with_overrides(|k| vars.get(k).cloned())
            .unwrap();

        assert_eq!(config.data_dir, PathBuf::from("/srv/trove"));
        assert_eq!(config.ffmpeg_path, PathBuf::from("/opt/ffmpeg/bin/ffmpeg"));
        assert_eq!(config.ffprobe_path, PathBuf::from("ffprobe"));
        assert_eq!(config.thumbnail_width, 480);
        assert!(config.debug);
    }

    #[test]
    fn bad_width_is_rejected() {
        let vars = env(&[(THUMB_WIDTH_ENV, "wide")]);
        let result = EngineConfig::default().with_overrides(|k| vars.get(k).cloned());
        assert!(result.is_err());
    }

    #[test]
    fn validate_rejects_tilde_and_relative() {
        let mut config = EngineConfig {
            data_dir: PathBuf::from("~/trove"),
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());

        config.data_dir = PathBuf::from("relative/trove");
        assert!(config.validate().is_err());

        config.data_dir = std::env::temp_dir().join("trove_cfg");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn deserializes_partial_json() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"thumbnail_width": 200, "debug": true}"#).unwrap();
        assert_eq!(config.thumbnail_width, 200);
        assert!(config.debug);
        assert_eq!(config.ffmpeg_path, PathBuf::from("ffmpeg"));
    }
}
