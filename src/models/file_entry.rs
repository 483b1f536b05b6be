use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThumbnailState {
    Impossible,
    Possible,
    Ready,
}

/// A live file or directory inside a collection. Recomputed on every scan;
/// only the `hash -> entity_id` link is ever persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileEntry {
    /// Deterministic hash of `nix_path`.
    pub hash: String,
    /// Collection-relative path with POSIX separators, e.g. `/shows/ep1.mkv`.
    pub nix_path: String,
    #[serde(skip)]
    pub os_path: PathBuf,
    pub base: String,
    pub name: String,
    pub ext: Option<String>,
    pub is_dir: bool,
    pub thumb_name: Option<String>,
    pub thumb_state: ThumbnailState,
    /// Unix seconds at which the entry was read.
    pub read_time: i64,
    /// Unix seconds of the last modification on disk.
    pub mod_time: i64,
    pub entity_id: Option<String>,
}

impl FileEntry {
    pub fn new(hash: String, nix_path: String, os_path: PathBuf, is_dir: bool) -> Self {
        let base = Path::new(&nix_path)
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let ext = if is_dir {
            None
        } else {
            Path::new(&base)
                .extension()
                .map(|e| format!(".{}", e.to_string_lossy()))
        };
        let name = match &ext {
            Some(ext) => base[..base.len() - ext.len()].to_string(),
            None => base.clone(),
        };

        Self {
            hash,
            nix_path,
            os_path,
            base,
            name,
            ext,
            is_dir,
            thumb_name: None,
            thumb_state: ThumbnailState::Impossible,
            read_time: 0,
            mod_time: 0,
            entity_id: None,
        }
    }

    /// Lowercased extension without the dot.
    pub fn extension(&self) -> Option<String> {
        self.ext
            .as_deref()
            .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
    }
}
