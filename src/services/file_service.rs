use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::warn;

use crate::error::AppError;
use crate::models::file_entry::{FileEntry, ThumbnailState};
use crate::scope_path;
use crate::services::identity::compute_identity;
use crate::services::thumbnail_service::{supports_thumbnail, ThumbnailCache};

/// Name of the private per-collection directory. Never listed.
pub const CONFIG_DIR_NAME: &str = ".trove";

/// Result of reconciling a client's cached view of a directory against disk.
#[derive(Debug, Default, Serialize)]
pub struct DirectoryDiff {
    /// New entries and entries modified after the client's last read.
    pub changed: Vec<FileEntry>,
    /// Identities the client knew about that no longer exist.
    pub removed: Vec<String>,
}

pub struct FileManager {
    root: PathBuf,
    thumbnails: ThumbnailCache,
}

impl FileManager {
    pub fn new(root: PathBuf, thumbnails: ThumbnailCache) -> Self {
        Self { root, thumbnails }
    }

    pub fn thumbnails(&self) -> &ThumbnailCache {
        &self.thumbnails
    }

    fn os_path(&self, nix_path: &str) -> PathBuf {
        let relative = nix_path.trim_start_matches('/');
        if relative.is_empty() {
            self.root.clone()
        } else {
            self.root.join(relative)
        }
    }

    pub fn get_file_details(&self, path: &str) -> Result<FileEntry, AppError> {
        let nix_path = scope_path::to_collection_path(path)?;
        let os_path = self.os_path(&nix_path);
        self.details_at(nix_path, os_path)
    }

    /// Details of the file at `os_path`, known to the collection as
    /// `nix_path`. Neither is normalized again.
    fn details_at(&self, nix_path: String, os_path: PathBuf) -> Result<FileEntry, AppError> {
        let metadata = match fs::metadata(&os_path) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(AppError::NotFound(format!(
                    "file does not exist: {}",
                    os_path.display()
                )));
            }
            Err(e) => return Err(e.into()),
        };

        let mut entry = FileEntry::new(
            compute_identity(&nix_path),
            nix_path,
            os_path,
            metadata.is_dir(),
        );
        entry.read_time = chrono::Utc::now().timestamp();
        entry.mod_time = metadata
            .modified()
            .map(|t| chrono::DateTime::<chrono::Utc>::from(t).timestamp())
            .unwrap_or_default();

        let can_thumb = metadata.is_file()
            && entry
                .extension()
                .map(|ext| supports_thumbnail(&ext))
                .unwrap_or(false);
        if can_thumb {
            entry.thumb_state = ThumbnailState::Possible;
            match self.thumbnails.check_thumbnail(&entry) {
                Ok(Some(name)) => {
                    entry.thumb_name = Some(name);
                    entry.thumb_state = ThumbnailState::Ready;
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(path = %entry.nix_path, error = %e, "could not check thumbnail");
                }
            }
        }

        Ok(entry)
    }

    /// Immediate children of `nix_path` as (collection path, disk path)
    /// pairs, sorted by name, without the private config directory. The
    /// disk path comes straight from the directory entry; a name that is not
    /// valid UTF-8 is only lossy in its collection path.
    fn children(&self, nix_path: &str) -> Result<Vec<(String, PathBuf)>, AppError> {
        let os_path = self.os_path(nix_path);
        if !os_path.is_dir() {
            return Err(AppError::NotFound(format!(
                "not a directory: {}",
                os_path.display()
            )));
        }

        let mut children = Vec::new();
        for entry in walkdir::WalkDir::new(&os_path)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
        {
            let entry = entry.map_err(|e| {
                AppError::Io(e.into_io_error().unwrap_or_else(|| {
                    std::io::Error::other("directory walk failed")
                }))
            })?;
            if entry.file_name() == CONFIG_DIR_NAME {
                continue;
            }
            let name = entry.file_name().to_string_lossy();
            children.push((scope_path::join(nix_path, &name), entry.into_path()));
        }
        Ok(children)
    }

    /// Details of every child of `path`. A child that vanishes mid-listing
    /// is skipped.
    pub fn get_directory_details(&self, path: &str) -> Result<Vec<FileEntry>, AppError> {
        let nix_path = scope_path::to_collection_path(path)?;
        let mut entries = Vec::new();
        for (child, os_path) in self.children(&nix_path)? {
            match self.details_at(child.clone(), os_path) {
                Ok(entry) => entries.push(entry),
                Err(e) => warn!(path = %child, error = %e, "skipping unreadable entry"),
            }
        }
        sort_entries(&mut entries);
        Ok(entries)
    }

    /// Compares the live children of `path` with the identities a client
    /// cached at `last_read_time`. Renames show up as one removal plus one
    /// addition.
    pub fn get_directory_diff(
        &self,
        path: &str,
        cached_identities: &[String],
        last_read_time: i64,
    ) -> Result<DirectoryDiff, AppError> {
        let nix_path = scope_path::to_collection_path(path)?;
        let mut unseen: HashSet<&str> = cached_identities.iter().map(String::as_str).collect();
        let mut diff = DirectoryDiff::default();

        for (child, os_path) in self.children(&nix_path)? {
            let entry = match self.details_at(child.clone(), os_path) {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(path = %child, error = %e, "skipping unreadable entry");
                    continue;
                }
            };
            let known = unseen.remove(entry.hash.as_str());
            if !known || entry.mod_time > last_read_time {
                diff.changed.push(entry);
            }
        }

        sort_entries(&mut diff.changed);
        diff.removed = unseen.into_iter().map(str::to_string).collect();
        diff.removed.sort();
        Ok(diff)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

fn sort_entries(entries: &mut [FileEntry]) {
    entries.sort_by(|a, b| {
        b.is_dir
            .cmp(&a.is_dir)
            .then_with(|| a.base.to_lowercase().cmp(&b.base.to_lowercase()))
    });
}
