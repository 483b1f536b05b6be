use serde::{Deserialize, Serialize};

/// Row of the `thumbnails` table. `id` is random so a stale thumbnail can be
/// replaced without reusing its file name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThumbnailRecord {
    pub id: String,
    pub hash: String,
    pub nix_path: String,
    pub is_directory: bool,
    pub epoch: i64,
}

impl ThumbnailRecord {
    pub fn file_name(&self) -> String {
        thumbnail_file_name(&self.id)
    }
}

pub fn thumbnail_file_name(id: &str) -> String {
    format!("{id}.jpg")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThumbnailUpdate {
    pub hash: String,
    pub thumb_name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ThumbnailFailure {
    pub path: String,
    pub reason: String,
}

/// Outcome of a thumbnail batch. Failures are collected per path instead of
/// aborting the batch.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ThumbnailBatchReport {
    pub generated: Vec<ThumbnailUpdate>,
    pub failed: Vec<ThumbnailFailure>,
}
