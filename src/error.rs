use std::path::PathBuf;

use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("the new collection conflicts with opened collections in fields: {}", .fields.join(", "))]
    ConflictingCollection { fields: Vec<&'static str> },

    #[error("invalid event payload: {0}")]
    InvalidPayload(String),

    #[error("unsupported collection database version {found} (expected {expected})")]
    UnsupportedSchemaVersion { found: i64, expected: i64 },

    #[error("thumbnail generation failed: {0}")]
    ThumbnailGenerationFailed(String),

    #[error("collection data is missing and creation is not allowed: {}", .0.display())]
    CreationNotAllowed(PathBuf),

    #[error("settings version mismatch: expected {expected}, found {found}")]
    SettingsVersionMismatch { found: String, expected: String },

    #[error("{0}")]
    General(String),
}

impl AppError {
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound(_) => true,
            Self::Io(e) => e.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

impl Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}
