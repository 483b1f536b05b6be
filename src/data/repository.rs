use std::collections::HashMap;

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::AppError;
use crate::models::thumbnail::ThumbnailRecord;

pub fn load_properties(conn: &Connection) -> Result<HashMap<String, String>, AppError> {
    let mut stmt = conn.prepare("SELECT name, value FROM properties")?;
    let props = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<Result<HashMap<String, String>, _>>()?;
    Ok(props)
}

/// Returns the stored value of `name`, storing `default` first if the
/// property has never been written.
pub fn get_or_insert_property(
    conn: &Connection,
    name: &str,
    default: &str,
) -> Result<String, AppError> {
    conn.execute(
        "INSERT OR IGNORE INTO properties (name, value) VALUES (?1, ?2)",
        params![name, default],
    )?;
    let value = conn.query_row(
        "SELECT value FROM properties WHERE name = ?1",
        params![name],
        |row| row.get(0),
    )?;
    Ok(value)
}

pub fn set_property(conn: &Connection, name: &str, value: &str) -> Result<(), AppError> {
    conn.execute(
        "INSERT INTO properties (name, value) VALUES (?1, ?2)
         ON CONFLICT(name) DO UPDATE SET value = excluded.value",
        params![name, value],
    )?;
    Ok(())
}

pub fn get_entity_id(conn: &Connection, hash: &str) -> Result<Option<String>, AppError> {
    let id = conn
        .query_row(
            "SELECT id FROM entities WHERE hash = ?1",
            params![hash],
            |row| row.get(0),
        )
        .optional()?;
    Ok(id)
}

/// Links `hash` to a new entity id unless a link already exists, and returns
/// whichever id is stored.
pub fn ensure_entity(
    conn: &Connection,
    hash: &str,
    nix_path: &str,
    is_dir: bool,
) -> Result<String, AppError> {
    let candidate = uuid::Uuid::new_v4().simple().to_string();
    conn.execute(
        "INSERT OR IGNORE INTO entities (id, hash, nix_path, is_dir) VALUES (?1, ?2, ?3, ?4)",
        params![candidate, hash, nix_path, is_dir],
    )?;
    get_entity_id(conn, hash)?
        .ok_or_else(|| AppError::General(format!("entity for {nix_path} was not stored")))
}

pub fn get_thumbnail(conn: &Connection, hash: &str) -> Result<Option<ThumbnailRecord>, AppError> {
    let record = conn
        .query_row(
            "SELECT id, hash, nix_path, is_dir, epoch FROM thumbnails WHERE hash = ?1",
            params![hash],
            |row| {
                Ok(ThumbnailRecord {
                    id: row.get(0)?,
                    hash: row.get(1)?,
                    nix_path: row.get(2)?,
                    is_directory: row.get(3)?,
                    epoch: row.get(4)?,
                })
            },
        )
        .optional()?;
    Ok(record)
}

/// Stores `record` as the only thumbnail for its hash.
pub fn upsert_thumbnail(conn: &Connection, record: &ThumbnailRecord) -> Result<(), AppError> {
    conn.execute(
        "INSERT INTO thumbnails (id, hash, nix_path, is_dir, epoch) VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(hash) DO UPDATE SET
             id = excluded.id,
             nix_path = excluded.nix_path,
             is_dir = excluded.is_dir,
             epoch = excluded.epoch",
        params![
            record.id,
            record.hash,
            record.nix_path,
            record.is_directory,
            record.epoch,
        ],
    )?;
    Ok(())
}

pub fn delete_thumbnail(conn: &Connection, id: &str) -> Result<usize, AppError> {
    let count = conn.execute("DELETE FROM thumbnails WHERE id = ?1", params![id])?;
    Ok(count)
}

pub fn list_thumbnail_ids(conn: &Connection) -> Result<Vec<String>, AppError> {
    let mut stmt = conn.prepare("SELECT id FROM thumbnails")?;
    let ids = stmt
        .query_map([], |row| row.get(0))?
        .collect::<Result<Vec<String>, _>>()?;
    Ok(ids)
}
