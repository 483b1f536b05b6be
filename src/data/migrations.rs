use rusqlite::{Connection, OptionalExtension};
use tracing::{debug, warn};

use crate::error::AppError;

pub const SCHEMA_VERSION: i64 = 1;

const SCHEMA_V1: &str = "
CREATE TABLE IF NOT EXISTS version (
    version INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS properties (
    name TEXT PRIMARY KEY NOT NULL,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS entities (
    id TEXT PRIMARY KEY NOT NULL,
    hash TEXT UNIQUE NOT NULL,
    nix_path TEXT NOT NULL,
    is_dir BOOLEAN DEFAULT 0
);

CREATE TABLE IF NOT EXISTS tags (
    id TEXT PRIMARY KEY NOT NULL,
    name TEXT NOT NULL,
    color TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS entity_tags (
    entity_id TEXT NOT NULL REFERENCES entities(id) ON DELETE CASCADE,
    tag_id TEXT NOT NULL REFERENCES tags(id) ON DELETE CASCADE,
    PRIMARY KEY (entity_id, tag_id)
);

CREATE TABLE IF NOT EXISTS thumbnails (
    id TEXT PRIMARY KEY NOT NULL,
    hash TEXT UNIQUE NOT NULL,
    nix_path TEXT NOT NULL,
    is_dir BOOLEAN DEFAULT 0,
    epoch INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_entities_hash ON entities(hash);
CREATE INDEX IF NOT EXISTS idx_thumbnails_hash ON thumbnails(hash);
";

fn table_exists(conn: &Connection, table: &str) -> Result<bool, AppError> {
    let found: Option<String> = conn
        .query_row(
            "SELECT name FROM sqlite_master WHERE type='table' AND name = ?1",
            [table],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

/// Brings a collection database up to the current schema. Safe to run on
/// every open; a database written by another schema version is refused
/// rather than migrated.
pub fn run_migrations(conn: &Connection) -> Result<(), AppError> {
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;

    if table_exists(conn, "version")? {
        let stored: Option<i64> = conn
            .query_row("SELECT version FROM version LIMIT 1", [], |row| row.get(0))
            .optional()?;
        match stored {
            Some(found) if found != SCHEMA_VERSION => {
                return Err(AppError::UnsupportedSchemaVersion {
                    found,
                    expected: SCHEMA_VERSION,
                });
            }
            Some(found) => debug!(version = found, "collection database version"),
            None => {
                warn!("version table exists but holds no version, writing current version");
                conn.execute("INSERT INTO version (version) VALUES (?1)", [SCHEMA_VERSION])?;
            }
        }
        conn.execute_batch(SCHEMA_V1)?;
    } else {
        debug!("database has no schema, creating it");
        conn.execute_batch(SCHEMA_V1)?;
        conn.execute("INSERT INTO version (version) VALUES (?1)", [SCHEMA_VERSION])?;
    }
    Ok(())
}
