use std::path::Path;
use std::time::Duration;

use rusqlite::Connection;

use crate::error::AppError;

pub mod migrations;
pub mod repository;

/// Opens (creating if needed) a collection database and applies the schema.
pub fn open_collection_db(db_path: &Path) -> Result<Connection, AppError> {
    let conn = Connection::open(db_path)?;
    conn.busy_timeout(Duration::from_secs(5))?;
    migrations::run_migrations(&conn)?;
    Ok(conn)
}
